//! Publish/subscribe transports the broker conventions are layered upon
//!
//! The broker does not care how messages travel between processes. All it requires is a
//! [`Transport`] which can
//!
//! 1. publish a payload to a subject without waiting for anybody to receive it,
//! 2. subscribe to a subject as a member of a queue group, where each message is delivered to
//!    only one member of the group (effectively implementing load balancing and simple, dynamic scalability),
//! 3. send a request and wait for exactly one response or a timeout and
//! 4. deliver a response to the location attached to a received request.
//!
//! Two implementations are provided: [`MemoryTransport`](memory::MemoryTransport) for services
//! living in the same process (and tests) and [`RedisTransport`](redis::RedisTransport) for
//! distributed deployments.

use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "redis-transport")]
pub mod redis;

/// Queue group joined by all action and event subscriptions
pub const QUEUE_GROUP: &str = "job.workers";

/// Describes a location where a response should be sent to
///
/// Opaque to the broker, it is handed out by the transport alongside a request and passed back
/// when responding. Each location is only ever used for a single response.
pub type ReplyLocation = String;

/// Message received through a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Raw message content
    pub payload: Vec<u8>,
    /// Where a response is expected, if the message was sent as a request
    pub reply_to: Option<ReplyLocation>,
}

impl Delivery {
    /// Creates a delivery which does not expect a response
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            reply_to: None,
        }
    }

    /// Creates a delivery which expects a response at the given location
    pub fn with_reply(payload: Vec<u8>, reply_to: ReplyLocation) -> Self {
        Self {
            payload,
            reply_to: Some(reply_to),
        }
    }
}

/// Error type for sending requests
#[derive(Error, Debug)]
pub enum RequestError {
    /// No response arrived within the given duration
    #[error("no response received within {0:?}")]
    TimedOut(Duration),
    /// Publishing of the request failed
    #[error("sending of request failed")]
    SendingFailure(#[source] BoxedError),
    /// The response could not be received
    #[error("response not receivable")]
    ReceptionFailed(#[source] BoxedError),
}

/// Stream of messages delivered to a subscription
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Message passing primitives required by the broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a payload to all queue groups subscribed to the subject. Fire-and-forget.
    async fn publish(&self, subject: &str, payload: &[u8]) -> EmptyResult;

    /// Joins the given queue group on a subject and streams the messages assigned to this member
    async fn subscribe(&self, subject: &str, queue_group: &str)
        -> Result<DeliveryStream, BoxedError>;

    /// Sends a request and waits for the first response or until the timeout expires
    ///
    /// Responses arriving after the timeout are discarded by the transport.
    async fn request_one(
        &self,
        subject: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError>;

    /// Delivers a response to the location attached to a request
    async fn respond(&self, location: &ReplyLocation, payload: &[u8]) -> EmptyResult;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn publish(&self, subject: &str, payload: &[u8]) -> EmptyResult {
        (**self).publish(subject, payload).await
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<DeliveryStream, BoxedError> {
        (**self).subscribe(subject, queue_group).await
    }

    async fn request_one(
        &self,
        subject: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError> {
        (**self).request_one(subject, payload, timeout).await
    }

    async fn respond(&self, location: &ReplyLocation, payload: &[u8]) -> EmptyResult {
        (**self).respond(location, payload).await
    }
}
