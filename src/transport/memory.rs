//! [`Transport`] implementation for services sharing one process

use super::{Delivery, DeliveryStream, ReplyLocation, RequestError, Transport};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

/// The requesting side went away before a response could be handed over
#[derive(Debug, Error)]
#[error("pending request was dropped before a response arrived")]
struct PendingRequestDropped;

/// Members of one queue group on one subject, served round-robin
#[derive(Default)]
struct QueueGroup {
    members: Vec<mpsc::UnboundedSender<Delivery>>,
    next: usize,
}

impl QueueGroup {
    /// Hands the delivery to the next live member, pruning members whose subscription is gone
    fn deliver(&mut self, mut delivery: Delivery) -> bool {
        while !self.members.is_empty() {
            let index = self.next % self.members.len();

            match self.members[index].send(delivery) {
                Ok(_) => {
                    self.next = index + 1;
                    return true;
                }
                Err(mpsc::error::SendError(returned)) => {
                    self.members.remove(index);
                    delivery = returned;
                }
            }
        }

        false
    }
}

#[derive(Default)]
struct State {
    subjects: Mutex<HashMap<String, HashMap<String, QueueGroup>>>,
    pending: Mutex<HashMap<ReplyLocation, oneshot::Sender<Vec<u8>>>>,
}

/// Transport which passes messages through tokio channels
///
/// Clones share the same state, so two brokers constructed from clones of one instance can
/// talk to each other.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<State>,
}

impl MemoryTransport {
    /// Creates a new, empty instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests still waiting for a response
    pub async fn pending_requests(&self) -> usize {
        self.state.pending.lock().await.len()
    }

    /// Number of subjects with subscriptions. Abandoned ones are forgotten on the next publish.
    pub async fn subject_count(&self) -> usize {
        self.state.subjects.lock().await.len()
    }

    async fn dispatch(&self, subject: &str, delivery: Delivery) -> usize {
        let mut subjects = self.state.subjects.lock().await;
        let mut receivers = 0;

        if let Some(groups) = subjects.get_mut(subject) {
            for group in groups.values_mut() {
                if group.deliver(delivery.clone()) {
                    receivers += 1;
                }
            }

            groups.retain(|_, group| !group.members.is_empty());

            if groups.is_empty() {
                subjects.remove(subject);
            }
        }

        trace!("Dispatched message on {} to {} groups", subject, receivers);
        receivers
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: &[u8]) -> EmptyResult {
        self.dispatch(subject, Delivery::new(payload.to_vec())).await;
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<DeliveryStream, BoxedError> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.state
            .subjects
            .lock()
            .await
            .entry(subject.to_owned())
            .or_default()
            .entry(queue_group.to_owned())
            .or_default()
            .members
            .push(tx);

        debug!("Joined queue group {} on {}", queue_group, subject);

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        })
        .boxed();

        Ok(stream)
    }

    async fn request_one(
        &self,
        subject: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError> {
        let location: ReplyLocation = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.state.pending.lock().await.insert(location.clone(), tx);

        self.dispatch(
            subject,
            Delivery::with_reply(payload.to_vec(), location.clone()),
        )
        .await;

        let result = tokio::time::timeout(timeout, rx).await;

        // Nobody may respond to this location anymore, regardless of the outcome
        self.state.pending.lock().await.remove(&location);

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RequestError::ReceptionFailed(Box::new(
                PendingRequestDropped,
            ))),
            Err(_) => Err(RequestError::TimedOut(timeout)),
        }
    }

    async fn respond(&self, location: &ReplyLocation, payload: &[u8]) -> EmptyResult {
        let sender = self.state.pending.lock().await.remove(location);

        match sender {
            Some(sender) => {
                if sender.send(payload.to_vec()).is_err() {
                    debug!("Requestor of {} is gone, dropping response", location);
                }
            }
            None => debug!("Dropping response to expired location {}", location),
        }

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::timeout;

    const SUBJECT: &str = "default.action.v1.resource";
    const PATIENCE: Duration = Duration::from_millis(250);

    async fn next(stream: &mut DeliveryStream) -> Option<Delivery> {
        timeout(PATIENCE, stream.next()).await.ok().flatten()
    }

    #[tokio::test]
    async fn balance_within_a_queue_group() {
        let transport = MemoryTransport::new();
        let mut first = transport.subscribe(SUBJECT, "workers").await.unwrap();
        let mut second = transport.subscribe(SUBJECT, "workers").await.unwrap();

        transport.publish(SUBJECT, b"1").await.unwrap();
        transport.publish(SUBJECT, b"2").await.unwrap();

        assert_eq!(next(&mut first).await, Some(Delivery::new(b"1".to_vec())));
        assert_eq!(next(&mut second).await, Some(Delivery::new(b"2".to_vec())));
        assert_eq!(next(&mut first).await, None);
        assert_eq!(next(&mut second).await, None);
    }

    #[tokio::test]
    async fn copy_to_every_queue_group() {
        let transport = MemoryTransport::new();
        let mut workers = transport.subscribe(SUBJECT, "workers").await.unwrap();
        let mut auditors = transport.subscribe(SUBJECT, "auditors").await.unwrap();

        transport.publish(SUBJECT, b"hello").await.unwrap();

        assert_eq!(next(&mut workers).await, Some(Delivery::new(b"hello".to_vec())));
        assert_eq!(next(&mut auditors).await, Some(Delivery::new(b"hello".to_vec())));
    }

    #[tokio::test]
    async fn skip_dropped_members() {
        let transport = MemoryTransport::new();
        let dropped = transport.subscribe(SUBJECT, "workers").await.unwrap();
        let mut alive = transport.subscribe(SUBJECT, "workers").await.unwrap();
        drop(dropped);

        transport.publish(SUBJECT, b"1").await.unwrap();
        transport.publish(SUBJECT, b"2").await.unwrap();

        assert_eq!(next(&mut alive).await, Some(Delivery::new(b"1".to_vec())));
        assert_eq!(next(&mut alive).await, Some(Delivery::new(b"2".to_vec())));
    }

    #[tokio::test]
    async fn forget_abandoned_subjects() {
        let transport = MemoryTransport::new();
        let workers = transport.subscribe(SUBJECT, "workers").await.unwrap();
        let mut auditors = transport.subscribe(SUBJECT, "auditors").await.unwrap();
        drop(workers);

        transport.publish(SUBJECT, b"1").await.unwrap();
        assert_eq!(transport.subject_count().await, 1);
        assert_eq!(next(&mut auditors).await, Some(Delivery::new(b"1".to_vec())));

        drop(auditors);
        transport.publish(SUBJECT, b"2").await.unwrap();
        assert_eq!(transport.subject_count().await, 0);
    }

    #[tokio::test]
    async fn ignore_other_subjects() {
        let transport = MemoryTransport::new();
        let mut stream = transport.subscribe(SUBJECT, "workers").await.unwrap();

        transport
            .publish("default.event.v1.resource", b"nope")
            .await
            .unwrap();

        assert_eq!(next(&mut stream).await, None);
    }

    #[tokio::test]
    async fn correlate_responses() {
        let transport = MemoryTransport::new();
        let mut stream = transport.subscribe(SUBJECT, "workers").await.unwrap();

        let responder = transport.clone();
        tokio::spawn(async move {
            let delivery = stream.next().await.unwrap();
            let mut response = delivery.payload.clone();
            response.reverse();
            responder
                .respond(&delivery.reply_to.unwrap(), &response)
                .await
                .unwrap();
        });

        let response = transport
            .request_one(SUBJECT, b"abc", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(response, b"cba".to_vec());
        assert_eq!(transport.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn time_out_without_responders() {
        let transport = MemoryTransport::new();

        let result = transport
            .request_one(SUBJECT, b"abc", Duration::from_millis(20))
            .await;

        assert!(matches!(result, Err(RequestError::TimedOut(_))));
        assert_eq!(transport.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn discard_late_responses() {
        let transport = MemoryTransport::new();
        let mut stream = transport.subscribe(SUBJECT, "workers").await.unwrap();

        let result = transport
            .request_one(SUBJECT, b"abc", Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(RequestError::TimedOut(_))));

        let delivery = next(&mut stream).await.unwrap();
        transport
            .respond(&delivery.reply_to.unwrap(), b"late")
            .await
            .unwrap();

        assert_eq!(transport.pending_requests().await, 0);
    }
}
