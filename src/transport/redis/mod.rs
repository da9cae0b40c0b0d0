//! [`Transport`] implementation using [`redis`](::redis)
//!
//! - messages are appended to a [Redis Stream](https://redis.io/topics/streams-intro) named after the subject using `XADD`
//! - queue groups map onto stream consumer groups which are read with `XREADGROUP`
//! - responses are pushed onto a list (`RPUSH`) on which the requesting side blocks with `BLPOP`
//!
//! Every subscription joins its consumer group under a fresh, random consumer name. Consumers
//! are never removed from the group (`XGROUP DELCONSUMER`), so a group accumulates one idle
//! consumer per past subscription. Since entries are read with `NOACK` they hold no pending
//! entries and cost nothing but an entry in `XINFO CONSUMERS`.

use super::{Delivery, DeliveryStream, ReplyLocation, RequestError, Transport};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, error, warn};
use redis::aio::{Connection, ConnectionLike};
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError, RedisResult};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

mod connection;

pub use connection::RedisFactory;

const RESPONSE_KEY_PREFIX: &str = "response.";
const STREAM_PAYLOAD_KEY: &str = "payload";
const STREAM_REPLY_KEY: &str = "reply";
const STREAM_ID_NEW: &str = "*";
const STREAM_ID_TAIL: &str = "$";
const STREAM_ID_ADDITIONS: &str = ">";

/// Approximate number of messages retained per subject
pub const DEFAULT_STREAM_LIMIT: usize = 1000;

/// Seconds an unclaimed response is kept around before it expires
const RESPONSE_TTL_SECS: usize = 60;

/// Upper bound for publishing a message, including connection attempts
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

const READ_BATCH_SIZE: usize = 10;
const READ_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Publishing did not finish in time, usually because the server is unreachable
#[derive(Debug, Error)]
#[error("publishing to {0} timed out after {1:?}")]
struct PublishTimedOut(String, Duration);

/// Transport implementation on top of a single redis server
#[derive(Clone)]
pub struct RedisTransport {
    factory: Arc<RedisFactory>,
    stream_limit: usize,
}

impl RedisTransport {
    /// Creates a new instance which connects to the given URL on first use
    pub fn new(url: &str) -> Result<Self, BoxedError> {
        Ok(Self::from_factory(Arc::new(RedisFactory::open(url)?)))
    }

    /// Creates a new instance from an existing [`RedisFactory`]
    pub fn from_factory(factory: Arc<RedisFactory>) -> Self {
        Self {
            factory,
            stream_limit: DEFAULT_STREAM_LIMIT,
        }
    }

    /// Changes the approximate number of messages retained per subject
    pub fn with_stream_limit(mut self, limit: usize) -> Self {
        self.stream_limit = limit;
        self
    }

    async fn append(&self, subject: &str, fields: &[(&str, &[u8])]) -> EmptyResult {
        let mut con = self.factory.multiplexed().await;
        let result = con
            .xadd_maxlen::<_, _, _, _, ()>(
                subject,
                StreamMaxlen::Approx(self.stream_limit),
                STREAM_ID_NEW,
                fields,
            )
            .await;

        self.checked(result).await
    }

    /// Drops the shared connection if the error indicates that it is broken
    async fn checked<T>(&self, result: RedisResult<T>) -> Result<T, BoxedError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if requires_reconnect(&e) {
                    warn!("Lost shared redis connection: {}", e);
                    self.factory.invalidate().await;
                }

                Err(e.into())
            }
        }
    }

    async fn push_response(&self, key: &str, payload: &[u8]) -> EmptyResult {
        let mut con = self.factory.multiplexed().await;

        let pushed = con.rpush::<_, _, ()>(key, payload).await;
        self.checked(pushed).await?;

        let expired = con.expire::<_, ()>(key, RESPONSE_TTL_SECS).await;
        self.checked(expired).await
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, subject: &str, payload: &[u8]) -> EmptyResult {
        match timeout(PUBLISH_TIMEOUT, self.append(subject, &[(STREAM_PAYLOAD_KEY, payload)])).await {
            Ok(result) => result,
            Err(_) => Err(Box::new(PublishTimedOut(subject.to_owned(), PUBLISH_TIMEOUT))),
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<DeliveryStream, BoxedError> {
        let mut con = self.factory.owned().await;
        create_consumer_group(&mut con, subject, queue_group).await;

        let consumer = format!("{}-{}", queue_group, Uuid::new_v4());
        debug!(
            "Joined consumer group {} on {} as {}",
            queue_group, subject, consumer
        );

        Ok(delivery_stream(
            self.factory.clone(),
            con,
            subject.to_owned(),
            (queue_group.to_owned(), consumer),
        ))
    }

    async fn request_one(
        &self,
        subject: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError> {
        // Connecting counts towards the timeout, an unreachable server must not stall the caller
        match tokio::time::timeout(timeout, self.exchange(subject, payload, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(RequestError::TimedOut(timeout)),
        }
    }

    async fn respond(&self, location: &ReplyLocation, payload: &[u8]) -> EmptyResult {
        let key = response_key(location);

        match timeout(PUBLISH_TIMEOUT, self.push_response(&key, payload)).await {
            Ok(result) => result,
            Err(_) => Err(Box::new(PublishTimedOut(key, PUBLISH_TIMEOUT))),
        }
    }
}

impl RedisTransport {
    /// Appends the request and blocks until a response arrives on its location
    async fn exchange(
        &self,
        subject: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError> {
        let location: ReplyLocation = Uuid::new_v4().to_string();
        let key = response_key(&location);

        // TODO Pool the blocking connections instead of opening one per request
        let mut con = self.factory.owned().await;

        self.append(
            subject,
            &[
                (STREAM_PAYLOAD_KEY, payload),
                (STREAM_REPLY_KEY, location.as_bytes()),
            ],
        )
        .await
        .map_err(RequestError::SendingFailure)?;

        match con
            .blpop::<_, Option<(String, Vec<u8>)>>(&key, blocking_seconds(timeout))
            .await
        {
            Ok(Some((_, response))) => Ok(response),
            Ok(None) => Err(RequestError::TimedOut(timeout)),
            Err(e) => Err(RequestError::ReceptionFailed(e.into())),
        }
    }
}

/// Whether the error leaves the connection unusable
fn requires_reconnect(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error()
}

fn response_key(location: &str) -> String {
    format!("{}{}", RESPONSE_KEY_PREFIX, location)
}

/// Redis only blocks in whole seconds, the exact timeout is enforced locally
fn blocking_seconds(timeout: Duration) -> usize {
    let seconds = (timeout.as_millis() + 999) / 1000;
    seconds.max(1) as usize
}

async fn create_consumer_group<C: ConnectionLike + Send>(con: &mut C, key: &str, group: &str) {
    // Fails with BUSYGROUP if the group already exists which is fine
    con.xgroup_create_mkstream::<_, _, _, ()>(key, group, STREAM_ID_TAIL)
        .await
        .ok();
}

fn parse_delivery(entry: StreamId) -> Option<Delivery> {
    let payload: Vec<u8> = match entry.get(STREAM_PAYLOAD_KEY) {
        Some(payload) => payload,
        None => {
            warn!("Dropping stream entry {} without payload", entry.id);
            return None;
        }
    };

    Some(Delivery {
        payload,
        reply_to: entry.get(STREAM_REPLY_KEY),
    })
}

fn read_options(group: &str, consumer: &str) -> StreamReadOptions {
    StreamReadOptions::default()
        .group(group, consumer)
        .count(READ_BATCH_SIZE)
        .block(0)
        .noack()
}

/// Streams entries of a consumer group one at a time, reconnecting on read errors
fn delivery_stream(
    factory: Arc<RedisFactory>,
    con: Connection,
    key: String,
    identity: (String, String),
) -> DeliveryStream {
    let state = (factory, con, key, identity);

    stream::unfold(state, |(factory, mut con, key, identity)| async move {
        loop {
            let (group, consumer) = &identity;
            let result = con
                .xread_options::<_, _, StreamReadReply>(
                    &[&key],
                    &[STREAM_ID_ADDITIONS],
                    read_options(group, consumer),
                )
                .await;

            match result {
                Ok(reply) => {
                    let batch: Vec<Delivery> = reply
                        .keys
                        .into_iter()
                        .flat_map(|stream| stream.ids)
                        .filter_map(parse_delivery)
                        .collect();

                    if !batch.is_empty() {
                        return Some((batch, (factory, con, key, identity)));
                    }
                }
                Err(e) => {
                    error!("Encountered error reading from redis stream {}: {}", key, e);
                    sleep(READ_RETRY_INTERVAL).await;

                    if requires_reconnect(&e) {
                        con = factory.owned().await;
                    }

                    // The group vanishes when the server loses its data
                    create_consumer_group(&mut con, &key, group).await;
                }
            }
        }
    })
    .flat_map(stream::iter)
    .boxed()
}
