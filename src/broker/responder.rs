use super::{ActionRegistry, Broker, Subscription, MAX_CONCURRENT_MESSAGES};
use crate::envelope::{decode_value, encode, ReplyEnvelope, RequestEnvelope};
use crate::error::{BrokerError, RemoteError};
use crate::transport::{Delivery, Transport, QUEUE_GROUP};
use futures::{FutureExt, StreamExt};
use log::{debug, error, trace, warn};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Answers requests addressed to one resource
struct ActionDispatcher<T> {
    transport: Arc<T>,
    host: String,
    resource: String,
    actions: ActionRegistry,
}

impl<T> ActionDispatcher<T>
where
    T: Transport,
{
    /// Processes a request and publishes exactly one reply
    async fn serve(&self, delivery: Delivery) {
        let location = match delivery.reply_to {
            Some(location) => location,
            None => {
                warn!(
                    "[{}:{}] Dropping request without reply location",
                    self.host, self.resource
                );
                return;
            }
        };

        let reply = self.process(&delivery.payload).await;

        let payload = match encode(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[{}:{}] {}", self.host, self.resource, e);
                return;
            }
        };

        if let Err(e) = self.transport.respond(&location, &payload).await {
            warn!(
                "[{}:{}] Failed to deliver response: {}",
                self.host, self.resource, e
            );
        }
    }

    async fn process(&self, payload: &[u8]) -> ReplyEnvelope {
        let origin = format!("{}:{}", self.host, self.resource);

        let request = match decode_value(payload) {
            Ok(value) => RequestEnvelope::from_value(value),
            Err(e) => {
                return ReplyEnvelope::Failure(RemoteError::new(e.to_string()).attributed(&origin))
            }
        };

        let handler = match self.actions.get(&request.action) {
            Some(handler) => handler,
            None => {
                let message = format!(
                    "Service action '{}.{}' is not registered.",
                    self.resource, request.action
                );
                return ReplyEnvelope::Failure(RemoteError::new(message).attributed(&origin));
            }
        };

        let origin = format!("{}.{}", origin, request.action);
        trace!("[{}] Invoking action", origin);

        match AssertUnwindSafe(handler.handle(request.data))
            .catch_unwind()
            .await
        {
            Ok(Ok(data)) => ReplyEnvelope::Success(data),
            Ok(Err(e)) => ReplyEnvelope::Failure(e.attributed(&origin)),
            Err(_) => {
                error!("[{}] Handler panicked", origin);
                ReplyEnvelope::Failure(RemoteError::new("Handler panicked.").attributed(&origin))
            }
        }
    }
}

impl<T> Broker<T>
where
    T: Transport + 'static,
{
    /// Binds the actions to the action subject of a resource
    ///
    /// Every request received on the subject is answered with exactly one reply. Failures of
    /// any kind are sent back to the caller, tagged with the host and the resource, and never
    /// stop the subscription.
    pub async fn register(
        &self,
        resource: &str,
        actions: ActionRegistry,
    ) -> Result<Subscription, BrokerError> {
        self.router.validate_resource(resource)?;

        let subject = self.router.action_subject(resource);
        let stream = self
            .transport
            .subscribe(subject.as_str(), QUEUE_GROUP)
            .await
            .map_err(BrokerError::Transport)?;

        debug!(
            "Serving actions {:?} of {} on {}",
            actions.verbs(),
            resource,
            subject
        );

        let dispatcher = ActionDispatcher {
            transport: self.transport.clone(),
            host: self.router.host().to_owned(),
            resource: resource.to_owned(),
            actions,
        };

        let handle = tokio::spawn(async move {
            let dispatcher = &dispatcher;

            stream
                .for_each_concurrent(Some(MAX_CONCURRENT_MESSAGES), move |delivery| {
                    dispatcher.serve(delivery)
                })
                .await;

            debug!(
                "Subscription of {} ended, no longer serving actions",
                dispatcher.resource
            );
        });

        Ok(Subscription::new(subject, handle))
    }
}
