use super::{Broker, EventRegistry, Subscription, MAX_CONCURRENT_MESSAGES};
use crate::envelope::{decode, EventEnvelope};
use crate::error::BrokerError;
use crate::transport::{Delivery, Transport, QUEUE_GROUP};
use futures::{FutureExt, StreamExt};
use log::{debug, error, trace, warn};
use std::panic::AssertUnwindSafe;

/// Dispatches notifications addressed to one resource
struct EventDispatcher {
    host: String,
    resource: String,
    events: EventRegistry,
}

impl EventDispatcher {
    /// Invokes the matching handler. Nothing is ever reported back to the emitter.
    async fn dispatch(&self, delivery: Delivery) {
        let envelope: EventEnvelope = match decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("[{}:{}] {}", self.host, self.resource, e);
                return;
            }
        };

        let handler = match self.events.get(&envelope.event) {
            Some(handler) => handler,
            None => {
                warn!(
                    "[{}:{}] Service event '{}.{}' is not registered. (caller: {})",
                    self.host, self.resource, self.resource, envelope.event, envelope.caller
                );
                return;
            }
        };

        trace!(
            "[{}:{}.{}] Handling event from {}",
            self.host,
            self.resource,
            envelope.event,
            envelope.caller
        );

        match AssertUnwindSafe(handler.handle(envelope.data))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                "[{}:{}.{}] {} (caller: {})",
                self.host, self.resource, envelope.event, e, envelope.caller
            ),
            Err(_) => error!(
                "[{}:{}.{}] Handler panicked. (caller: {})",
                self.host, self.resource, envelope.event, envelope.caller
            ),
        }
    }
}

impl<T> Broker<T>
where
    T: Transport + 'static,
{
    /// Binds the event handlers to the event subject of a resource
    ///
    /// Undecodable notifications, unknown events and handler failures are logged as warnings
    /// and dropped, the subscription keeps serving.
    pub async fn listen(
        &self,
        resource: &str,
        events: EventRegistry,
    ) -> Result<Subscription, BrokerError> {
        self.router.validate_resource(resource)?;

        let subject = self.router.event_subject(resource);
        let stream = self
            .transport
            .subscribe(subject.as_str(), QUEUE_GROUP)
            .await
            .map_err(BrokerError::Transport)?;

        debug!(
            "Listening for events {:?} of {} on {}",
            events.events(),
            resource,
            subject
        );

        let dispatcher = EventDispatcher {
            host: self.router.host().to_owned(),
            resource: resource.to_owned(),
            events,
        };

        let handle = tokio::spawn(async move {
            let dispatcher = &dispatcher;

            stream
                .for_each_concurrent(Some(MAX_CONCURRENT_MESSAGES), move |delivery| {
                    dispatcher.dispatch(delivery)
                })
                .await;

            debug!(
                "Subscription of {} ended, no longer listening for events",
                dispatcher.resource
            );
        });

        Ok(Subscription::new(subject, handle))
    }
}
