use super::Broker;
use crate::envelope::{encode, EnvelopeError, EventEnvelope};
use crate::error::BrokerError;
use crate::transport::Transport;
use log::trace;
use serde::Serialize;

impl<T> Broker<T>
where
    T: Transport + 'static,
{
    /// Notifies the listeners of a resource about an event
    ///
    /// The subject is either `resource.event` or `version.resource.event`. Returns as soon as the
    /// notification is published, neither delivery nor handler outcome is observed.
    pub async fn emit<P>(&self, subject: &str, params: P) -> Result<(), BrokerError>
    where
        P: Serialize,
    {
        let resolved = self.router.resolve_event_subject(subject)?;
        let data = serde_json::to_value(params).map_err(EnvelopeError::Encode)?;
        let envelope = EventEnvelope::new(resolved.verb, self.router.host(), data);
        let payload = encode(&envelope)?;

        trace!("Emitting {} to {}", envelope.event, resolved.subject);

        self.transport
            .publish(resolved.subject.as_str(), &payload)
            .await
            .map_err(BrokerError::Transport)
    }
}
