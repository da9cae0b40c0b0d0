use super::Broker;
use crate::envelope::{decode, encode, EnvelopeError, ReplyEnvelope, RequestEnvelope};
use crate::error::BrokerError;
use crate::transport::{RequestError, Transport};
use log::trace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

impl<T> Broker<T>
where
    T: Transport + 'static,
{
    /// Invokes an action and waits for its reply using the configured timeout
    ///
    /// The subject is either `resource.action` or `version.resource.action`. Resolves with the
    /// value returned by the remote handler or fails with the error it raised, including all
    /// custom fields. No retries are attempted.
    pub async fn call<P, R>(&self, subject: &str, params: P) -> Result<R, BrokerError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_timeout(subject, params, self.timeout).await
    }

    /// Like [`call`](Broker::call) but with an explicit timeout
    pub async fn call_with_timeout<P, R>(
        &self,
        subject: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R, BrokerError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let resolved = self.router.resolve_call_subject(subject)?;
        let data = serde_json::to_value(params).map_err(EnvelopeError::Encode)?;
        let payload = encode(&RequestEnvelope::new(resolved.verb, data))?;

        trace!("Requesting {} ({:?})", subject, timeout);

        let response = match self
            .transport
            .request_one(resolved.subject.as_str(), &payload, timeout)
            .await
        {
            Ok(response) => response,
            Err(RequestError::TimedOut(_)) => {
                return Err(BrokerError::Timeout {
                    host: self.router.host().to_owned(),
                    subject: resolved.subject.to_string(),
                })
            }
            Err(e) => return Err(BrokerError::Transport(Box::new(e))),
        };

        let reply: ReplyEnvelope = decode(&response)?;
        let value = reply.into_result()?;

        Ok(serde_json::from_value(value).map_err(EnvelopeError::Invalid)?)
    }
}
