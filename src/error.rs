//! Error taxonomy of the broker and the wire-portable error value

use crate::envelope::EnvelopeError;
use crate::library::BoxedError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Keys of a failure reply which are owned by the envelope itself
pub(crate) const RESERVED_FIELDS: [&str; 2] = ["error", "message"];

/// Key under which [`RemoteError::from_error`] records the source chain
const CAUSES_FIELD: &str = "causes";

/// Failures surfaced to code using a [`Broker`](crate::broker::Broker)
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Shorthand subject did not consist of two or three non-empty segments.
    /// Raised before any network operation takes place.
    #[error("[{host}] {input} - Invalid subject format.")]
    InvalidSubject {
        /// Host which rejected the subject
        host: String,
        /// Subject as it was supplied by the caller
        input: String,
    },
    /// No reply arrived within the configured window
    #[error("[{host}] {subject} - Microservice request timeout!")]
    Timeout {
        /// Host which issued the request
        host: String,
        /// Canonical subject the request was sent to
        subject: String,
    },
    /// Reply could not be decoded or a request could not be encoded
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// Remote handler reported a failure
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Underlying transport failed to deliver the message
    #[error("transport failure")]
    Transport(#[source] BoxedError),
}

/// Serializable error which travels across the wire as plain data
///
/// Consists of a human readable message and an open bag of additional fields. Action handlers
/// return it to signal a failure and every field is forwarded verbatim to the caller, so calling
/// code can branch on application-specific metadata (e.g. a `code` field) instead of parsing
/// the message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Human readable description of the failure
    #[serde(default)]
    pub message: String,
    /// Supplemental attributes of the failure
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RemoteError {
    /// Creates a new instance with a message and no additional fields
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Attaches an additional field. Keys reserved by the reply envelope (`error`, `message`) are ignored.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();

        if !RESERVED_FIELDS.contains(&key.as_str()) {
            self.fields.insert(key, value.into());
        }

        self
    }

    /// Looks up an additional field by name
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Creates a new instance from any error, retaining its source chain under the `causes` field
    ///
    /// Due to std providing default implementations for the `From<T> where T: T` trait,
    /// we can't both implement `Error` and `From<Error>` and have to decide on one.
    pub fn from_error(e: &(dyn Error + 'static)) -> Self {
        if let Some(remote) = e.downcast_ref::<RemoteError>() {
            return remote.clone();
        }

        let mut causes: Vec<Value> = Vec::new();
        let mut source = e.source();

        while let Some(error) = source {
            causes.push(Value::String(error.to_string()));
            source = error.source();
        }

        let error = Self::new(e.to_string());

        if causes.is_empty() {
            error
        } else {
            error.with_field(CAUSES_FIELD, causes)
        }
    }

    /// Prefixes the message with the origin of the error, e.g. `[host:resource.action]`
    pub(crate) fn attributed(mut self, origin: &str) -> Self {
        self.message = format!("[{}] {}", origin, self.message);
        self
    }
}

impl Error for RemoteError {}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<BoxedError> for RemoteError {
    fn from(e: BoxedError) -> Self {
        match e.downcast::<RemoteError>() {
            Ok(remote) => *remote,
            Err(e) => Self::from_error(e.as_ref() as &(dyn Error + 'static)),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("Invalid arguments: {}", e))
    }
}
