//! Wire format of requests, replies and events
//!
//! All envelopes are JSON documents. Decoding happens in two stages so that callers are able
//! to tell a payload which is not JSON at all ([`EnvelopeError::Parse`]) apart from a valid JSON
//! document which does not have the expected structure ([`EnvelopeError::Invalid`]).
//!
//! Errors cross the wire as plain data: a failure reply carries the `message` of a
//! [`RemoteError`] and all its additional fields at the top level of the envelope.

use crate::error::{RemoteError, RESERVED_FIELDS};
use crate::library::helpers::is_truthy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::TryFrom;
use thiserror::Error;

const DISCRIMINANT_FIELD: &str = "error";
const MESSAGE_FIELD: &str = "message";
const DATA_FIELD: &str = "data";
const ACTION_FIELD: &str = "action";
const LEGACY_DATA_FIELD: &str = "args";

/// Rendition of an action name which is absent from a request
pub const UNDEFINED_ACTION: &str = "undefined";

/// Failures of the envelope codec
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Payload is not valid JSON
    #[error("Parse Error: Invalid json data received.")]
    Parse(#[source] serde_json::Error),
    /// Payload is valid JSON but does not match the expected envelope
    #[error("Parse Error: Unexpected envelope structure ({0}).")]
    Invalid(#[source] serde_json::Error),
    /// Value could not be serialized
    #[error("unable to encode envelope")]
    Encode(#[source] serde_json::Error),
}

/// Decodes a payload into an untyped JSON value
pub fn decode_value(payload: &[u8]) -> Result<Value, EnvelopeError> {
    serde_json::from_slice(payload).map_err(EnvelopeError::Parse)
}

/// Decodes a payload into a typed envelope without ever panicking
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, EnvelopeError> {
    let value = decode_value(payload)?;
    serde_json::from_value(value).map_err(EnvelopeError::Invalid)
}

/// Serializes an envelope into a payload
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EnvelopeError> {
    serde_json::to_vec(value).map_err(EnvelopeError::Encode)
}

/// Invocation of an action
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Name of the action within the addressed resource
    pub action: String,
    /// Single structured parameter passed to the action
    #[serde(default, alias = "args")]
    pub data: Value,
}

impl RequestEnvelope {
    /// Creates a new instance from raw parts
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }

    /// Interprets any JSON document as a request
    ///
    /// Never fails: an absent `action` becomes [`UNDEFINED_ACTION`] and non-string actions are
    /// rendered as JSON text, so they can be reported as unknown verbs instead of as parse errors.
    pub fn from_value(mut value: Value) -> Self {
        let action = match value.get_mut(ACTION_FIELD).map(Value::take) {
            Some(Value::String(action)) => action,
            Some(Value::Null) | None => UNDEFINED_ACTION.to_string(),
            Some(other) => other.to_string(),
        };

        let data = value
            .get_mut(DATA_FIELD)
            .map(Value::take)
            .filter(|data| !data.is_null())
            .or_else(|| value.get_mut(LEGACY_DATA_FIELD).map(Value::take))
            .unwrap_or(Value::Null);

        Self { action, data }
    }
}

/// Outcome of an action, discriminated solely by the `error` field
///
/// - success: `{"error": 0, "data": ...}`
/// - failure: `{"error": 1, "message": "...", ...additional fields}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub enum ReplyEnvelope {
    /// Value returned by the action
    Success(Value),
    /// Error raised by the action or the dispatcher
    Failure(RemoteError),
}

impl ReplyEnvelope {
    /// Converts the envelope into the result it represents
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self {
            Self::Success(data) => Ok(data),
            Self::Failure(error) => Err(error),
        }
    }
}

impl From<Result<Value, RemoteError>> for ReplyEnvelope {
    fn from(result: Result<Value, RemoteError>) -> Self {
        match result {
            Ok(data) => Self::Success(data),
            Err(error) => Self::Failure(error),
        }
    }
}

/// Reply object without the mandatory `error` discriminant
#[derive(Error, Debug)]
#[error("reply envelope lacks the `error` discriminant")]
pub struct MissingDiscriminant;

impl TryFrom<Map<String, Value>> for ReplyEnvelope {
    type Error = MissingDiscriminant;

    fn try_from(mut map: Map<String, Value>) -> Result<Self, Self::Error> {
        let discriminant = map.remove(DISCRIMINANT_FIELD).ok_or(MissingDiscriminant)?;

        if !is_truthy(&discriminant) {
            let data = map.remove(DATA_FIELD).unwrap_or(Value::Null);
            return Ok(Self::Success(data));
        }

        let message = match map.remove(MESSAGE_FIELD) {
            Some(Value::String(message)) => message,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        Ok(Self::Failure(RemoteError {
            message,
            fields: map,
        }))
    }
}

impl From<ReplyEnvelope> for Map<String, Value> {
    fn from(reply: ReplyEnvelope) -> Self {
        let mut map = Map::new();

        match reply {
            ReplyEnvelope::Success(data) => {
                map.insert(DISCRIMINANT_FIELD.into(), Value::from(0));
                map.insert(DATA_FIELD.into(), data);
            }
            ReplyEnvelope::Failure(error) => {
                for (key, value) in error.fields {
                    if !RESERVED_FIELDS.contains(&key.as_str()) {
                        map.insert(key, value);
                    }
                }

                map.insert(DISCRIMINANT_FIELD.into(), Value::from(1));
                map.insert(MESSAGE_FIELD.into(), Value::String(error.message));
            }
        }

        map
    }
}

/// Notification about something that happened within a resource
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Name of the event within the addressed resource
    pub event: String,
    /// Identity of the emitting host, used for diagnostics only
    #[serde(default)]
    pub caller: String,
    /// Payload passed to the event handler
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    /// Creates a new instance from raw parts
    pub fn new(event: impl Into<String>, caller: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            caller: caller.into(),
            data,
        }
    }
}
