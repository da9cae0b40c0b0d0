//! Explicit mappings from verb names to handlers
//!
//! A resource exposes exactly the verbs added to its registry, nothing else is callable. The
//! registry is consumed when the resource is bound, so the set of verbs is fixed from then on.

use crate::error::RemoteError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Request handling method of a resource
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Processes the request data and returns the value sent back to the caller
    async fn handle(&self, data: Value) -> Result<Value, RemoteError>;
}

/// Notification handling method of a resource
///
/// Returned errors are logged by the dispatcher and never reach the emitter.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Processes the event data
    async fn handle(&self, data: Value) -> Result<(), RemoteError>;
}

/// Adapter turning an async closure with typed parameters into an [`ActionHandler`]
pub struct ActionFn<F, P, R, Fut> {
    function: F,
    marker: PhantomData<fn(P) -> (R, Fut)>,
}

impl<F, P, R, Fut> ActionFn<F, P, R, Fut> {
    /// Wraps the given closure
    pub fn new(function: F) -> Self {
        Self {
            function,
            marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, P, R, Fut> ActionHandler for ActionFn<F, P, R, Fut>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn handle(&self, data: Value) -> Result<Value, RemoteError> {
        let params: P = serde_json::from_value(data)?;
        let result = (self.function)(params).await?;

        serde_json::to_value(result)
            .map_err(|e| RemoteError::new(format!("Invalid result: {}", e)))
    }
}

/// Adapter turning an async closure with typed parameters into an [`EventHandler`]
pub struct EventFn<F, P, Fut> {
    function: F,
    marker: PhantomData<fn(P) -> Fut>,
}

impl<F, P, Fut> EventFn<F, P, Fut> {
    /// Wraps the given closure
    pub fn new(function: F) -> Self {
        Self {
            function,
            marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, P, Fut> EventHandler for EventFn<F, P, Fut>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RemoteError>> + Send + 'static,
    P: DeserializeOwned + Send + 'static,
{
    async fn handle(&self, data: Value) -> Result<(), RemoteError> {
        let params: P = serde_json::from_value(data)?;
        (self.function)(params).await
    }
}

/// Callable surface of a resource, bound with [`Broker::register`](super::Broker::register)
///
/// ```
/// use handy_broker::{ActionRegistry, RemoteError};
/// use serde_json::{json, Value};
///
/// let actions = ActionRegistry::new()
///     .action("read", |params: Value| async move {
///         Ok::<_, RemoteError>(json!({ "action": "read", "params": params }))
///     })
///     .action("sampleerr", |_: Value| async {
///         Err::<Value, _>(RemoteError::new("Sample Err"))
///     });
///
/// assert_eq!(actions.verbs(), vec!["read", "sampleerr"]);
/// ```
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposes an async closure under the given verb.
    /// The request data is deserialized into `P` before the closure is invoked.
    pub fn action<F, P, R, Fut>(self, verb: impl Into<String>, function: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.handler(verb, ActionFn::new(function))
    }

    /// Exposes a handler under the given verb, replacing any previous one
    pub fn handler(mut self, verb: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        self.handlers.insert(verb.into(), Arc::new(handler));
        self
    }

    /// Sorted list of exposed verbs
    pub fn verbs(&self) -> Vec<&str> {
        let mut verbs: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        verbs.sort_unstable();
        verbs
    }

    pub(crate) fn get(&self, verb: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(verb)
    }
}

/// Notification surface of a resource, bound with [`Broker::listen`](super::Broker::listen)
#[derive(Clone, Default)]
pub struct EventRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles the given event with an async closure.
    /// The event data is deserialized into `P` before the closure is invoked.
    pub fn event<F, P, Fut>(self, event: impl Into<String>, function: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RemoteError>> + Send + 'static,
        P: DeserializeOwned + Send + 'static,
    {
        self.handler(event, EventFn::new(function))
    }

    /// Handles the given event with a handler, replacing any previous one
    pub fn handler(mut self, event: impl Into<String>, handler: impl EventHandler + 'static) -> Self {
        self.handlers.insert(event.into(), Arc::new(handler));
        self
    }

    /// Sorted list of handled events
    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        events.sort_unstable();
        events
    }

    pub(crate) fn get(&self, event: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event)
    }
}
