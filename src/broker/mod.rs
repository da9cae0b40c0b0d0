//! Caller and responder roles on top of a [`Transport`]
//!
//! One [`Broker`] is instantiated per process and plays any combination of the four roles:
//!
//! - [`register`](Broker::register) binds an [`ActionRegistry`] to the action subject of a resource
//! - [`call`](Broker::call) invokes an action and waits for its reply
//! - [`listen`](Broker::listen) binds an [`EventRegistry`] to the event subject of a resource
//! - [`emit`](Broker::emit) notifies listeners of a resource, fire-and-forget
//!
//! ```no_run
//! # use handy_broker::{ActionRegistry, Broker, BrokerOptions, RemoteError};
//! # use handy_broker::transport::memory::MemoryTransport;
//! # use serde_json::{json, Value};
//! # async fn run() -> Result<(), handy_broker::BrokerError> {
//! let broker = Broker::new(MemoryTransport::new(), BrokerOptions::default());
//!
//! let actions = ActionRegistry::new().action("read", |params: Value| async move {
//!     Ok::<_, RemoteError>(json!({ "action": "read", "params": params }))
//! });
//! let _subscription = broker.register("resource", actions).await?;
//!
//! let value: Value = broker.call("resource.read", json!({ "aa": "bb" })).await?;
//! # Ok(())
//! # }
//! ```

use crate::options::BrokerOptions;
use crate::subject::SubjectRouter;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

mod caller;
mod emitter;
mod listener;
mod registry;
mod responder;
mod subscription;

pub use registry::{ActionFn, ActionHandler, ActionRegistry, EventFn, EventHandler, EventRegistry};
pub use subscription::Subscription;

/// Upper bound of messages processed in parallel by a single subscription
const MAX_CONCURRENT_MESSAGES: usize = 64;

/// Subject-addressed RPC and event layer bound to one transport
pub struct Broker<T> {
    transport: Arc<T>,
    router: SubjectRouter,
    timeout: Duration,
}

impl<T> Broker<T>
where
    T: Transport + 'static,
{
    /// Creates a new broker which exclusively owns the transport
    pub fn new(transport: T, options: BrokerOptions) -> Self {
        Self::from_shared(Arc::new(transport), options)
    }

    /// Creates a new broker on a transport which may be shared with other brokers
    pub fn from_shared(transport: Arc<T>, options: BrokerOptions) -> Self {
        let router = SubjectRouter::new(&options.namespace, &options.version, options.host());

        Self {
            transport,
            router,
            timeout: options.timeout,
        }
    }

    /// Router deriving the subjects of this broker
    pub fn router(&self) -> &SubjectRouter {
        &self.router
    }

    /// Identity used to attribute errors and emitted events
    pub fn host(&self) -> &str {
        self.router.host()
    }

    /// Timeout applied by [`call`](Broker::call)
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Underlying transport
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            router: self.router.clone(),
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::error::{BrokerError, RemoteError};
    use crate::transport::memory::MemoryTransport;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const PATIENCE: Duration = Duration::from_secs(1);

    fn options() -> BrokerOptions {
        BrokerOptions::default()
            .with_namespace("default")
            .with_version("v1")
            .with_timeout(Duration::from_millis(1000))
            .with_host("test-host")
    }

    fn broker() -> Broker<MemoryTransport> {
        Broker::new(MemoryTransport::new(), options())
    }

    fn resource_actions() -> ActionRegistry {
        ActionRegistry::new()
            .action("read", |params: Value| async move {
                Ok::<_, RemoteError>(json!({ "action": "read", "params": params }))
            })
            .action("sampleerr", |_: Value| async {
                Err::<Value, _>(RemoteError::new("Sample Err"))
            })
    }

    #[tokio::test]
    async fn call_registered_actions() {
        let broker = broker();
        let _subscription = broker.register("resource", resource_actions()).await.unwrap();

        let value: Value = broker
            .call("resource.read", json!({ "aa": "bb" }))
            .await
            .unwrap();

        assert_eq!(value, json!({ "action": "read", "params": { "aa": "bb" } }));
    }

    #[tokio::test]
    async fn forward_handler_failures() {
        let broker = broker();
        let _subscription = broker.register("resource", resource_actions()).await.unwrap();

        let error = broker
            .call::<_, Value>("resource.sampleerr", ())
            .await
            .unwrap_err();

        match error {
            BrokerError::Remote(remote) => {
                assert_eq!(remote.message, "[test-host:resource.sampleerr] Sample Err");
                assert!(remote.to_string().ends_with("Sample Err"));
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn preserve_custom_error_fields() {
        let broker = broker();
        let actions = ActionRegistry::new().action("find", |_: Value| async {
            Err::<Value, _>(
                RemoteError::new("Not found")
                    .with_field("code", 404)
                    .with_field("details", json!({ "id": 7 })),
            )
        });
        let _subscription = broker.register("users", actions).await.unwrap();

        let error = broker.call::<_, Value>("users.find", ()).await.unwrap_err();

        match error {
            BrokerError::Remote(remote) => {
                assert_eq!(remote.field("code"), Some(&json!(404)));
                assert_eq!(remote.field("details"), Some(&json!({ "id": 7 })));
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn refuse_unregistered_verbs() {
        let broker = broker();
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();

        let actions = ActionRegistry::new().action("read", move |_: Value| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RemoteError>(Value::Null)
            }
        });
        let _subscription = broker.register("resource", actions).await.unwrap();

        let error = broker
            .call::<_, Value>("resource.write", ())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("is not registered"));
        assert_eq!(
            error.to_string(),
            "[test-host:resource] Service action 'resource.write' is not registered."
        );
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn time_out_without_responders() {
        let broker = Broker::new(
            MemoryTransport::new(),
            options().with_timeout(Duration::from_millis(50)),
        );

        let error = broker
            .call::<_, Value>("resource.read", ())
            .await
            .unwrap_err();

        match &error {
            BrokerError::Timeout { host, subject } => {
                assert_eq!(host, "test-host");
                assert_eq!(subject, "default.action.v1.resource");
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        assert_eq!(
            error.to_string(),
            "[test-host] default.action.v1.resource - Microservice request timeout!"
        );
        assert_eq!(broker.transport().pending_requests().await, 0);
    }

    #[tokio::test]
    async fn reject_invalid_subjects_without_io() {
        let broker = broker();
        let mut stream = broker
            .transport()
            .subscribe("default.action.v1.resource", "spy")
            .await
            .unwrap();

        let error = broker
            .call::<_, Value>("default.action.v1.resource.read", ())
            .await
            .unwrap_err();
        assert!(matches!(error, BrokerError::InvalidSubject { .. }));

        let error = broker.emit("resource", json!({})).await.unwrap_err();
        assert!(matches!(error, BrokerError::InvalidSubject { .. }));

        let nothing = timeout(Duration::from_millis(50), stream.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn ignore_replies_after_the_timeout() {
        let broker = Broker::new(
            MemoryTransport::new(),
            options().with_timeout(Duration::from_millis(50)),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let actions = ActionRegistry::new()
            .action("slow", move |_: Value| {
                let tx = tx.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    tx.send(()).ok();
                    Ok::<_, RemoteError>("late")
                }
            })
            .action("fast", |_: Value| async { Ok::<_, RemoteError>("fast") });
        let _subscription = broker.register("resource", actions).await.unwrap();

        let error = broker
            .call::<_, Value>("resource.slow", ())
            .await
            .unwrap_err();
        assert!(matches!(error, BrokerError::Timeout { .. }));

        // Wait for the handler to finish and give the late reply time to be dropped
        timeout(PATIENCE, rx.recv()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.transport().pending_requests().await, 0);

        let value: String = broker.call("resource.fast", ()).await.unwrap();
        assert_eq!(value, "fast");
    }

    #[tokio::test]
    async fn reject_unaddressable_resources() {
        let broker = broker();

        for resource in &["", "users.admin"] {
            let error = broker
                .register(resource, resource_actions())
                .await
                .unwrap_err();
            assert!(matches!(error, BrokerError::InvalidSubject { .. }));

            let error = broker
                .listen(resource, EventRegistry::new())
                .await
                .unwrap_err();
            assert!(matches!(error, BrokerError::InvalidSubject { .. }));
        }

        assert_eq!(broker.transport().subject_count().await, 0);
    }

    #[tokio::test]
    async fn call_across_versions() {
        let broker = broker();
        let foreign = Broker::from_shared(broker.transport().clone(), options().with_version("v2"));

        let actions = ActionRegistry::new().action("version", |_: Value| async {
            Ok::<_, RemoteError>("v2")
        });
        let _subscription = foreign.register("resource", actions).await.unwrap();

        let version: String = broker.call("v2.resource.version", ()).await.unwrap();
        assert_eq!(version, "v2");
    }

    #[tokio::test]
    async fn deliver_events_to_listeners() {
        let broker = broker();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let events = EventRegistry::new().event("updated", move |data: Value| {
            let tx = tx.clone();
            async move {
                tx.send(data).ok();
                Ok::<_, RemoteError>(())
            }
        });
        let _subscription = broker.listen("resource", events).await.unwrap();

        broker.emit("resource.updated", json!({ "id": 1 })).await.unwrap();

        let received = timeout(PATIENCE, rx.recv()).await.unwrap();
        assert_eq!(received, Some(json!({ "id": 1 })));
    }

    #[tokio::test]
    async fn keep_listening_after_failures() {
        let broker = broker();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let events = EventRegistry::new()
            .event("broken", |_: Value| async {
                Err::<(), _>(RemoteError::new("handler failed"))
            })
            .event("updated", move |data: Value| {
                let tx = tx.clone();
                async move {
                    tx.send(data).ok();
                    Ok::<_, RemoteError>(())
                }
            });
        let _subscription = broker.listen("resource", events).await.unwrap();

        broker.emit("resource.broken", json!({})).await.unwrap();
        broker.emit("resource.unknown", json!({})).await.unwrap();
        broker
            .transport()
            .publish("default.event.v1.resource", b"{not json")
            .await
            .unwrap();
        broker.emit("resource.updated", json!(2)).await.unwrap();

        let received = timeout(PATIENCE, rx.recv()).await.unwrap();
        assert_eq!(received, Some(json!(2)));
    }

    #[tokio::test]
    async fn balance_requests_across_responders() {
        let transport = Arc::new(MemoryTransport::new());
        let caller = Broker::from_shared(transport.clone(), options());

        let mut subscriptions = Vec::new();
        for name in &["first", "second"] {
            let responder = Broker::from_shared(transport.clone(), options().with_host(*name));
            let actions = ActionRegistry::new().action("whoami", move |_: Value| async move {
                Ok::<_, RemoteError>(name.to_string())
            });
            subscriptions.push(responder.register("resource", actions).await.unwrap());
        }

        let mut answers: Vec<String> = Vec::new();
        for _ in 0..2 {
            answers.push(caller.call("resource.whoami", ()).await.unwrap());
        }
        answers.sort();

        assert_eq!(answers, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn stop_serving_cancelled_subscriptions() {
        let broker = Broker::new(
            MemoryTransport::new(),
            options().with_timeout(Duration::from_millis(50)),
        );

        let subscription = broker.register("resource", resource_actions()).await.unwrap();
        assert_eq!(subscription.subject().as_str(), "default.action.v1.resource");
        subscription.cancel();

        let error = broker
            .call::<_, Value>("resource.read", ())
            .await
            .unwrap_err();
        assert!(matches!(error, BrokerError::Timeout { .. }));
    }
}
