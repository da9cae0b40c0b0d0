//! Request/reply and event notification conventions on top of a publish/subscribe transport.
//!
//! A process exposes named actions and events under a resource name and other processes
//! address them through structured subjects, without needing to know where the handling
//! process lives. The only shared knowledge is the subject naming convention implemented by
//! the [`subject`] module and a [`Transport`](transport::Transport) that is able to publish,
//! subscribe with a queue group and issue single-response requests.
//!
//! The modules form a chain of dependencies from the low-level [`library`] and [`transport`],
//! over the wire format in [`envelope`] and the addressing in [`subject`], up to the
//! high-level [`Broker`](broker::Broker) which plays both the calling and the responding role.

#![deny(missing_docs)]

pub mod broker;
pub mod envelope;
pub mod error;
pub mod library;
pub mod options;
pub mod subject;
pub mod transport;

pub use broker::{ActionRegistry, Broker, EventRegistry, Subscription};
pub use error::{BrokerError, RemoteError};
pub use options::BrokerOptions;
