//! Construction-time configuration of a [`Broker`](crate::broker::Broker)
//!
//! The struct can be used on its own through [`Default`] or flattened into a command line
//! interface, in which case every value may also be supplied through the environment.

use crate::library::helpers::{local_hostname, parse_millis};
use std::time::Duration;
use structopt::StructOpt;

/// Default value of the version segment in subjects
pub const DEFAULT_VERSION: &str = "v1";

/// Default top-level subject isolation domain
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default timeout for action calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Options shared by all roles of a broker
#[derive(Debug, Clone, StructOpt)]
pub struct BrokerOptions {
    /// Top-level subject namespace used for isolation between deployments
    #[structopt(
        long,
        env = "BROKER_NAMESPACE",
        default_value = "default",
        value_name = "namespace"
    )]
    pub namespace: String,

    /// Version segment of subjects exposed and called by this broker
    #[structopt(
        long = "scheme-version",
        env = "BROKER_VERSION",
        default_value = "v1",
        value_name = "version"
    )]
    pub version: String,

    /// Default timeout for action calls in milliseconds
    #[structopt(
        long,
        env = "BROKER_TIMEOUT",
        default_value = "10000",
        parse(try_from_str = parse_millis),
        value_name = "ms"
    )]
    pub timeout: Duration,

    /// Identity used to attribute errors and emitted events.
    /// Defaults to the hostname of the machine.
    #[structopt(long, env = "HOSTNAME", value_name = "host")]
    pub host: Option<String>,
}

impl BrokerOptions {
    /// Resolves the configured host or the local hostname if none was provided
    pub fn host(&self) -> String {
        match &self.host {
            Some(host) if !host.is_empty() => host.clone(),
            _ => local_hostname(),
        }
    }

    /// Replaces the default call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the subject namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Replaces the subject version segment
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Pins the host identity instead of using the local hostname
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            version: DEFAULT_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            host: None,
        }
    }
}
