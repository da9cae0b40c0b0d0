use anyhow::{Context, Result};
use handy_broker::transport::redis::RedisTransport;
use handy_broker::{Broker, BrokerOptions, EventRegistry, RemoteError};
use log::info;
use serde_json::Value;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(about = "Subject-addressed RPC and events on top of redis streams.")]
struct MainOptions {
    /// Redis database server URL
    #[structopt(
        long,
        env = "REDIS",
        default_value = "redis://127.0.0.1/",
        value_name = "url"
    )]
    redis: String,

    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(long, env = "RUST_LOG", default_value = "warn", value_name = "level")]
    log: String,

    #[structopt(flatten)]
    broker: BrokerOptions,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Invokes an action and prints the value it returned
    Call {
        /// Action to invoke, `resource.action` or `version.resource.action`
        subject: String,
        /// Parameters passed to the action as JSON
        #[structopt(default_value = "null", parse(try_from_str = serde_json::from_str))]
        params: Value,
    },
    /// Notifies the listeners of a resource
    Emit {
        /// Event to emit, `resource.event` or `version.resource.event`
        subject: String,
        /// Data passed to the event handlers as JSON
        #[structopt(default_value = "{}", parse(try_from_str = serde_json::from_str))]
        params: Value,
    },
    /// Logs the events of a resource until interrupted
    Listen {
        /// Resource to listen on
        resource: String,
        /// Events to handle
        #[structopt(required = true)]
        events: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = MainOptions::from_args();

    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&options.log)
        .init();

    let transport = RedisTransport::new(&options.redis)
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid redis url")?;
    let broker = Broker::new(transport, options.broker);

    match options.cmd {
        Command::Call { subject, params } => {
            let value: Value = broker.call(&subject, params).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Emit { subject, params } => broker.emit(&subject, params).await?,
        Command::Listen { resource, events } => {
            let registry = events.iter().fold(EventRegistry::new(), |registry, event| {
                let name = format!("{}.{}", resource, event);
                registry.event(event.as_str(), move |data: Value| {
                    info!("{} {}", name, data);
                    async { Ok::<_, RemoteError>(()) }
                })
            });

            let subscription = broker.listen(&resource, registry).await?;
            info!("Listening on {}", subscription.subject());

            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
                _ = subscription.closed() => info!("Subscription ended by the transport"),
            }
        }
    }

    Ok(())
}
