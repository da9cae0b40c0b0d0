use futures::lock::Mutex;
use log::{trace, warn};
use redis::aio::{Connection, MultiplexedConnection};
use redis::{Client, RedisResult};
use std::time::Duration;
use tokio::time::{sleep, timeout};

const RETRY_INTERVAL: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Factory for redis connections
///
/// Hands out clones of one lazily established multiplexed connection for non-blocking
/// commands and dedicated connections for blocking commands like `BLPOP` or `XREADGROUP`.
/// Connecting is retried until it succeeds, a warning is logged on the first failure.
pub struct RedisFactory {
    client: Client,
    shared: Mutex<Option<MultiplexedConnection>>,
}

impl RedisFactory {
    /// Creates a new factory opening connections to the given URL
    pub fn open(url: &str) -> RedisResult<Self> {
        Ok(Self {
            client: Client::open(url)?,
            shared: Mutex::new(None),
        })
    }

    /// Retrieves the shared connection or establishes it if it doesn't exist
    pub async fn multiplexed(&self) -> MultiplexedConnection {
        let mut shared = self.shared.lock().await;

        if let Some(con) = &*shared {
            trace!("Reusing existing shared connection!");
            return con.clone();
        }

        let con = self.connect_shared().await;
        *shared = Some(con.clone());
        con
    }

    /// Drops the shared connection so the next caller establishes a new one
    pub async fn invalidate(&self) {
        *self.shared.lock().await = None;
    }

    /// Creates a new standalone connection which may be used for blocking commands
    pub async fn owned(&self) -> Connection {
        let mut warn = true;

        loop {
            match timeout(CONNECT_TIMEOUT, self.client.get_async_connection()).await {
                Ok(Ok(connection)) => return connection,
                Ok(Err(e)) => {
                    if warn {
                        warn = false;
                        warn!("Unable to connect to redis server! ({})", e)
                    }
                }
                Err(e) => {
                    if warn {
                        warn = false;
                        warn!("Timed out while connecting to redis! ({})", e)
                    }
                }
            }

            sleep(RETRY_INTERVAL).await;
        }
    }

    async fn connect_shared(&self) -> MultiplexedConnection {
        let mut warn = true;

        loop {
            match timeout(
                CONNECT_TIMEOUT,
                self.client.get_multiplexed_tokio_connection(),
            )
            .await
            {
                Ok(Ok(connection)) => return connection,
                Ok(Err(e)) => {
                    if warn {
                        warn = false;
                        warn!("Unable to connect to redis server! ({})", e)
                    }
                }
                Err(e) => {
                    if warn {
                        warn = false;
                        warn!("Timed out while connecting to redis! ({})", e)
                    }
                }
            }

            sleep(RETRY_INTERVAL).await;
        }
    }
}
