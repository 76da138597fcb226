use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::{debug, info};

use super::error::{MongoDaoError, MongoResult};

const MAX_DELAY: Duration = Duration::from_secs(5);

/// How long to wait for the server to answer its first ping.
#[derive(Debug, Clone, Copy)]
pub struct ConnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl ConnectPolicy {
    /// Startup may wait for a database container to come up.
    pub const STARTUP: Self = Self {
        max_attempts: 10,
        initial_delay: Duration::from_millis(250),
    };

    /// The storage supervisor already retries reconnections with its own backoff.
    pub const RECONNECT: Self = Self {
        max_attempts: 2,
        initial_delay: Duration::from_millis(100),
    };
}

/// Build a client for `database_name` and wait until the server answers a ping.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
    policy: ConnectPolicy,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                info!(database = database_name, attempt, "session store connected");
                return Ok((client, database));
            }
            Err(source) if attempt >= max_attempts => {
                return Err(MongoDaoError::InitialPing {
                    attempts: attempt,
                    source,
                });
            }
            Err(err) => {
                debug!(
                    database = database_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "session store not reachable yet"
                );
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Ping an already connected session database.
pub async fn ping(database: &Database) -> MongoResult<()> {
    database
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|source| MongoDaoError::HealthPing { source })?;
    Ok(())
}
