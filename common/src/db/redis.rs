// Redis connection shared by every store call

use crate::config::RedisConfig;
use crate::errors::StorageError;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, instrument};

/// Multiplexed Redis connection; clones share the same socket and reconnect logic
#[derive(Clone)]
pub struct RedisConnection {
    manager: ConnectionManager,
}

impl RedisConnection {
    /// Open the connection and verify the server answers `PING`
    ///
    /// Both steps together must finish within `connect_timeout_seconds`, so a checker
    /// pointed at a dead Redis fails at startup instead of on its first store call.
    #[instrument(skip(config), fields(redis_url = %config.url))]
    pub async fn connect(config: &RedisConfig) -> Result<Self, StorageError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StorageError::ConnectionFailed(format!("Invalid Redis URL: {}", e)))?;
        let limit = Duration::from_secs(config.connect_timeout_seconds);

        let connection = timeout(limit, async {
            let manager = ConnectionManager::new(client).await.map_err(|e| {
                StorageError::ConnectionFailed(format!("Failed to connect to Redis: {}", e))
            })?;
            let connection = Self { manager };
            connection.ping().await?;
            Ok::<_, StorageError>(connection)
        })
        .await
        .map_err(|_| {
            StorageError::ConnectionFailed(format!(
                "Redis did not answer within {}s",
                config.connect_timeout_seconds
            ))
        })??;

        info!("Connected to Redis");
        Ok(connection)
    }

    /// Handle for one command or pipeline
    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.manager();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(StorageError::RedisError(format!(
                "Unexpected PING reply: {}",
                reply
            )));
        }
        Ok(())
    }
}
