use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use mxlimit_common::{LimitError, LimitResult, RedisConfig};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tracing::{debug, info};

use crate::CounterStore;

/// Redis-backed counter store.
///
/// Commands go through a [`ConnectionManager`], which reconnects on its own
/// after a dropped connection. Each command is bounded by the configured
/// timeout so a stalled server cannot hang a session.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    timeout: Duration,
    key_prefix: String,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect using the `redis` section of the limit configuration.
    pub async fn connect(config: &RedisConfig) -> LimitResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(store_error)?;
        let timeout = config.timeout();
        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| LimitError::StoreTimeout(timeout))?
            .map_err(store_error)?;

        info!(
            timeout_ms = config.timeout_ms,
            prefix = %config.key_prefix,
            "connected to redis counter store"
        );

        Ok(Self {
            connection,
            timeout,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn bounded<T, F>(&self, fut: F) -> LimitResult<T>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| LimitError::StoreTimeout(self.timeout))?
            .map_err(store_error)
    }
}

fn store_error(err: RedisError) -> LimitError {
    LimitError::Store(err.to_string())
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str) -> LimitResult<i64> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> LimitResult<i64> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        let value: i64 = self
            .bounded(async {
                redis::cmd("INCRBY")
                    .arg(&key)
                    .arg(delta)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        debug!(key = %key, delta, value, "INCRBY");
        Ok(value)
    }

    async fn get(&self, key: &str) -> LimitResult<Option<i64>> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        let raw: Option<String> = self
            .bounded(async { redis::cmd("GET").arg(&key).query_async(&mut conn).await })
            .await?;
        match raw {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| LimitError::NotInteger { key }),
        }
    }

    async fn set(&self, key: &str, value: i64) -> LimitResult<()> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        let _: () = self
            .bounded(async {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(value)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> LimitResult<()> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        let _: i64 = self
            .bounded(async {
                redis::cmd("EXPIRE")
                    .arg(&key)
                    .arg(ttl_secs)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }
}
