use std::sync::Mutex;

use async_trait::async_trait;
use mxlimit_common::{LimitError, LimitResult};
use mxlimit_store::{CounterStore, MemoryStore};

/// Wraps a [`MemoryStore`] and records every command issued.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    pub log: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.split(' ').next() == Some(command))
            .count()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl CounterStore for RecordingStore {
    async fn incr(&self, key: &str) -> LimitResult<i64> {
        self.record(format!("INCR {key}"));
        self.inner.incr(key).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> LimitResult<i64> {
        self.record(format!("INCRBY {key} {delta}"));
        self.inner.incr_by(key, delta).await
    }

    async fn get(&self, key: &str) -> LimitResult<Option<i64>> {
        self.record(format!("GET {key}"));
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: i64) -> LimitResult<()> {
        self.record(format!("SET {key} {value}"));
        self.inner.set(key, value).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> LimitResult<()> {
        self.record(format!("EXPIRE {key} {ttl_secs}"));
        self.inner.expire(key, ttl_secs).await
    }
}

/// A store whose every command fails.
pub struct DownStore;

#[async_trait]
impl CounterStore for DownStore {
    async fn incr(&self, _key: &str) -> LimitResult<i64> {
        Err(LimitError::Store("connection refused".into()))
    }

    async fn incr_by(&self, _key: &str, _delta: i64) -> LimitResult<i64> {
        Err(LimitError::Store("connection refused".into()))
    }

    async fn get(&self, _key: &str) -> LimitResult<Option<i64>> {
        Err(LimitError::Store("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: i64) -> LimitResult<()> {
        Err(LimitError::Store("connection refused".into()))
    }

    async fn expire(&self, _key: &str, _ttl_secs: u64) -> LimitResult<()> {
        Err(LimitError::Store("connection refused".into()))
    }
}

/// Wraps a [`MemoryStore`], failing one kind of command.
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    fail_set: bool,
    fail_expire: bool,
}

impl FailingStore {
    pub fn set() -> Self {
        Self {
            fail_set: true,
            ..Self::default()
        }
    }

    pub fn expire() -> Self {
        Self {
            fail_expire: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl CounterStore for FailingStore {
    async fn incr(&self, key: &str) -> LimitResult<i64> {
        self.inner.incr(key).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> LimitResult<i64> {
        self.inner.incr_by(key, delta).await
    }

    async fn get(&self, key: &str) -> LimitResult<Option<i64>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: i64) -> LimitResult<()> {
        if self.fail_set {
            return Err(LimitError::Store("READONLY".into()));
        }
        self.inner.set(key, value).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> LimitResult<()> {
        if self.fail_expire {
            return Err(LimitError::StoreTimeout(std::time::Duration::from_millis(500)));
        }
        self.inner.expire(key, ttl_secs).await
    }
}
