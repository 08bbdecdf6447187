use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use mxlimit_common::LimitResult;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::CounterStore;

/// Internal state for a single counter.
struct CounterEntry {
    value: i64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// An in-process counter store.
///
/// Mirrors the Redis semantics the engine depends on: increments create
/// missing keys at zero, `SET` clears any expiry, and an expired key is
/// indistinguishable from a missing one. Time is read from tokio's clock so
/// tests can drive expiry with a paused runtime.
///
/// Counters are only shared between clones of the same store, so this
/// backend cannot coordinate separate worker processes.
#[derive(Clone, Default)]
pub struct MemoryStore {
    counters: Arc<DashMap<String, CounterEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time to live of `key`, if it exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entry = self.counters.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Number of stored keys, including expired ones not yet cleaned up.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Remove expired counters.
    ///
    /// This should be called periodically to prevent unbounded memory growth
    /// from one-off client keys.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.counters.retain(|_key, entry| !entry.is_expired(now));

        tracing::debug!(
            remaining = self.counters.len(),
            "memory store cleanup complete"
        );
    }

    /// Spawn a Tokio task that calls [`cleanup`](Self::cleanup) every
    /// `interval`. Abort the returned handle to stop it.
    pub fn start_cleanup_task(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.cleanup();
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str) -> LimitResult<i64> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> LimitResult<i64> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                value: 0,
                expires_at: None,
            });

        let state = entry.value_mut();
        if state.is_expired(now) {
            state.value = 0;
            state.expires_at = None;
        }
        state.value = state.value.saturating_add(delta);
        Ok(state.value)
    }

    async fn get(&self, key: &str) -> LimitResult<Option<i64>> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: i64) -> LimitResult<()> {
        self.counters.insert(
            key.to_string(),
            CounterEntry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> LimitResult<()> {
        let now = Instant::now();
        if let Some(mut entry) = self.counters.get_mut(key) {
            if !entry.is_expired(now) {
                entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_creates_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.incr("k").await.unwrap(), 1);
        assert_eq!(store.incr("k").await.unwrap(), 2);
        assert_eq!(store.incr_by("k", -5).await.unwrap(), -3);
        assert_eq!(store.get("k").await.unwrap(), Some(-3));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_key_behaves_as_missing() {
        let store = MemoryStore::new();
        store.incr("window").await.unwrap();
        store.expire("window", 10).await.unwrap();
        assert_eq!(store.ttl("window"), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("window").await.unwrap(), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("window").await.unwrap(), None);
        assert_eq!(store.ttl("window"), None);

        // A fresh increment restarts at one with no expiry.
        assert_eq!(store.incr("window").await.unwrap(), 1);
        assert_eq!(store.ttl("window"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn set_clears_expiry() {
        let store = MemoryStore::new();
        store.incr("k").await.unwrap();
        store.expire("k", 30).await.unwrap();
        store.set("k", 1).await.unwrap();
        assert_eq!(store.ttl("k"), None);
        assert_eq!(store.get("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn expire_on_missing_key_is_noop() {
        let store = MemoryStore::new();
        store.expire("absent", 30).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_removes_expired_entries() {
        let store = MemoryStore::new();
        store.incr("keep").await.unwrap();
        store.incr("stale").await.unwrap();
        store.expire("stale", 5).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        store.cleanup();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("keep").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn clones_share_counters() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.incr("shared").await.unwrap();
        assert_eq!(other.incr("shared").await.unwrap(), 2);
    }
}
