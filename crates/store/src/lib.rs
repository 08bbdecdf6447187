//! Counter store contract and implementations.
//!
//! The limit engine keeps every counter in a store shared by all worker
//! processes. It relies on a deliberately small set of atomic operations,
//! captured by the [`CounterStore`] trait:
//!
//! - `INCR` / `INCRBY` -- atomic increment, creating the key at zero.
//! - `GET` / `SET` -- read and overwrite.
//! - `EXPIRE` -- per-key time to live.
//!
//! Two implementations are provided:
//!
//! - [`RedisStore`] -- the production backend, shared across processes.
//! - [`MemoryStore`] -- an in-process [`DashMap`](dashmap::DashMap) backend
//!   for single-process deployments and tests.
//!
//! Every operation may fail. Callers decide how to degrade; the engine
//! treats all store failures as fail-open.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use mxlimit_common::LimitResult;

pub use crate::memory::MemoryStore;
pub use crate::redis_store::RedisStore;

/// Atomic counter operations against a shared key-value service.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one and return the new value. A missing key is
    /// created at zero first.
    async fn incr(&self, key: &str) -> LimitResult<i64>;

    /// Increment `key` by `delta` (which may be negative).
    async fn incr_by(&self, key: &str, delta: i64) -> LimitResult<i64>;

    async fn get(&self, key: &str) -> LimitResult<Option<i64>>;

    async fn set(&self, key: &str, value: i64) -> LimitResult<()>;

    /// Expire `key` after `ttl_secs` seconds, replacing any existing expiry.
    async fn expire(&self, key: &str, ttl_secs: u64) -> LimitResult<()>;
}
