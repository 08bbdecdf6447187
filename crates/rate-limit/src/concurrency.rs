use std::sync::Arc;

use mxlimit_common::{LimitError, LimitResult};
use mxlimit_store::CounterStore;
use tracing::{debug, warn};

/// Safety-net expiry for connection counters, refreshed on every connect so
/// a counter whose decrements were lost eventually disappears.
pub const CONCURRENCY_TTL_SECS: u64 = 120;

/// Connection count observed when a connection was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    /// Simultaneous connections including this one. Never below one.
    pub count: i64,
    /// The stored counter was below one and has been reset.
    pub repaired: bool,
}

impl Occupancy {
    /// True when `count` is over `max`. A `max` of zero is unlimited.
    pub fn exceeds(&self, max: u64) -> bool {
        max > 0 && self.count.unsigned_abs() > max
    }
}

/// A counted connection. The slot must be released with
/// [`ConcurrencyTracker::disconnect`] even when `error` is set.
#[derive(Debug)]
pub struct Registration {
    pub occupancy: Occupancy,
    /// A follow-up command failed after the increment succeeded.
    pub error: Option<LimitError>,
}

/// Tracks live connections per identity in the counter store.
#[derive(Clone)]
pub struct ConcurrencyTracker {
    store: Arc<dyn CounterStore>,
    ttl_secs: u64,
}

impl ConcurrencyTracker {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            ttl_secs: CONCURRENCY_TTL_SECS,
        }
    }

    /// Register a new connection for `key`.
    ///
    /// Counts below one come from lost decrements or a store restart between
    /// a connect and its disconnect; they are reset to one so a negative
    /// count never reaches the admission check.
    ///
    /// Only a failed `INCR` is an error. Once the increment has landed the
    /// caller owns a slot and must release it, so a failed `SET` or `EXPIRE`
    /// is reported in [`Registration::error`] instead.
    pub async fn connect(&self, key: &str) -> LimitResult<Registration> {
        let count = self.store.incr(key).await?;
        let mut registration = Registration {
            occupancy: Occupancy {
                count,
                repaired: false,
            },
            error: None,
        };

        if count < 1 {
            warn!(key, count, "concurrency counter corrupted, resetting to 1");
            registration.occupancy.count = 1;
            match self.store.set(key, 1).await {
                Ok(()) => registration.occupancy.repaired = true,
                Err(err) => registration.error = Some(err),
            }
        }

        if let Err(err) = self.store.expire(key, self.ttl_secs).await {
            warn!(key, error = %err, "failed to refresh concurrency counter expiry");
            registration.error.get_or_insert(err);
        }
        debug!(key, count = registration.occupancy.count, "connection registered");

        Ok(registration)
    }

    /// Release a connection for `key`, returning the remaining count.
    pub async fn disconnect(&self, key: &str) -> LimitResult<i64> {
        let remaining = self.store.incr_by(key, -1).await?;
        debug!(key, remaining, "connection released");
        Ok(remaining)
    }
}
