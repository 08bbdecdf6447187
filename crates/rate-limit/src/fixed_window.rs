use std::sync::Arc;

use mxlimit_common::{LimitError, LimitResult};
use mxlimit_store::CounterStore;
use tracing::debug;

use crate::limit_spec::LimitSpec;

/// Outcome of a windowed rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCheck {
    /// The configured limit is `0`; the store was not touched.
    Disabled,
    Within { count: i64, limit: u64 },
    Exceeded { count: i64, limit: u64 },
}

impl RateCheck {
    fn evaluate(count: i64, limit: u64) -> Self {
        if count > 0 && count.unsigned_abs() > limit {
            Self::Exceeded { count, limit }
        } else {
            Self::Within { count, limit }
        }
    }

    pub fn is_exceeded(&self) -> bool {
        matches!(self, Self::Exceeded { .. })
    }

    /// `count/limit`, for result annotations.
    pub fn summary(&self) -> Option<String> {
        match self {
            Self::Disabled => None,
            Self::Within { count, limit } | Self::Exceeded { count, limit } => {
                Some(format!("{count}/{limit}"))
            }
        }
    }
}

/// Fixed-window counter with the window starting at the first hit.
///
/// `INCR` the key; when the result is `1` this hit opened a new window, so
/// the key gets an expiry of one window length. The store serializes `INCR`,
/// so exactly one caller observes `1` and sets the expiry. If the process
/// dies between the two commands the key is left without an expiry; that
/// leak is accepted and left to operational monitoring.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Count one hit against `key` and report whether it went over the limit
    /// described by `raw`.
    pub async fn hit(&self, key: &str, raw: &str) -> LimitResult<RateCheck> {
        let spec = parse_limit(raw)?;
        if spec.is_disabled() {
            return Ok(RateCheck::Disabled);
        }

        let count = self.store.incr(key).await?;
        if count == 1 {
            self.store.expire(key, spec.ttl_secs).await?;
        }

        let check = RateCheck::evaluate(count, spec.limit);
        debug!(key, count, limit = spec.limit, ttl = spec.ttl_secs, "rate window hit");
        Ok(check)
    }

    /// Compare the current count of `key` against `raw` without counting a
    /// hit. A missing key counts as zero.
    pub async fn peek(&self, key: &str, raw: &str) -> LimitResult<RateCheck> {
        let spec = parse_limit(raw)?;
        if spec.is_disabled() {
            return Ok(RateCheck::Disabled);
        }

        let count = self.store.get(key).await?.unwrap_or(0);
        Ok(RateCheck::evaluate(count, spec.limit))
    }
}

fn parse_limit(raw: &str) -> LimitResult<LimitSpec> {
    LimitSpec::parse(raw).ok_or_else(|| LimitError::Config(format!("unparseable limit {raw:?}")))
}
