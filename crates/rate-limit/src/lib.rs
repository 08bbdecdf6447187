//! Counting primitives for the mxlimit engine.
//!
//! All state lives in a shared [`CounterStore`](mxlimit_store::CounterStore),
//! so every worker process sees the same counts:
//!
//! - [`LimitSpec`] -- parses configured limits such as `5` or `20/1h`.
//!
//! - [`FixedWindowLimiter`] -- "fixed window, reset on first hit" counting.
//!   The first increment of a key starts its window by setting the key's
//!   expiry; the count resets when the key expires.
//!
//! - [`ConcurrencyTracker`] -- live connection counts with self-repair of
//!   negative counters and a safety-net expiry for lost decrements.

pub mod concurrency;
pub mod fixed_window;
pub mod limit_spec;

pub use concurrency::{ConcurrencyTracker, Occupancy, Registration, CONCURRENCY_TTL_SECS};
pub use fixed_window::{FixedWindowLimiter, RateCheck};
pub use limit_spec::LimitSpec;

#[cfg(test)]
pub(crate) mod test_support;
