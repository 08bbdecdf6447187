//! Admission control for an SMTP server.
//!
//! [`LimitPlugin`] is driven by the host's session events (connect, commands,
//! recipients, disconnect, outbound deliveries) and answers each with a
//! [`Verdict`]. Counters shared across worker processes live in a
//! [`CounterStore`](mxlimit_store::CounterStore); per-session state lives on
//! the host-owned [`Connection`].
//!
//! Every internal failure fails open: the check is skipped, the failure is
//! logged and annotated on the connection, and the event proceeds.

pub mod adaptive;
pub mod context;
pub mod generation;
pub mod metrics;
pub mod penalty;
pub mod plugin;
pub mod reputation;

pub use adaptive::{AdaptiveSelector, Tier, Tiers};
pub use context::{ComponentResults, Connection, RcptCount, RcptOutcome, Results, COMPONENT};
pub use generation::{ConfigGeneration, HistoryCategory};
pub use metrics::LimitMetrics;
pub use penalty::{Action, Penalizer, Verdict};
pub use plugin::{LimitPlugin, OutboundAttempt, OutboundSlot, OUTBOUND_TTL_SECS};
pub use reputation::{HistoryLookup, ReputationSource, ResultsReputation};
