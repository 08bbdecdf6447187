use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::{Connection, COMPONENT};
use crate::generation::{ConfigGeneration, HistoryCategory};
use crate::metrics::LimitMetrics;
use crate::reputation::{HistoryLookup, ReputationSource, ResultsReputation};

/// Reputation tier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Bad,
    Neutral,
    Good,
}

impl Tier {
    pub fn from_score(score: f64) -> Self {
        if score < 0.0 {
            Self::Bad
        } else if score > 0.0 {
            Self::Good
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bad => "bad",
            Self::Neutral => "none",
            Self::Good => "good",
        }
    }
}

/// Limits per reputation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tiers {
    pub good: u64,
    pub bad: u64,
    pub none: u64,
}

impl Tiers {
    pub fn defaults(category: HistoryCategory) -> Self {
        match category {
            HistoryCategory::Concurrency => Self {
                good: 5,
                bad: 1,
                none: 3,
            },
            HistoryCategory::Recipients => Self {
                good: 50,
                bad: 2,
                none: 15,
            },
        }
    }

    pub fn limit(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Bad => self.bad,
            Tier::Neutral => self.none,
            Tier::Good => self.good,
        }
    }
}

/// Picks a category maximum from the connection's reputation tier.
///
/// Sources are looked up by the name configured in the category's `history`
/// setting. By default that name refers to another component's result
/// annotations ([`ResultsReputation`]); hosts can inject their own source per
/// category instead.
#[derive(Default, Clone)]
pub struct AdaptiveSelector {
    sources: HashMap<HistoryCategory, Arc<dyn ReputationSource>>,
    metrics: Option<Arc<LimitMetrics>>,
}

impl AdaptiveSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, category: HistoryCategory, source: Arc<dyn ReputationSource>) -> Self {
        self.sources.insert(category, source);
        self
    }

    /// Count demoted sources as configuration errors.
    pub fn with_metrics(mut self, metrics: Arc<LimitMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The tier and its limit for `conn`, or `None` when the category has no
    /// usable reputation source and the flat maximum applies.
    ///
    /// A source that left no results at all demotes the category for the
    /// rest of the configuration generation.
    pub fn select(
        &self,
        generation: &ConfigGeneration,
        category: HistoryCategory,
        conn: &Connection,
    ) -> Option<(Tier, u64)> {
        let name = generation.history_source(category)?;
        let lookup = match self.sources.get(&category) {
            Some(source) => source.lookup(conn),
            None => ResultsReputation::new(name).lookup(conn),
        };

        let tier = match lookup {
            HistoryLookup::Missing => {
                conn.results.push(
                    COMPONENT,
                    "err",
                    format!("{}: no results from history source {name}", category.as_str()),
                );
                if generation.demote_history(category) {
                    if let Some(metrics) = &self.metrics {
                        metrics.config_errors.inc();
                    }
                }
                return None;
            }
            HistoryLookup::Unparseable(raw) => {
                warn!(
                    category = category.as_str(),
                    source = name,
                    value = %raw,
                    "non-numeric reputation score, treating as neutral"
                );
                conn.results.push(
                    COMPONENT,
                    "err",
                    format!("{}: non-numeric score from {name}", category.as_str()),
                );
                Tier::Neutral
            }
            HistoryLookup::Score(score) => Tier::from_score(score),
        };

        let limit = generation.tiers(category).limit(tier);
        debug!(
            category = category.as_str(),
            tier = tier.as_str(),
            limit,
            "reputation tier selected"
        );
        Some((tier, limit))
    }
}
