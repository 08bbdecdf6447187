use std::sync::atomic::{AtomicBool, Ordering};

use mxlimit_common::LimitConfig;
use tracing::warn;

use crate::adaptive::Tiers;

/// Limit categories whose maximum can follow a reputation score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryCategory {
    Concurrency,
    Recipients,
}

impl HistoryCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Concurrency => "concurrency",
            Self::Recipients => "recipients",
        }
    }
}

/// One loaded configuration plus the runtime demotions applied to it.
///
/// The configuration itself is immutable. The only runtime change is
/// [`demote_history`](Self::demote_history), which switches a category from
/// reputation tiers to its flat maximum for the rest of this generation.
#[derive(Debug)]
pub struct ConfigGeneration {
    id: u64,
    config: LimitConfig,
    concurrency_demoted: AtomicBool,
    recipients_demoted: AtomicBool,
}

impl ConfigGeneration {
    pub fn new(id: u64, config: LimitConfig) -> Self {
        Self {
            id,
            config,
            concurrency_demoted: AtomicBool::new(false),
            recipients_demoted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    fn demoted(&self, category: HistoryCategory) -> &AtomicBool {
        match category {
            HistoryCategory::Concurrency => &self.concurrency_demoted,
            HistoryCategory::Recipients => &self.recipients_demoted,
        }
    }

    /// The configured reputation source for `category`, unless unset or
    /// demoted.
    pub fn history_source(&self, category: HistoryCategory) -> Option<&str> {
        if self.demoted(category).load(Ordering::Acquire) {
            return None;
        }
        let history = match category {
            HistoryCategory::Concurrency => &self.config.concurrency.history,
            HistoryCategory::Recipients => &self.config.recipients.history,
        };
        history.as_deref()
    }

    /// Report that the reputation source for `category` is unusable and fall
    /// back to the flat maximum. Returns true for the call that demoted it.
    pub fn demote_history(&self, category: HistoryCategory) -> bool {
        let first = !self.demoted(category).swap(true, Ordering::AcqRel);
        if first {
            warn!(
                category = category.as_str(),
                generation = self.id,
                "reputation source produced no results, using flat maximum"
            );
        }
        first
    }

    pub fn is_demoted(&self, category: HistoryCategory) -> bool {
        self.demoted(category).load(Ordering::Acquire)
    }

    /// Tier limits for `category`, with per-category defaults.
    pub fn tiers(&self, category: HistoryCategory) -> Tiers {
        let (good, bad, none) = match category {
            HistoryCategory::Concurrency => {
                let c = &self.config.concurrency;
                (c.history_good, c.history_bad, c.history_none)
            }
            HistoryCategory::Recipients => {
                let r = &self.config.recipients;
                (r.history_good, r.history_bad, r.history_none)
            }
        };
        let defaults = Tiers::defaults(category);
        Tiers {
            good: good.unwrap_or(defaults.good),
            bad: bad.unwrap_or(defaults.bad),
            none: none.unwrap_or(defaults.none),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation(yaml: &str) -> ConfigGeneration {
        ConfigGeneration::new(1, LimitConfig::from_yaml(yaml).unwrap())
    }

    #[test]
    fn test_history_source_until_demoted() {
        let gen = generation("concurrency:\n  enabled: true\n  history: karma\n");
        assert_eq!(gen.history_source(HistoryCategory::Concurrency), Some("karma"));
        assert_eq!(gen.history_source(HistoryCategory::Recipients), None);

        assert!(gen.demote_history(HistoryCategory::Concurrency));
        assert!(!gen.demote_history(HistoryCategory::Concurrency));
        assert_eq!(gen.history_source(HistoryCategory::Concurrency), None);
        assert!(!gen.is_demoted(HistoryCategory::Recipients));
    }

    #[test]
    fn test_tier_defaults_and_overrides() {
        let gen = generation("recipients:\n  history_good: 80\n");
        let concurrency = gen.tiers(HistoryCategory::Concurrency);
        assert_eq!((concurrency.bad, concurrency.none, concurrency.good), (1, 3, 5));
        let recipients = gen.tiers(HistoryCategory::Recipients);
        assert_eq!((recipients.bad, recipients.none, recipients.good), (2, 15, 80));
    }
}
