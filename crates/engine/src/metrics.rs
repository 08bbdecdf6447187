use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Prometheus counters for limit checks.
pub struct LimitMetrics {
    pub registry: Registry,
    pub checks_total: IntCounterVec,
    pub violations_total: IntCounterVec,
    pub store_errors: IntCounter,
    pub config_errors: IntCounter,
    pub lookup_errors: IntCounter,
    pub counter_repairs: IntCounter,
    pub tarpitted: IntCounter,
}

impl LimitMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let checks_total = IntCounterVec::new(
            Opts::new("mxlimit_checks_total", "Limit checks evaluated"),
            &["category"],
        )?;
        let violations_total = IntCounterVec::new(
            Opts::new("mxlimit_violations_total", "Limit checks that went over the limit"),
            &["category"],
        )?;
        let store_errors = IntCounter::new(
            "mxlimit_store_errors_total",
            "Counter store failures (failed open)",
        )?;
        let config_errors = IntCounter::new(
            "mxlimit_config_errors_total",
            "Unparseable limits and unusable reputation sources",
        )?;
        let lookup_errors = IntCounter::new(
            "mxlimit_lookup_errors_total",
            "Malformed peer addresses",
        )?;
        let counter_repairs = IntCounter::new(
            "mxlimit_counter_repairs_total",
            "Concurrency counters reset after going below one",
        )?;
        let tarpitted = IntCounter::new("mxlimit_tarpitted_total", "Responses delayed by the tarpit")?;

        registry.register(Box::new(checks_total.clone()))?;
        registry.register(Box::new(violations_total.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(config_errors.clone()))?;
        registry.register(Box::new(lookup_errors.clone()))?;
        registry.register(Box::new(counter_repairs.clone()))?;
        registry.register(Box::new(tarpitted.clone()))?;

        Ok(Self {
            registry,
            checks_total,
            violations_total,
            store_errors,
            config_errors,
            lookup_errors,
            counter_repairs,
            tarpitted,
        })
    }

    pub fn check(&self, category: &str) {
        self.checks_total.with_label_values(&[category]).inc();
    }

    pub fn violation(&self, category: &str) {
        self.violations_total.with_label_values(&[category]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_count() {
        let metrics = LimitMetrics::new().unwrap();
        metrics.check("rate_conn");
        metrics.check("rate_conn");
        metrics.violation("rate_conn");
        metrics.store_errors.inc();

        assert_eq!(metrics.checks_total.with_label_values(&["rate_conn"]).get(), 2);
        assert_eq!(metrics.violations_total.with_label_values(&["rate_conn"]).get(), 1);
        assert_eq!(metrics.store_errors.get(), 1);
        assert!(!metrics.registry.gather().is_empty());
    }
}
