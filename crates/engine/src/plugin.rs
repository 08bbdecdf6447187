use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use mxlimit_common::{LimitConfig, LimitError, LimitTable};
use mxlimit_identity::{normalize_ip, resolve_host, resolve_mail, IdentityKey, Namespace};
use mxlimit_rate_limit::{ConcurrencyTracker, FixedWindowLimiter, LimitSpec, RateCheck};
use mxlimit_store::{CounterStore, RedisStore};
use tracing::{debug, info, warn};

use crate::adaptive::AdaptiveSelector;
use crate::context::{Connection, COMPONENT};
use crate::generation::{ConfigGeneration, HistoryCategory};
use crate::metrics::LimitMetrics;
use crate::penalty::{Penalizer, Verdict};
use crate::reputation::ReputationSource;

/// Safety-net expiry for outbound delivery counters.
pub const OUTBOUND_TTL_SECS: u64 = 300;

/// Admission control for one server: every host event handler lives here.
///
/// The plugin is shared by all connections of a worker process. It holds no
/// per-connection state of its own; that lives on the [`Connection`]. Every
/// internal failure is recorded on the connection and the event proceeds.
pub struct LimitPlugin {
    generation: ArcSwap<ConfigGeneration>,
    next_generation: AtomicU64,
    store: Arc<dyn CounterStore>,
    windows: FixedWindowLimiter,
    concurrency: ConcurrencyTracker,
    selector: AdaptiveSelector,
    pub metrics: Arc<LimitMetrics>,
}

impl LimitPlugin {
    pub fn new(config: LimitConfig, store: Arc<dyn CounterStore>) -> anyhow::Result<Self> {
        config.validate()?;
        warn_unparseable_limits(&config);
        log_enabled(&config);
        let metrics = Arc::new(LimitMetrics::new()?);

        Ok(Self {
            generation: ArcSwap::from_pointee(ConfigGeneration::new(1, config)),
            next_generation: AtomicU64::new(2),
            windows: FixedWindowLimiter::new(Arc::clone(&store)),
            concurrency: ConcurrencyTracker::new(Arc::clone(&store)),
            store,
            selector: AdaptiveSelector::new().with_metrics(Arc::clone(&metrics)),
            metrics,
        })
    }

    /// Build a plugin backed by the Redis store named in the configuration.
    pub async fn connect_store(config: LimitConfig) -> anyhow::Result<Self> {
        let store = RedisStore::connect(&config.redis).await?;
        Self::new(config, Arc::new(store))
    }

    /// Use `source` instead of the configured result annotations when
    /// scoring connections for `category`.
    pub fn with_reputation_source(
        mut self,
        category: HistoryCategory,
        source: Arc<dyn ReputationSource>,
    ) -> Self {
        self.selector = self.selector.with_source(category, source);
        self
    }

    /// Install a new configuration generation. Demotions recorded against
    /// the previous generation do not carry over.
    pub fn reload(&self, config: LimitConfig) -> anyhow::Result<()> {
        config.validate()?;
        warn_unparseable_limits(&config);
        let id = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.generation
            .store(Arc::new(ConfigGeneration::new(id, config)));
        info!(generation = id, "limit configuration reloaded");
        Ok(())
    }

    pub fn generation(&self) -> Arc<ConfigGeneration> {
        self.generation.load_full()
    }

    // --- connection lifecycle ---------------------------------------------

    /// Connection accepted, before the greeting: count it.
    pub async fn connect_init(&self, conn: &Connection) -> Verdict {
        let generation = self.generation();
        let config = generation.config();

        if config.concurrency.enabled {
            self.concurrency_incr(conn).await;
        }
        if config.rate_conn.enabled {
            self.rate_conn_incr(&generation, conn).await;
        }
        Verdict::proceed()
    }

    /// Greeting stage: enforce the connection-level limits.
    pub async fn connect(&self, conn: &Connection) -> Verdict {
        let generation = self.generation();
        let config = generation.config();

        if config.concurrency.enabled {
            let verdict = self.check_concurrency(&generation, conn).await;
            if !verdict.is_continue() {
                return verdict;
            }
        }
        if config.rate_conn.enabled {
            let verdict = self.rate_conn_enforce(&generation, conn).await;
            if !verdict.is_continue() {
                return verdict;
            }
        }
        if config.rate_rcpt_host.enabled {
            let verdict = self.rate_rcpt_host_enforce(&generation, conn).await;
            if !verdict.is_continue() {
                return verdict;
            }
        }
        Verdict::proceed()
    }

    /// Connection closed: release its concurrency slot and cancel any
    /// pending tarpit. Store errors are recorded but never block teardown.
    pub async fn disconnect(&self, conn: &Connection) {
        conn.close();

        let key = {
            let mut notes = conn.notes();
            notes.occupancy = None;
            notes.concurrency_key.take()
        };
        let Some(key) = key else {
            return;
        };

        match self.concurrency.disconnect(&key).await {
            Ok(remaining) => debug!(conn = %conn.id(), key = %key, remaining, "concurrency released"),
            Err(err) => self.record_failure(conn, "concurrency", &err),
        }
    }

    // --- SMTP commands ----------------------------------------------------

    /// HELO, EHLO, MAIL and DATA: enforce the error budget.
    pub async fn command(&self, conn: &Connection) -> Verdict {
        let generation = self.generation();
        self.max_errors(&generation, conn).await
    }

    pub async fn unrecognized_command(&self, conn: &Connection, command: &str) -> Verdict {
        let generation = self.generation();
        let config = &generation.config().unrecognized_commands;
        if !config.enabled {
            return Verdict::proceed();
        }

        conn.results.push(COMPONENT, "unrec_cmds", command);
        let Some(max) = config.max.filter(|max| *max > 0) else {
            return Verdict::proceed();
        };

        self.metrics.check("unrecognized_commands");
        let count = conn.results.list(COMPONENT, "unrec_cmds").len() as u64;
        if count <= max {
            return Verdict::proceed();
        }
        self.violation(&generation, conn, "unrecognized_commands", true, "Too many unrecognized commands")
            .await
    }

    /// RCPT TO: error budget, recipient count and the recipient rates.
    pub async fn rcpt(&self, conn: &Connection, recipient: &str) -> Verdict {
        let generation = self.generation();
        let config = generation.config();

        let verdict = self.max_errors(&generation, conn).await;
        if !verdict.is_continue() {
            return verdict;
        }

        if config.recipients.enabled {
            let verdict = self.max_recipients(&generation, conn).await;
            if !verdict.is_continue() {
                return verdict;
            }
        }

        if config.rate_rcpt_host.enabled {
            self.rate_rcpt_host_incr(&generation, conn).await;
        }

        let sender = conn.mail_from();
        if config.rate_rcpt_sender.enabled {
            if let Some(sender) = sender.as_deref().filter(|s| !s.is_empty()) {
                let verdict = self
                    .rate_by_address(
                        &generation,
                        conn,
                        Namespace::RateRcptSender,
                        &config.rate_rcpt_sender.limits,
                        sender,
                        "sender rate limit exceeded",
                    )
                    .await;
                if !verdict.is_continue() {
                    return verdict;
                }
            }
        }
        if config.rate_rcpt_null.enabled && sender.as_deref() == Some("") {
            let verdict = self
                .rate_by_address(
                    &generation,
                    conn,
                    Namespace::RateRcptNull,
                    &config.rate_rcpt_null.limits,
                    recipient,
                    "null sender rate limit exceeded",
                )
                .await;
            if !verdict.is_continue() {
                return verdict;
            }
        }
        if config.rate_rcpt.enabled {
            let verdict = self
                .rate_by_address(
                    &generation,
                    conn,
                    Namespace::RateRcpt,
                    &config.rate_rcpt.limits,
                    recipient,
                    "recipient rate limit exceeded",
                )
                .await;
            if !verdict.is_continue() {
                return verdict;
            }
        }

        Verdict::proceed()
    }

    // --- outbound deliveries ------------------------------------------------

    /// A queued message is about to be delivered to `domain`. Over the
    /// domain's concurrency limit the delivery is deferred.
    ///
    /// When the delivery was counted, the returned slot must be handed back
    /// to [`outbound_done`](Self::outbound_done) once it finishes.
    pub async fn outbound_send(&self, domain: &str) -> OutboundAttempt {
        let generation = self.generation();
        let config = &generation.config().outbound;
        if !config.enabled {
            return OutboundAttempt::uncounted();
        }

        let domain = domain.trim().to_ascii_lowercase();
        let resolution = resolve_mail(&config.limits, &domain);
        let Some(raw) = resolution.value else {
            return OutboundAttempt::uncounted();
        };
        let limit = match LimitSpec::parse(&raw) {
            Some(spec) if spec.is_disabled() => return OutboundAttempt::uncounted(),
            Some(spec) => spec.limit,
            None => {
                self.metrics.config_errors.inc();
                warn!(domain = %domain, value = %raw, "unparseable outbound limit");
                return OutboundAttempt::uncounted();
            }
        };

        self.metrics.check("outbound");
        let key = IdentityKey::new(Namespace::Outbound, domain.clone()).to_string();
        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(err) => {
                self.metrics.store_errors.inc();
                warn!(domain = %domain, error = %err, "outbound counter failed, allowing delivery");
                return OutboundAttempt::uncounted();
            }
        };
        if let Err(err) = self.store.expire(&key, OUTBOUND_TTL_SECS).await {
            self.metrics.store_errors.inc();
            warn!(domain = %domain, error = %err, "failed to set outbound counter expiry");
        }

        if count <= 0 || count.unsigned_abs() <= limit {
            return OutboundAttempt {
                verdict: Verdict::proceed(),
                slot: Some(OutboundSlot { key, domain }),
            };
        }

        self.metrics.violation("outbound");
        if let Err(err) = self.store.incr_by(&key, -1).await {
            self.metrics.store_errors.inc();
            warn!(domain = %domain, error = %err, "failed to roll back outbound counter");
        }
        let delay = Duration::from_secs(config.delay);
        info!(domain = %domain, count, limit, delay_secs = config.delay, "outbound concurrency limit reached, deferring");
        OutboundAttempt {
            verdict: Verdict::temp_fail(format!("too many concurrent deliveries to {domain}"))
                .with_delay(delay),
            slot: None,
        }
    }

    /// A delivery counted by [`outbound_send`](Self::outbound_send) has
    /// finished (delivered, deferred or bounced).
    pub async fn outbound_done(&self, slot: OutboundSlot) {
        match self.store.incr_by(&slot.key, -1).await {
            Ok(remaining) => debug!(domain = %slot.domain, remaining, "outbound delivery released"),
            Err(err) => {
                self.metrics.store_errors.inc();
                warn!(domain = %slot.domain, error = %err, "failed to release outbound counter");
            }
        }
    }

    // --- concurrency ------------------------------------------------------

    async fn concurrency_incr(&self, conn: &Connection) {
        let ip = match normalize_ip(conn.remote_ip()) {
            Ok((ip, _)) => ip,
            Err(err) => return self.record_failure(conn, "concurrency", &err),
        };
        let key = IdentityKey::new(Namespace::Concurrency, ip).to_string();

        let registration = match self.concurrency.connect(&key).await {
            Ok(registration) => registration,
            Err(err) => return self.record_failure(conn, "concurrency", &err),
        };

        // The increment landed: from here on the slot is released on
        // disconnect, whatever else failed.
        let occupancy = registration.occupancy;
        if occupancy.repaired {
            self.metrics.counter_repairs.inc();
            conn.results
                .push(COMPONENT, "msg", format!("concurrency counter for {key} reset to 1"));
        }
        if let Some(err) = &registration.error {
            self.record_failure(conn, "concurrency", err);
        }
        let mut notes = conn.notes();
        notes.concurrency_key = Some(key);
        notes.occupancy = Some(occupancy);
    }

    async fn check_concurrency(&self, generation: &ConfigGeneration, conn: &Connection) -> Verdict {
        let Some(occupancy) = conn.notes().occupancy else {
            return Verdict::proceed();
        };
        let Some(max) = self.concurrency_limit(generation, conn) else {
            return Verdict::proceed();
        };

        self.metrics.check("concurrency");
        conn.results
            .add(COMPONENT, "concurrent", format!("{}/{}", occupancy.count, max));
        if !occupancy.exceeds(max) {
            return Verdict::proceed();
        }
        self.violation(generation, conn, "concurrency", true, "Too many concurrent connections")
            .await
    }

    /// Effective concurrency maximum: the reputation tier when a source is
    /// configured and usable, otherwise the flat `max`. `None` is unlimited.
    pub fn concurrency_limit(&self, generation: &ConfigGeneration, conn: &Connection) -> Option<u64> {
        self.selector
            .select(generation, HistoryCategory::Concurrency, conn)
            .map(|(_, limit)| limit)
            .or(generation.config().concurrency.max)
            .filter(|max| *max > 0)
    }

    // --- per-connection counts --------------------------------------------

    async fn max_errors(&self, generation: &ConfigGeneration, conn: &Connection) -> Verdict {
        let config = &generation.config().errors;
        if !config.enabled {
            return Verdict::proceed();
        }
        let Some(max) = config.max.filter(|max| *max > 0) else {
            return Verdict::proceed();
        };

        self.metrics.check("errors");
        if u64::from(conn.errors()) <= max {
            return Verdict::proceed();
        }
        self.violation(generation, conn, "errors", true, "Too many errors")
            .await
    }

    async fn max_recipients(&self, generation: &ConfigGeneration, conn: &Connection) -> Verdict {
        let Some(max) = self.recipient_limit(generation, conn) else {
            return Verdict::proceed();
        };

        self.metrics.check("recipients");
        let count = u64::from(conn.rcpt_count().total()) + 1;
        conn.results
            .add(COMPONENT, "recipients", format!("{count}/{max}"));
        if count <= max {
            return Verdict::proceed();
        }
        self.violation(generation, conn, "recipients", false, "Too many recipient attempts")
            .await
    }

    /// Effective recipient maximum. Relaying clients use `max_relaying` when
    /// set and skip reputation tiers entirely.
    pub fn recipient_limit(&self, generation: &ConfigGeneration, conn: &Connection) -> Option<u64> {
        let config = &generation.config().recipients;
        if conn.is_relaying() {
            if let Some(max) = config.max_relaying {
                return Some(max).filter(|max| *max > 0);
            }
        }
        self.selector
            .select(generation, HistoryCategory::Recipients, conn)
            .map(|(_, limit)| limit)
            .or(config.max)
            .filter(|max| *max > 0)
    }

    // --- windowed rates ---------------------------------------------------

    async fn rate_conn_incr(&self, generation: &ConfigGeneration, conn: &Connection) {
        let table = &generation.config().rate_conn.limits;
        if let Some(check) = self
            .host_window(conn, Namespace::RateConn, table, WindowOp::Hit)
            .await
        {
            conn.notes().rate_conn = Some(check);
        }
    }

    async fn rate_conn_enforce(&self, generation: &ConfigGeneration, conn: &Connection) -> Verdict {
        let Some(check) = conn.notes().rate_conn else {
            return Verdict::proceed();
        };
        if !check.is_exceeded() {
            return Verdict::proceed();
        }
        self.violation(generation, conn, "rate_conn", true, "connection rate limit exceeded")
            .await
    }

    async fn rate_rcpt_host_incr(&self, generation: &ConfigGeneration, conn: &Connection) {
        let table = &generation.config().rate_rcpt_host.limits;
        self.host_window(conn, Namespace::RateRcptHost, table, WindowOp::Hit)
            .await;
    }

    async fn rate_rcpt_host_enforce(&self, generation: &ConfigGeneration, conn: &Connection) -> Verdict {
        let table = &generation.config().rate_rcpt_host.limits;
        let check = self
            .host_window(conn, Namespace::RateRcptHost, table, WindowOp::Peek)
            .await;
        if !check.is_some_and(|check| check.is_exceeded()) {
            return Verdict::proceed();
        }
        self.violation(generation, conn, "rate_rcpt_host", true, "recipient rate limit exceeded")
            .await
    }

    async fn rate_by_address(
        &self,
        generation: &ConfigGeneration,
        conn: &Connection,
        namespace: Namespace,
        table: &LimitTable,
        address: &str,
        message: &str,
    ) -> Verdict {
        let resolution = resolve_mail(table, address);
        let Some(raw) = resolution.value else {
            return Verdict::proceed();
        };
        let key = IdentityKey::new(namespace, resolution.key);
        let Some(check) = self.window(conn, &key, &raw, WindowOp::Hit).await else {
            return Verdict::proceed();
        };
        if !check.is_exceeded() {
            return Verdict::proceed();
        }
        self.violation(generation, conn, namespace.as_str(), false, message)
            .await
    }

    async fn host_window(
        &self,
        conn: &Connection,
        namespace: Namespace,
        table: &LimitTable,
        op: WindowOp,
    ) -> Option<RateCheck> {
        let resolution = match resolve_host(table, conn.remote_ip(), conn.remote_host()) {
            Ok(resolution) => resolution,
            Err(err) => {
                self.record_failure(conn, namespace.as_str(), &err);
                return None;
            }
        };
        let raw = resolution.value?;
        let key = IdentityKey::new(namespace, resolution.key);
        self.window(conn, &key, &raw, op).await
    }

    /// Run one window operation, recording the count on success and the
    /// failure otherwise. `None` means the check failed open.
    async fn window(
        &self,
        conn: &Connection,
        key: &IdentityKey,
        raw: &str,
        op: WindowOp,
    ) -> Option<RateCheck> {
        let category = key.namespace().as_str();
        let counter = key.to_string();
        let result = match op {
            WindowOp::Hit => self.windows.hit(&counter, raw).await,
            WindowOp::Peek => self.windows.peek(&counter, raw).await,
        };

        match result {
            Ok(check) => {
                if let Some(summary) = check.summary() {
                    self.metrics.check(category);
                    conn.results.add(COMPONENT, category, summary);
                }
                Some(check)
            }
            Err(err) => {
                self.record_failure(conn, category, &err);
                None
            }
        }
    }

    // --- outcomes ---------------------------------------------------------

    /// Record a violation on the connection, then hand it to the penalizer.
    async fn violation(
        &self,
        generation: &ConfigGeneration,
        conn: &Connection,
        category: &str,
        disconnect: bool,
        message: &str,
    ) -> Verdict {
        conn.results
            .push(COMPONENT, "fail", format!("{category}.max"));
        self.metrics.violation(category);
        info!(
            conn = %conn.id(),
            ip = %conn.remote_ip(),
            category,
            disconnect,
            "limit exceeded"
        );

        let penalizer = Penalizer::new(generation.config().main.tarpit());
        if penalizer.tarpit().is_some() {
            self.metrics.tarpitted.inc();
        }
        penalizer.penalize(conn, disconnect, message).await
    }

    /// Every internal failure ends here: logged, annotated, and the check
    /// treated as passed.
    fn record_failure(&self, conn: &Connection, category: &str, err: &LimitError) {
        match err {
            LimitError::Lookup { .. } => self.metrics.lookup_errors.inc(),
            LimitError::Config(_) => self.metrics.config_errors.inc(),
            _ if err.is_store() => self.metrics.store_errors.inc(),
            _ => {}
        }
        warn!(
            conn = %conn.id(),
            category,
            error = %err,
            "limit check failed open"
        );
        conn.results
            .push(COMPONENT, "err", format!("{category}: {err}"));
    }
}

/// Result of [`LimitPlugin::outbound_send`].
#[derive(Debug)]
pub struct OutboundAttempt {
    pub verdict: Verdict,
    /// Present when the delivery was counted against its domain.
    pub slot: Option<OutboundSlot>,
}

impl OutboundAttempt {
    fn uncounted() -> Self {
        Self {
            verdict: Verdict::proceed(),
            slot: None,
        }
    }
}

/// One counted outbound delivery. Release it with
/// [`LimitPlugin::outbound_done`].
#[derive(Debug)]
#[must_use = "an outbound slot must be released with outbound_done"]
pub struct OutboundSlot {
    key: String,
    domain: String,
}

impl OutboundSlot {
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

#[derive(Debug, Clone, Copy)]
enum WindowOp {
    Hit,
    Peek,
}

fn log_enabled(config: &LimitConfig) {
    let enabled: Vec<&str> = [
        ("concurrency", config.concurrency.enabled),
        ("recipients", config.recipients.enabled),
        ("errors", config.errors.enabled),
        ("unrecognized_commands", config.unrecognized_commands.enabled),
        ("rate_conn", config.rate_conn.enabled),
        ("rate_rcpt_host", config.rate_rcpt_host.enabled),
        ("rate_rcpt_sender", config.rate_rcpt_sender.enabled),
        ("rate_rcpt_null", config.rate_rcpt_null.enabled),
        ("rate_rcpt", config.rate_rcpt.enabled),
        ("outbound", config.outbound.enabled),
    ]
    .into_iter()
    .filter_map(|(name, enabled)| enabled.then_some(name))
    .collect();

    info!(
        categories = ?enabled,
        tarpit_delay = config.main.tarpit_delay,
        "limit plugin initialized"
    );
}

/// Log every table value that will fail to parse at check time.
fn warn_unparseable_limits(config: &LimitConfig) {
    let tables = [
        ("rate_conn", &config.rate_conn.limits),
        ("rate_rcpt_host", &config.rate_rcpt_host.limits),
        ("rate_rcpt_sender", &config.rate_rcpt_sender.limits),
        ("rate_rcpt_null", &config.rate_rcpt_null.limits),
        ("rate_rcpt", &config.rate_rcpt.limits),
        ("outbound", &config.outbound.limits),
    ];
    for (category, table) in tables {
        for (key, value) in table.iter() {
            if LimitSpec::parse(value).is_none() {
                warn!(category, key, value, "unparseable limit, entry will fail open");
            }
        }
    }
}
