use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use mxlimit_rate_limit::{Occupancy, RateCheck};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Component name under which the engine writes its result annotations.
pub const COMPONENT: &str = "limit";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-session context supplied by the host server.
///
/// The host owns the connection and feeds it into every event handler. The
/// engine reads the peer identity and session counters from it and writes
/// annotations back into [`Connection::results`].
pub struct Connection {
    id: Uuid,

    /// Remote IP literal as reported by the socket.
    remote_ip: String,

    /// Reverse DNS name of the remote IP, when known.
    remote_host: Option<String>,

    /// Whether the client is authorized to relay (authenticated or trusted).
    relaying: AtomicBool,

    /// Protocol errors seen on this connection.
    errors: AtomicU32,

    /// Recipient outcomes across all transactions on this connection.
    rcpt_count: Mutex<RcptCount>,

    /// Envelope sender of the current transaction. `Some("")` is the null
    /// sender; `None` means no transaction is open.
    mail_from: Mutex<Option<String>>,

    /// Result annotations, readable by other components and by logging.
    pub results: Results,

    notes: Mutex<LimitNotes>,

    closed: CancellationToken,
}

/// Recipient outcomes on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RcptCount {
    pub accept: u32,
    pub tempfail: u32,
    pub reject: u32,
}

impl RcptCount {
    pub fn total(&self) -> u32 {
        self.accept + self.tempfail + self.reject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcptOutcome {
    Accept,
    TempFail,
    Reject,
}

/// State the engine carries between events of one connection.
#[derive(Debug, Default)]
pub(crate) struct LimitNotes {
    pub concurrency_key: Option<String>,
    pub occupancy: Option<Occupancy>,
    pub rate_conn: Option<RateCheck>,
}

impl Connection {
    pub fn new(remote_ip: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_ip: remote_ip.into(),
            remote_host: None,
            relaying: AtomicBool::new(false),
            errors: AtomicU32::new(0),
            rcpt_count: Mutex::new(RcptCount::default()),
            mail_from: Mutex::new(None),
            results: Results::default(),
            notes: Mutex::new(LimitNotes::default()),
            closed: CancellationToken::new(),
        }
    }

    pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = Some(host.into());
        self
    }

    pub fn with_relaying(self, relaying: bool) -> Self {
        self.set_relaying(relaying);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_ip(&self) -> &str {
        &self.remote_ip
    }

    pub fn remote_host(&self) -> Option<&str> {
        self.remote_host.as_deref()
    }

    pub fn is_relaying(&self) -> bool {
        self.relaying.load(Ordering::Relaxed)
    }

    pub fn set_relaying(&self, relaying: bool) {
        self.relaying.store(relaying, Ordering::Relaxed);
    }

    pub fn record_error(&self) -> u32 {
        self.errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Open a transaction with the given envelope sender. An empty sender or
    /// `<>` is the null sender.
    pub fn begin_transaction(&self, mail_from: &str) {
        let sender = mail_from
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string();
        *lock(&self.mail_from) = Some(sender);
    }

    pub fn end_transaction(&self) {
        *lock(&self.mail_from) = None;
    }

    pub fn mail_from(&self) -> Option<String> {
        lock(&self.mail_from).clone()
    }

    pub fn record_rcpt(&self, outcome: RcptOutcome) {
        let mut count = lock(&self.rcpt_count);
        match outcome {
            RcptOutcome::Accept => count.accept += 1,
            RcptOutcome::TempFail => count.tempfail += 1,
            RcptOutcome::Reject => count.reject += 1,
        }
    }

    pub fn rcpt_count(&self) -> RcptCount {
        *lock(&self.rcpt_count)
    }

    /// Mark the connection as gone. Any tarpitted response still waiting
    /// for this connection is dropped.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    pub(crate) fn notes(&self) -> MutexGuard<'_, LimitNotes> {
        lock(&self.notes)
    }
}

/// Annotations for one component: single-valued facts and appended lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentResults {
    pub facts: BTreeMap<String, String>,
    pub lists: BTreeMap<String, Vec<String>>,
}

/// Structured result annotations attached to a connection, keyed by
/// component name.
#[derive(Debug, Default)]
pub struct Results {
    inner: Mutex<BTreeMap<String, ComponentResults>>,
}

impl Results {
    /// Set a single-valued fact, replacing any previous value.
    pub fn add(&self, component: &str, key: &str, value: impl Into<String>) {
        lock(&self.inner)
            .entry(component.to_string())
            .or_default()
            .facts
            .insert(key.to_string(), value.into());
    }

    /// Append to a list such as `fail`, `err` or `msg`.
    pub fn push(&self, component: &str, key: &str, value: impl Into<String>) {
        lock(&self.inner)
            .entry(component.to_string())
            .or_default()
            .lists
            .entry(key.to_string())
            .or_default()
            .push(value.into());
    }

    pub fn fact(&self, component: &str, key: &str) -> Option<String> {
        lock(&self.inner)
            .get(component)
            .and_then(|results| results.facts.get(key).cloned())
    }

    pub fn list(&self, component: &str, key: &str) -> Vec<String> {
        lock(&self.inner)
            .get(component)
            .and_then(|results| results.lists.get(key).cloned())
            .unwrap_or_default()
    }

    pub fn has_component(&self, component: &str) -> bool {
        lock(&self.inner).contains_key(component)
    }

    pub fn get(&self, component: &str) -> Option<ComponentResults> {
        lock(&self.inner).get(component).cloned()
    }

    /// Snapshot of all annotations, for structured logging.
    pub fn to_json(&self) -> Value {
        let inner = lock(&self.inner);
        let mut out = Map::new();
        for (component, results) in inner.iter() {
            let mut entry = Map::new();
            for (key, value) in &results.facts {
                entry.insert(key.clone(), json!(value));
            }
            for (key, values) in &results.lists {
                entry.insert(key.clone(), json!(values));
            }
            out.insert(component.clone(), Value::Object(entry));
        }
        Value::Object(out)
    }
}
