use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level limit configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitConfig {
    #[serde(default)]
    pub main: MainConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub recipients: RecipientsConfig,
    #[serde(default)]
    pub errors: CountLimitConfig,
    #[serde(default)]
    pub unrecognized_commands: CountLimitConfig,
    #[serde(default)]
    pub rate_conn: RateTableConfig,
    #[serde(default)]
    pub rate_rcpt_host: RateTableConfig,
    #[serde(default)]
    pub rate_rcpt_sender: RateTableConfig,
    #[serde(default)]
    pub rate_rcpt_null: RateTableConfig,
    #[serde(default)]
    pub rate_rcpt: RateTableConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MainConfig {
    /// Seconds to wait before answering a penalized event. Zero disables.
    #[serde(default)]
    pub tarpit_delay: u64,
}

impl MainConfig {
    pub fn tarpit(&self) -> Option<Duration> {
        (self.tarpit_delay > 0).then(|| Duration::from_secs(self.tarpit_delay))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub key_prefix: String,
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            timeout_ms: default_redis_timeout_ms(),
            key_prefix: String::new(),
        }
    }
}

/// Simultaneous connections per client IP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max: Option<u64>,
    #[serde(default)]
    pub history: Option<String>,
    #[serde(default)]
    pub history_good: Option<u64>,
    #[serde(default)]
    pub history_bad: Option<u64>,
    #[serde(default)]
    pub history_none: Option<u64>,
}

/// Recipients per connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipientsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max: Option<u64>,
    #[serde(default)]
    pub max_relaying: Option<u64>,
    #[serde(default)]
    pub history: Option<String>,
    #[serde(default)]
    pub history_good: Option<u64>,
    #[serde(default)]
    pub history_bad: Option<u64>,
    #[serde(default)]
    pub history_none: Option<u64>,
}

/// A flat per-connection maximum (command errors, unrecognized commands).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max: Option<u64>,
}

/// A windowed rate category backed by a hierarchical limit table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateTableConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub limits: LimitTable,
}

/// Concurrent outbound deliveries per destination domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds a delivery over the limit is deferred for.
    #[serde(default = "default_outbound_delay")]
    pub delay: u64,
    #[serde(default)]
    pub limits: LimitTable,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay: default_outbound_delay(),
            limits: LimitTable::default(),
        }
    }
}

/// Limit values keyed by IP prefix, rDNS suffix, domain suffix or full
/// address, plus an optional `default` entry.
///
/// Values are kept as raw strings (`"5"`, `"20/1h"`) and parsed per lookup.
/// YAML integers in either position are accepted and stringified, so
/// `127: 0` and `"127": "0"` are equivalent. Multi-dot prefixes such as
/// `192.0.2` are strings in YAML already; two-component prefixes like
/// `"10.1"` must be quoted to avoid float parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LimitTable(BTreeMap<String, String>);

pub const DEFAULT_ENTRY: &str = "default";

impl LimitTable {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn default_value(&self) -> Option<&str> {
        self.get(DEFAULT_ENTRY)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LimitTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
                .collect(),
        )
    }
}

impl<'de> Deserialize<'de> for LimitTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
        let mut table = BTreeMap::new();
        for (key, value) in mapping {
            let key = scalar_to_string(&key)
                .ok_or_else(|| D::Error::custom("limit table keys must be strings or numbers"))?;
            let value = scalar_to_string(&value).ok_or_else(|| {
                D::Error::custom(format!("limit for '{key}' must be a string or number"))
            })?;
            table.insert(key.to_ascii_lowercase(), value);
        }
        Ok(Self(table))
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.trim().to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Default value helpers
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}
fn default_redis_timeout_ms() -> u64 {
    500
}
fn default_outbound_delay() -> u64 {
    30
}

impl LimitConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
        let config = Self::from_yaml(&content)?;
        tracing::info!(path = %path.display(), "loaded limit configuration");
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// True when any enabled category keeps its counters in the shared store.
    pub fn needs_store(&self) -> bool {
        self.concurrency.enabled
            || self.rate_conn.enabled
            || self.rate_rcpt_host.enabled
            || self.rate_rcpt_sender.enabled
            || self.rate_rcpt_null.enabled
            || self.rate_rcpt.enabled
            || self.outbound.enabled
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.needs_store() {
            if self.redis.url.trim().is_empty() {
                anyhow::bail!("redis.url must be set when a counter-backed limit is enabled");
            }
            if self.redis.timeout_ms == 0 {
                anyhow::bail!("redis.timeout_ms must be greater than zero");
            }
        }

        if self.outbound.enabled && self.outbound.delay == 0 {
            anyhow::bail!("outbound.delay must be greater than zero");
        }

        for (name, history) in [
            ("concurrency", &self.concurrency.history),
            ("recipients", &self.recipients.history),
        ] {
            if history.as_deref().is_some_and(|h| h.trim().is_empty()) {
                anyhow::bail!("{name}.history must name a reputation source when present");
            }
        }

        Ok(())
    }
}
