use std::fmt;
use std::str::FromStr;

use mxlimit_common::LimitError;

/// Window length used when a limit has no `/period` part.
pub const DEFAULT_TTL_SECS: u64 = 60;

/// A parsed limit: at most `limit` hits per `ttl_secs` window.
///
/// A `limit` of zero means the check is explicitly disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSpec {
    pub limit: u64,
    pub ttl_secs: u64,
}

impl LimitSpec {
    /// Parse `N` or `N/P[unit]`, where unit is one of `s`, `m`, `h`, `d`
    /// (seconds when omitted).
    ///
    /// ```
    /// use mxlimit_rate_limit::LimitSpec;
    ///
    /// assert_eq!(LimitSpec::parse("20/1h"), Some(LimitSpec { limit: 20, ttl_secs: 3600 }));
    /// assert_eq!(LimitSpec::parse("5"), Some(LimitSpec { limit: 5, ttl_secs: 60 }));
    /// assert_eq!(LimitSpec::parse("abc"), None);
    /// ```
    pub fn parse(raw: &str) -> Option<Self> {
        let (limit, period) = match raw.split_once('/') {
            Some((limit, period)) => (limit, Some(period)),
            None => (raw, None),
        };

        let limit = parse_digits(limit)?;
        let ttl_secs = match period {
            None => DEFAULT_TTL_SECS,
            Some(period) => {
                let digits_end = period
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(period.len());
                let (quantity, unit) = period.split_at(digits_end);
                let quantity = parse_digits(quantity)?;

                let mut unit_chars = unit.chars();
                let multiplier = match (unit_chars.next(), unit_chars.next()) {
                    (None, _) => 1,
                    (Some(unit), None) => unit_multiplier(unit)?,
                    (Some(_), Some(_)) => return None,
                };
                quantity.checked_mul(multiplier)?
            }
        };

        if ttl_secs == 0 {
            return None;
        }
        Some(Self { limit, ttl_secs })
    }

    pub fn is_disabled(&self) -> bool {
        self.limit == 0
    }
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn unit_multiplier(unit: char) -> Option<u64> {
    match unit {
        's' => Some(1),
        'm' => Some(60),
        'h' => Some(3_600),
        'd' => Some(86_400),
        _ => None,
    }
}

impl FromStr for LimitSpec {
    type Err = LimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| LimitError::Config(format!("unparseable limit {s:?}")))
    }
}

impl fmt::Display for LimitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.limit, self.ttl_secs)
    }
}
