use std::net::{IpAddr, Ipv6Addr};

use mxlimit_common::{LimitError, LimitResult, LimitTable};
use tracing::debug;

use crate::prefix::{leading_truncations, longest_configured_prefix_match, trailing_truncations};

/// The outcome of looking an identity up in a limit table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The identity component used to build the counter key: the matched
    /// table entry, or the normalized identity itself on fallback.
    pub key: String,
    /// The raw configured limit. `None` means unlimited.
    pub value: Option<String>,
}

impl Resolution {
    fn matched(key: String, value: &str) -> Self {
        Self {
            key,
            value: Some(value.to_string()),
        }
    }

    fn fallback(key: String, table: &LimitTable) -> Self {
        Self {
            key,
            value: table.default_value().map(str::to_string),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.value.is_none()
    }
}

/// Normalize an IP literal for prefix matching.
///
/// IPv4 (and IPv4-mapped IPv6) addresses come back dotted-quad. IPv6 comes
/// back as eight lower-case hextets without leading zeros and without `::`
/// compression, so splitting on `:` always yields one component per hextet.
pub fn normalize_ip(raw: &str) -> LimitResult<(String, char)> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let addr: IpAddr = trimmed.parse().map_err(|e: std::net::AddrParseError| {
        LimitError::Lookup {
            input: raw.to_string(),
            reason: e.to_string(),
        }
    })?;

    Ok(match addr {
        IpAddr::V4(v4) => (v4.to_string(), '.'),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => (v4.to_string(), '.'),
            None => (expand_ipv6(&v6), ':'),
        },
    })
}

fn expand_ipv6(addr: &Ipv6Addr) -> String {
    addr.segments()
        .iter()
        .map(|segment| format!("{segment:x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Resolve the limit for a connecting host.
///
/// The IP is tried from its full form down to its first octet or hextet.
/// When nothing matches and a reverse DNS name is known, the name is tried
/// from its full form down to its last label. Malformed IP literals are an
/// error so they are never silently treated as unlimited.
pub fn resolve_host(table: &LimitTable, ip: &str, rdns: Option<&str>) -> LimitResult<Resolution> {
    let (normalized, separator) = normalize_ip(ip)?;

    if let Some((key, value)) =
        longest_configured_prefix_match(trailing_truncations(&normalized, separator), table)
    {
        debug!(ip = %normalized, matched = %key, "host limit matched IP prefix");
        return Ok(Resolution::matched(key, value));
    }

    if let Some(host) = rdns.map(normalize_domain).filter(|h| !h.is_empty()) {
        if let Some((key, value)) =
            longest_configured_prefix_match(leading_truncations(&host, '.'), table)
        {
            debug!(ip = %normalized, rdns = %host, matched = %key, "host limit matched rDNS suffix");
            return Ok(Resolution::matched(key, value));
        }
    }

    Ok(Resolution::fallback(normalized, table))
}

/// Resolve the limit for a mail address (or bare domain).
///
/// The full address is tried first, then its domain from the full form down
/// to the last label.
pub fn resolve_mail(table: &LimitTable, address: &str) -> Resolution {
    let address = address
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_ascii_lowercase();

    if let Some(value) = table.get(&address) {
        return Resolution::matched(address, value);
    }

    let domain = match address.rsplit_once('@') {
        Some((_, domain)) => normalize_domain(domain),
        None => normalize_domain(&address),
    };

    if !domain.is_empty() {
        if let Some((key, value)) =
            longest_configured_prefix_match(leading_truncations(&domain, '.'), table)
        {
            return Resolution::matched(key, value);
        }
    }

    Resolution::fallback(address, table)
}

fn normalize_domain(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}
