//! Identity keys and hierarchical limit-table resolution.
//!
//! Every counter the engine maintains belongs to an [`IdentityKey`]: a
//! namespace (the limit category) plus the resolved identity, such as an IP
//! prefix or a sender domain. Resolution walks from the most specific form of
//! an identity toward the least specific one and takes the first entry
//! configured in the category's [`LimitTable`](mxlimit_common::LimitTable):
//!
//! - network addresses drop trailing octets or hextets, then fall back to the
//!   reverse DNS name with leading labels dropped;
//! - mail addresses try the full address, then the domain with leading labels
//!   dropped.
//!
//! When nothing matches, the table's `default` entry applies, or the identity
//! is unlimited.

pub mod prefix;
pub mod resolver;

use std::fmt;

pub use crate::prefix::{leading_truncations, longest_configured_prefix_match, trailing_truncations};
pub use crate::resolver::{normalize_ip, resolve_host, resolve_mail, Resolution};

/// Counter namespaces, one per limit category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Concurrency,
    RateConn,
    RateRcptHost,
    RateRcptSender,
    RateRcptNull,
    RateRcpt,
    Outbound,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Concurrency => "concurrency",
            Self::RateConn => "rate_conn",
            Self::RateRcptHost => "rate_rcpt_host",
            Self::RateRcptSender => "rate_rcpt_sender",
            Self::RateRcptNull => "rate_rcpt_null",
            Self::RateRcpt => "rate_rcpt",
            Self::Outbound => "outbound-rate",
        }
    }

    fn separator(self) -> char {
        match self {
            Self::Concurrency => '|',
            _ => ':',
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespaced counter key such as `concurrency|203.0.113.4` or
/// `rate_rcpt_sender:example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    namespace: Namespace,
    value: String,
}

impl IdentityKey {
    pub fn new(namespace: Namespace, value: impl Into<String>) -> Self {
        Self {
            namespace,
            value: value.into(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.namespace.as_str(),
            self.namespace.separator(),
            self.value
        )
    }
}
