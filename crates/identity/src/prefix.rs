//! Progressive truncation over delimited identities.

use mxlimit_common::LimitTable;

/// Candidates formed by dropping components from the end:
/// `192.0.2.55` yields `192.0.2.55`, `192.0.2`, `192.0`, `192`.
pub fn trailing_truncations(value: &str, separator: char) -> Vec<String> {
    let parts: Vec<&str> = value.split(separator).collect();
    (1..=parts.len())
        .rev()
        .map(|n| parts[..n].join(&separator.to_string()))
        .collect()
}

/// Candidates formed by dropping components from the start:
/// `mx.mail.example.com` yields `mx.mail.example.com`, `mail.example.com`,
/// `example.com`, `com`.
pub fn leading_truncations(value: &str, separator: char) -> Vec<String> {
    let parts: Vec<&str> = value.split(separator).collect();
    (0..parts.len())
        .map(|skip| parts[skip..].join(&separator.to_string()))
        .collect()
}

/// Return the first candidate present in `table`, with its configured value.
///
/// Candidates must be ordered most specific first. A configured value of
/// `"0"` is a match like any other.
pub fn longest_configured_prefix_match<'t, I>(
    candidates: I,
    table: &'t LimitTable,
) -> Option<(String, &'t str)>
where
    I: IntoIterator<Item = String>,
{
    candidates
        .into_iter()
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| table.get(&candidate).map(|value| (candidate, value)))
}
