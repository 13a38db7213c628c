//! Revision identifiers (`tsv:<seconds>-<slug>-<counter>`).
//!
//! The grammar is bit-exact: `^tsv:[0-9]+-[A-Za-z0-9_-]+-[0-9]+$`.
//! Parsing is hand-rolled rather than via a regex crate: manual string
//! splitting over a regex dependency for a fixed, simple grammar.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A validated revision identifier.
///
/// Ordering is total: primarily by the embedded timestamp (seconds),
/// then by counter, then by slug — see DESIGN.md for why counter
/// outranks slug as the tie-break for coinciding timestamps.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rid {
    raw: String,
    seconds: u64,
    slug: String,
    counter: u64,
}

impl Rid {
    /// Parse and validate a RID string. Returns `None` if it does not
    /// match the grammar exactly.
    pub fn parse(s: &str) -> Option<Rid> {
        let rest = s.strip_prefix("tsv:")?;
        let first_dash = rest.find('-')?;
        let (secs_str, remainder) = rest.split_at(first_dash);
        let remainder = &remainder[1..];
        let last_dash = remainder.rfind('-')?;
        let (slug, counter_str) = remainder.split_at(last_dash);
        let counter_str = &counter_str[1..];

        if secs_str.is_empty() || slug.is_empty() || counter_str.is_empty() {
            return None;
        }
        if !secs_str.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !counter_str.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !slug.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
            return None;
        }

        let seconds: u64 = secs_str.parse().ok()?;
        let counter: u64 = counter_str.parse().ok()?;

        Some(Rid { raw: s.to_string(), seconds, slug: slug.to_string(), counter })
    }

    /// Build a RID from its components.
    pub fn new(seconds: u64, slug: impl Into<String>, counter: u64) -> Rid {
        let slug = slug.into();
        let raw = format!("tsv:{}-{}-{}", seconds, slug, counter);
        Rid { raw, seconds, slug, counter }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The embedded timestamp, in whole seconds, that defines ordering.
    pub fn timestamp_seconds(&self) -> u64 {
        self.seconds
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Rid {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl std::hash::Hash for Rid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for Rid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.slug.cmp(&other.slug))
    }
}

impl TryFrom<String> for Rid {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rid::parse(&value).ok_or_else(|| format!("invalid RID: {}", value))
    }
}

impl From<Rid> for String {
    fn from(rid: Rid) -> String {
        rid.raw
    }
}

/// Tag grammar: any non-empty string that is not a valid timestamp
/// (no `T`; not exactly 10 or 13 pure decimal digits) and does not
/// begin with `tsv:`.
pub fn is_valid_tag_label(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if s.starts_with("tsv:") {
        return false;
    }
    if looks_like_timestamp(s) {
        return false;
    }
    true
}

/// Does this string look like a timestamp per the resolver's parsing
/// rules: contains `T` (ISO-8601), or is exactly 10 or 13 decimal
/// digits (Unix seconds / milliseconds)?
pub fn looks_like_timestamp(s: &str) -> bool {
    if s.contains('T') {
        return true;
    }
    let is_digits = !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    is_digits && (s.len() == 10 || s.len() == 13)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_rid() {
        let rid = Rid::parse("tsv:1732186200-users-001").unwrap();
        assert_eq!(rid.timestamp_seconds(), 1732186200);
        assert_eq!(rid.slug(), "users");
        assert_eq!(rid.counter(), 1);
    }

    #[test]
    fn parses_slug_with_internal_dashes() {
        let rid = Rid::parse("tsv:100-user-profile-007").unwrap();
        assert_eq!(rid.slug(), "user-profile");
        assert_eq!(rid.counter(), 7);
    }

    #[test]
    fn rejects_malformed_rids() {
        assert!(Rid::parse("tsv:abc-users-001").is_none());
        assert!(Rid::parse("100-users-001").is_none());
        assert!(Rid::parse("tsv:100-001").is_none());
        assert!(Rid::parse("tsv:100-users!-001").is_none());
        assert!(Rid::parse("tsv:100-users-").is_none());
        assert!(Rid::parse("tsv:-users-001").is_none());
    }

    #[test]
    fn orders_by_timestamp_then_counter_then_slug() {
        let a = Rid::new(100, "a", 0);
        let b = Rid::new(100, "a", 1);
        let c = Rid::new(200, "a", 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn round_trips_through_display() {
        let rid = Rid::new(42, "svc", 3);
        assert_eq!(rid.as_str(), "tsv:42-svc-3");
        assert_eq!(Rid::parse(rid.as_str()).unwrap(), rid);
    }

    #[test]
    fn tag_grammar_rejects_tsv_and_timestamps() {
        assert!(!is_valid_tag_label(""));
        assert!(!is_valid_tag_label("tsv:1-a-1"));
        assert!(!is_valid_tag_label("1732186200"));
        assert!(!is_valid_tag_label("1732186200123"));
        assert!(!is_valid_tag_label("2024-01-01T00:00:00Z"));
        assert!(is_valid_tag_label("stable"));
        assert!(is_valid_tag_label("v1.0.0"));
    }
}
