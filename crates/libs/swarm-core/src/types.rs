//! Domain identifiers, closed sum types and timestamp helpers.
//!
//! Identifiers are newtypes so a `ProjectId` can never be passed where an
//! `AgentId` is expected. Enumerations that travel over the wire round-trip
//! through their canonical lowercase string forms.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Project identifier (index primary key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub i64);

impl ProjectId {
    #[inline]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for ProjectId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Agent identifier (index primary key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub i64);

impl AgentId {
    #[inline]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for AgentId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message urgency, ordered from least to most pressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Importance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    /// Whether this level passes an `urgent_only` inbox filter.
    pub fn is_urgent(self) -> bool {
        matches!(self, Self::High | Self::Urgent)
    }
}

/// Who may message an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContactPolicy {
    Open,
    #[default]
    Auto,
    ContactsOnly,
    BlockAll,
}

impl ContactPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Auto => "auto",
            Self::ContactsOnly => "contacts_only",
            Self::BlockAll => "block_all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "auto" => Some(Self::Auto),
            "contacts_only" => Some(Self::ContactsOnly),
            "block_all" => Some(Self::BlockAll),
            _ => None,
        }
    }
}

/// Delivery slot of a recipient on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl RecipientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "to" => Some(Self::To),
            "cc" => Some(Self::Cc),
            "bcc" => Some(Self::Bcc),
            _ => None,
        }
    }
}

/// State of a contact request or cross-project agent link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Pending,
    Accepted,
    Blocked,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// Timestamp storage format: UTC, microsecond precision.
///
/// Microseconds matter: `created_ts` is assigned inside the project lock and
/// must order two back-to-back sends (ties broken by message id).
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Current UTC time, truncated to the storage precision.
pub fn now_ts() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Format a timestamp for storage.
pub fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse a stored timestamp; tolerates second-precision values written by
/// older archives.
pub fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_roundtrip() {
        for level in [Importance::Low, Importance::Normal, Importance::High, Importance::Urgent] {
            assert_eq!(Importance::parse(level.as_str()), Some(level));
        }
        assert_eq!(Importance::parse("shouty"), None);
    }

    #[test]
    fn test_importance_urgent_filter() {
        assert!(!Importance::Low.is_urgent());
        assert!(!Importance::Normal.is_urgent());
        assert!(Importance::High.is_urgent());
        assert!(Importance::Urgent.is_urgent());
    }

    #[test]
    fn test_contact_policy_roundtrip() {
        for policy in [
            ContactPolicy::Open,
            ContactPolicy::Auto,
            ContactPolicy::ContactsOnly,
            ContactPolicy::BlockAll,
        ] {
            assert_eq!(ContactPolicy::parse(policy.as_str()), Some(policy));
        }
        assert_eq!(ContactPolicy::default(), ContactPolicy::Auto);
    }

    #[test]
    fn test_ts_roundtrip_preserves_micros() {
        let ts = chrono::NaiveDate::from_ymd_opt(2026, 3, 14)
            .and_then(|d| d.and_hms_micro_opt(9, 26, 53, 589793))
            .expect("valid timestamp");
        assert_eq!(parse_ts(&fmt_ts(ts)), ts);
    }

    #[test]
    fn test_ts_parse_accepts_second_precision() {
        let parsed = parse_ts("2026-03-14 09:26:53");
        assert_eq!(fmt_ts(parsed), "2026-03-14 09:26:53.000000");
    }

    #[test]
    fn test_ts_strings_order_lexicographically() {
        let a = parse_ts("2026-01-01 00:00:00.000001");
        let b = parse_ts("2026-01-01 00:00:00.000002");
        assert!(fmt_ts(a) < fmt_ts(b));
    }
}
