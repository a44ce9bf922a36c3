//! Page-view event model and its canonical JSON encoding.
//!
//! The wire encoding is a single JSON object with snake_case keys in
//! declaration order. `user_agent`, `ip_address` and `region` are omitted
//! when empty; the timestamp is RFC3339 in UTC. Events are immutable once
//! emitted by the generator.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Region a synthetic user is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    EU,
    US,
    APAC,
    LATAM,
}

impl Region {
    /// All regions, in the order the generator samples them.
    pub const ALL: [Region; 4] = [Region::EU, Region::US, Region::APAC, Region::LATAM];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::EU => "EU",
            Region::US => "US",
            Region::APAC => "APAC",
            Region::LATAM => "LATAM",
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single synthetic page view.
///
/// `view_duration` is signed: defect injection may produce negative
/// durations to exercise downstream validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageViewEvent {
    pub page_id: String,
    pub user_id: String,
    #[serde(rename = "view_duration_ms")]
    pub view_duration: i32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    pub is_bounce: bool,
}

impl PageViewEvent {
    /// Canonical JSON encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// An event plus generator metadata.
///
/// `is_invalid` marks injected defects so tests can count them; only the
/// event itself is shipped to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub event: PageViewEvent,
    pub is_invalid: bool,
}
