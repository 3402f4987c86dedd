pub mod codec;
pub mod dedup;
pub mod resolver;

pub use codec::{EventHash, StatusEvent};
pub use dedup::DedupCache;
pub use resolver::{GroupStatusTable, StatusAggregator, UserGroupSet};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert status of a group, and of the light itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", from = "String")]
pub enum Status {
    Normal,
    Warning,
    Alert,
    AlertAcked,
    Error,
    Off,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Alert,
        Status::AlertAcked,
        Status::Warning,
        Status::Error,
        Status::Normal,
        Status::Off,
    ];

    /// Parse a wire value. Unknown values (and the legacy `default`) become `Normal`
    /// so the light always lands in a defined state.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "warning" => Status::Warning,
            "alert" => Status::Alert,
            "alert-acked" | "alert_acked" => Status::AlertAcked,
            "error" => Status::Error,
            "off" => Status::Off,
            _ => Status::Normal,
        }
    }

    /// Severity used for aggregation; higher wins.
    pub fn severity(self) -> u8 {
        match self {
            Status::Error => 5,
            Status::Alert => 4,
            Status::AlertAcked => 3,
            Status::Warning => 2,
            Status::Normal | Status::Off => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Alert => "alert",
            Status::AlertAcked => "alert-acked",
            Status::Error => "error",
            Status::Off => "off",
        }
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        Status::parse(&s)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display-only presence of a user. Never affects the light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Available,
    Busy,
    Away,
    Break,
    Offline,
}

impl Presence {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Presence::Available,
            "busy" => Presence::Busy,
            "away" => Presence::Away,
            "break" => Presence::Break,
            _ => Presence::Offline,
        }
    }

    /// Decode a presence payload: a JSON object with a `status` field, a JSON
    /// string, or a bare word.
    pub fn decode(raw: &str) -> Result<Self, crate::error::DecodeError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(crate::error::DecodeError::Empty);
        }
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => map
                .get("status")
                .and_then(|s| s.as_str())
                .map(Presence::parse)
                .ok_or(crate::error::DecodeError::MissingStatus),
            Ok(serde_json::Value::String(s)) => Ok(Presence::parse(&s)),
            _ => Ok(Presence::parse(raw)),
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Presence::Available => "available",
            Presence::Busy => "busy",
            Presence::Away => "away",
            Presence::Break => "break",
            Presence::Offline => "offline",
        };
        f.write_str(s)
    }
}
