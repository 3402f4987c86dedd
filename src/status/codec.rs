use super::Status;
use crate::error::DecodeError;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A single status change published for a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Group name. Filled from the channel name when the payload omits it.
    #[serde(default)]
    pub group: String,

    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub ticket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popup_url: Option<String>,

    /// ISO-8601 timestamp as published.
    #[serde(default)]
    pub timestamp: String,
}

impl StatusEvent {
    /// Parse a wire payload.
    ///
    /// # Errors
    /// Returns `DecodeError` for empty or malformed payloads.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.get("status").is_none() {
            return Err(DecodeError::MissingStatus);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn encode(&self) -> String {
        // Serializing a plain struct of strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Placeholder event for a group whose log is empty.
    pub fn synthesized(group: &str) -> Self {
        Self {
            group: group.to_string(),
            status: Status::Normal,
            source: Some("busylightd".to_string()),
            reason: Some("no history".to_string()),
            ticket: None,
            summary: None,
            popup_url: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Identity digest for deduplication.
    ///
    /// Covers group, status, timestamp, ticket and summary, encoded as a JSON
    /// object with sorted keys. `source` and `reason` are excluded so replays
    /// of the same change through different publishers collapse to one event.
    pub fn hash(&self) -> EventHash {
        let mut identity = serde_json::Map::new();
        identity.insert("group".into(), self.group.clone().into());
        identity.insert("status".into(), self.status.as_str().into());
        identity.insert("summary".into(), self.summary.clone().into());
        identity.insert("ticket".into(), self.ticket.clone().into());
        identity.insert("timestamp".into(), self.timestamp.clone().into());

        // serde_json's default map is a BTreeMap, so keys serialize sorted.
        let canonical = serde_json::Value::Object(identity).to_string();
        let digest = Sha256::digest(canonical.as_bytes());

        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        EventHash(out)
    }

    /// Whether this event should be forwarded to the ticket consumer.
    pub fn has_ticket_info(&self) -> bool {
        self.ticket.as_deref().is_some_and(|t| !t.is_empty())
            || self.popup_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// 128-bit event identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHash(pub [u8; 16]);

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_full_event() {
        let raw = r#"{
            "group": "ops",
            "status": "alert",
            "source": "pagerduty",
            "reason": "disk full",
            "ticket": 4711,
            "summary": "db01 disk",
            "popup_url": "https://tickets.example/4711",
            "timestamp": "2024-05-01T10:00:00Z"
        }"#;
        let event = StatusEvent::decode(raw).unwrap();
        assert_eq!(event.group, "ops");
        assert_eq!(event.status, Status::Alert);
        assert_eq!(event.ticket.as_deref(), Some("4711"));
        assert!(event.has_ticket_info());
    }

    #[test]
    fn decode_minimal_event() {
        let event = StatusEvent::decode(r#"{"status":"warning"}"#).unwrap();
        assert_eq!(event.group, "");
        assert_eq!(event.status, Status::Warning);
        assert!(event.source.is_none());
        assert!(!event.has_ticket_info());
    }

    #[test]
    fn decode_errors_are_typed() {
        assert!(matches!(StatusEvent::decode(""), Err(DecodeError::Empty)));
        assert!(matches!(StatusEvent::decode("{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            StatusEvent::decode(r#"{"group":"ops"}"#),
            Err(DecodeError::MissingStatus)
        ));
    }

    #[test]
    fn hash_ignores_field_order() {
        let a = StatusEvent::decode(
            r#"{"group":"ops","status":"alert","timestamp":"t1","ticket":"7","summary":"s"}"#,
        )
        .unwrap();
        let b = StatusEvent::decode(
            r#"{"summary":"s","ticket":"7","timestamp":"t1","status":"alert","group":"ops"}"#,
        )
        .unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn hash_excludes_source_and_reason() {
        let a = StatusEvent::decode(
            r#"{"group":"ops","status":"alert","timestamp":"t1","source":"a","reason":"x"}"#,
        )
        .unwrap();
        let b = StatusEvent::decode(
            r#"{"group":"ops","status":"alert","timestamp":"t1","source":"b","reason":"y"}"#,
        )
        .unwrap();
        assert_eq!(a.hash(), b.hash());

        let c = StatusEvent::decode(r#"{"group":"ops","status":"alert","timestamp":"t2"}"#)
            .unwrap();
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn encode_decode_keeps_identity() {
        let event = StatusEvent::synthesized("ops");
        let back = StatusEvent::decode(&event.encode()).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.hash().to_string().len(), 32);
    }
}
