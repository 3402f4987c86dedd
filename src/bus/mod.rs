//! Message-bus boundary.
//!
//! The daemon relies on two things from the bus: publish/subscribe channels,
//! and a per-channel ordered log whose newest entry can be read on (re)connect.

pub mod credentials;
#[cfg(test)]
pub mod memory;
pub mod redis;

use crate::error::BusError;
use async_trait::async_trait;
use std::time::Duration;

const STATUS_PREFIX: &str = "status:";
const PRESENCE_PREFIX: &str = "user_status:";

/// Channel carrying status events for a group (or a user's personal channel).
pub fn status_channel(group: &str) -> String {
    format!("{STATUS_PREFIX}{group}")
}

/// Channel carrying presence updates for a user.
pub fn presence_channel(username: &str) -> String {
    format!("{PRESENCE_PREFIX}{username}")
}

/// Which pipeline a channel feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Status(String),
    Presence(String),
}

impl ChannelKind {
    pub fn classify(channel: &str) -> Option<Self> {
        if let Some(user) = channel.strip_prefix(PRESENCE_PREFIX) {
            return Some(ChannelKind::Presence(user.to_string()));
        }
        channel
            .strip_prefix(STATUS_PREFIX)
            .map(|group| ChannelKind::Status(group.to_string()))
    }
}

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Opens sessions against the bus.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Open an authenticated session and verify it answers.
    async fn connect(&self) -> Result<Box<dyn BusSession>, BusError>;
}

/// One live connection to the bus.
#[async_trait]
pub trait BusSession: Send {
    /// Lightweight liveness probe.
    async fn ping(&mut self) -> Result<(), BusError>;

    /// Newest entry of a channel's ordered log.
    async fn last_entry(&mut self, channel: &str) -> Result<Option<String>, BusError>;

    async fn subscribe(&mut self, channels: &[String]) -> Result<(), BusError>;

    /// Wait up to `wait` for the next message. `Ok(None)` means nothing arrived.
    async fn next_message(&mut self, wait: Duration) -> Result<Option<BusMessage>, BusError>;
}
