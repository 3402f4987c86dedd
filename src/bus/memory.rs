//! In-memory bus for tests.

use super::{BusConnector, BusMessage, BusSession};
use crate::error::BusError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Shared {
    logs: HashMap<String, Vec<String>>,
    inbox: VecDeque<BusMessage>,
    subscriptions: Vec<String>,
    failures_left: usize,
    connects: usize,
    drop_when_drained: bool,
    broken_ping: bool,
}

/// Scriptable bus shared between a test and the code under test.
#[derive(Clone, Default)]
pub struct MemoryBus {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry to a channel's log.
    pub fn push_log(&self, channel: &str, payload: &str) {
        self.shared
            .lock()
            .logs
            .entry(channel.to_string())
            .or_default()
            .push(payload.to_string());
    }

    /// Queue a live message for delivery.
    pub fn publish(&self, channel: &str, payload: &str) {
        self.shared.lock().inbox.push_back(BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.lock().failures_left = n;
    }

    /// Close the session once the inbox is empty.
    pub fn drop_when_drained(&self, on: bool) {
        self.shared.lock().drop_when_drained = on;
    }

    pub fn break_ping(&self, on: bool) {
        self.shared.lock().broken_ping = on;
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.lock().subscriptions.clone()
    }

    pub fn connects(&self) -> usize {
        self.shared.lock().connects
    }
}

#[async_trait]
impl BusConnector for MemoryBus {
    async fn connect(&self) -> Result<Box<dyn BusSession>, BusError> {
        let mut shared = self.shared.lock();
        if shared.failures_left > 0 {
            shared.failures_left -= 1;
            return Err(BusError::Closed);
        }
        shared.connects += 1;
        shared.subscriptions.clear();
        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemorySession {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl BusSession for MemorySession {
    async fn ping(&mut self) -> Result<(), BusError> {
        if self.shared.lock().broken_ping {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    async fn last_entry(&mut self, channel: &str) -> Result<Option<String>, BusError> {
        Ok(self
            .shared
            .lock()
            .logs
            .get(channel)
            .and_then(|log| log.last().cloned()))
    }

    async fn subscribe(&mut self, channels: &[String]) -> Result<(), BusError> {
        self.shared
            .lock()
            .subscriptions
            .extend(channels.iter().cloned());
        Ok(())
    }

    async fn next_message(&mut self, wait: Duration) -> Result<Option<BusMessage>, BusError> {
        {
            let mut shared = self.shared.lock();
            if let Some(msg) = shared.inbox.pop_front() {
                return Ok(Some(msg));
            }
            if shared.drop_when_drained {
                shared.drop_when_drained = false;
                return Err(BusError::Closed);
            }
        }
        tokio::time::sleep(wait).await;
        Ok(None)
    }
}
