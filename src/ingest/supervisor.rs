use crate::bus::{BusConnector, BusSession};
use crate::config::schema::BusConfig;
use crate::event::LightEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bus connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

/// Doubling retry delay with an upper bound.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the current delay and double it for next time.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Snapshot of the supervisor's bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub phase: Phase,
    pub reconnect_delay: Duration,
    pub last_ping_time: Option<Instant>,
}

/// Owns the bus connection lifecycle: connect, health checks, backoff.
pub struct ConnectionSupervisor {
    connector: Arc<dyn BusConnector>,
    events: broadcast::Sender<LightEvent>,
    cancel: CancellationToken,
    phase: Phase,
    backoff: Backoff,
    last_ping: Option<Instant>,
    health_interval: Duration,
    max_errors: u32,
    consecutive_errors: u32,
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn BusConnector>,
        config: &BusConfig,
        events: broadcast::Sender<LightEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            events,
            cancel,
            phase: Phase::Disconnected,
            backoff: Backoff::new(
                Duration::from_secs(config.initial_backoff_secs),
                Duration::from_secs(config.max_backoff_secs),
            ),
            last_ping: None,
            health_interval: config.health_check_interval(),
            max_errors: config.max_consecutive_errors.max(1),
            consecutive_errors: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState {
            phase: self.phase,
            reconnect_delay: self.backoff.current(),
            last_ping_time: self.last_ping,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// One connection attempt. `None` means the attempt failed; call
    /// [`wait_before_retry`](Self::wait_before_retry) before the next one.
    pub async fn connect(&mut self) -> Option<Box<dyn BusSession>> {
        self.set_phase(Phase::Connecting);
        match self.connector.connect().await {
            Ok(session) => {
                self.last_ping = Some(Instant::now());
                self.set_phase(Phase::Connected);
                Some(session)
            }
            Err(e) => {
                warn!(
                    "bus connection failed: {e}, retrying in {}s",
                    self.backoff.current().as_secs()
                );
                self.set_phase(Phase::Disconnected);
                None
            }
        }
    }

    /// Subscriptions are up again: clear backoff and error streak.
    pub fn mark_established(&mut self) {
        self.backoff.reset();
        self.consecutive_errors = 0;
        info!("bus connection established");
    }

    /// Sleep for the current backoff delay, then double it.
    /// Returns `false` if cancelled while waiting.
    pub async fn wait_before_retry(&mut self) -> bool {
        let delay = self.backoff.advance();
        debug!("waiting {}s before reconnecting", delay.as_secs());
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    pub fn health_check_due(&self) -> bool {
        self.last_ping
            .map_or(true, |t| t.elapsed() >= self.health_interval)
    }

    /// Ping the bus. On failure the connection is marked degraded.
    pub async fn health_check(&mut self, session: &mut dyn BusSession) -> bool {
        self.last_ping = Some(Instant::now());
        match session.ping().await {
            Ok(()) => {
                debug!("bus health check ok");
                true
            }
            Err(e) => {
                warn!("bus health check failed: {e}");
                self.set_phase(Phase::Degraded);
                false
            }
        }
    }

    /// Count a failed message. Returns `true` once the streak forces a reconnect.
    pub fn record_error(&mut self) -> bool {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.max_errors {
            warn!(
                "{} consecutive bus errors, reconnecting",
                self.consecutive_errors
            );
            self.set_phase(Phase::Degraded);
            return true;
        }
        false
    }

    /// A message went through; the error streak is broken.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn connection_lost(&mut self) {
        self.set_phase(Phase::Disconnected);
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        info!("bus connection: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        let _ = self.events.send(LightEvent::ConnectionPhase(phase));
    }
}
