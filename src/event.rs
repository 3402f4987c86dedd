use crate::config::schema::AppConfig;
use crate::device::Ringtone;
use crate::ingest::supervisor::Phase;
use crate::status::{Presence, Status, StatusEvent};
use std::sync::Arc;

/// Events flowing through the broadcast channel connecting all subsystems.
#[derive(Debug, Clone)]
pub enum LightEvent {
    /// Overall status recomputed by the listener; drives the light.
    OverallStatus(Status),

    /// The light controller applied a status (UI feedback, device or not).
    StatusApplied(Status),

    /// An admitted event changed (or re-confirmed) one group's status.
    GroupChanged {
        group: String,
        status: Status,
        event: Arc<StatusEvent>,
    },

    /// An admitted event carried a ticket id or popup URL.
    TicketReceived {
        ticket: Option<String>,
        summary: Option<String>,
        popup_url: Option<String>,
        group: String,
    },

    /// A user's display-only presence changed.
    PresenceChanged { username: String, presence: Presence },

    /// Busylight plugged in (with its name) or lost.
    DeviceConnectivity { connected: bool, name: String },

    /// Bus connection phase changed.
    ConnectionPhase(Phase),

    /// Status set by hand, optionally with an explicit tone.
    ManualStatus {
        status: Status,
        tone: Option<(Ringtone, u8)>,
    },

    /// Run device discovery now.
    ReconnectDevice,

    /// Configuration was reloaded from disk.
    ConfigReloaded(Arc<AppConfig>),

    /// Shutdown the daemon.
    Shutdown,
}
