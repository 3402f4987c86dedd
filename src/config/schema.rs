use crate::device::{Rgb, Ringtone};
use serde::Deserialize;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub user: UserConfig,
    #[serde(default)]
    pub light: LightConfig,
}

/// Message-bus connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token traded for the bus password.
    #[serde(default)]
    pub token: Option<String>,

    /// Static password; skips the token exchange when set.
    #[serde(default)]
    pub password: Option<String>,

    /// Token exchange endpoint. Derived from `host` when absent.
    #[serde(default)]
    pub auth_url: Option<String>,

    /// How long one receive waits before servicing timers.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,

    #[serde(default = "default_health_check")]
    pub health_check_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Consecutive message errors that force a reconnect.
    #[serde(default = "default_max_errors")]
    pub max_consecutive_errors: u32,
}

impl BusConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }
}

/// Who we are and which groups we watch.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,

    /// Groups this user belongs to.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Every group to monitor, memberships or not.
    #[serde(default)]
    pub all_groups: Vec<String>,

    /// Users whose presence is shown.
    #[serde(default)]
    pub known_users: Vec<String>,
}

impl UserConfig {
    /// Status channels to subscribe to, in order and without repeats:
    /// all groups, memberships, then the personal channel.
    pub fn status_groups(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let candidates = self
            .all_groups
            .iter()
            .chain(self.groups.iter())
            .chain(std::iter::once(&self.username));
        for group in candidates {
            if !group.is_empty() && !out.contains(group) {
                out.push(group.clone());
            }
        }
        out
    }
}

/// Light behaviour. Hot-reloadable.
#[derive(Debug, Clone, Deserialize)]
pub struct LightConfig {
    #[serde(default)]
    pub effect: Effect,

    /// Tone played on alert.
    #[serde(default = "default_ringtone")]
    pub ringtone: Ringtone,

    /// Alert volume 0-7.
    #[serde(default = "default_volume")]
    pub volume: u8,

    /// Brightness 10-100.
    #[serde(default = "default_brightness")]
    pub brightness: u8,

    /// Keep running without hardware, updating only the UI.
    #[serde(default = "default_true")]
    pub simulation: bool,

    #[serde(default = "default_ten")]
    pub discovery_interval_secs: u64,

    #[serde(default = "default_ten")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_blink_interval")]
    pub blink_interval_ms: u64,

    #[serde(default)]
    pub flash: FlashConfig,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            effect: Effect::default(),
            ringtone: default_ringtone(),
            volume: default_volume(),
            brightness: default_brightness(),
            simulation: true,
            discovery_interval_secs: default_ten(),
            refresh_interval_secs: default_ten(),
            blink_interval_ms: default_blink_interval(),
            flash: FlashConfig::default(),
        }
    }
}

/// Continuous effect applied on top of the status colour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    #[default]
    None,
    Blink,
}

/// Flash-on-alert sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct FlashConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub speed: FlashSpeed,

    /// Number of alert/secondary toggle pairs.
    #[serde(default = "default_flash_count")]
    pub count: u32,

    /// Secondary colour, `#rrggbb`.
    #[serde(default = "default_flash_color")]
    pub color: String,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            speed: FlashSpeed::default(),
            count: default_flash_count(),
            color: default_flash_color(),
        }
    }
}

impl FlashConfig {
    pub fn secondary(&self) -> Option<Rgb> {
        Rgb::from_hex(&self.color)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashSpeed {
    Slow,
    #[default]
    Medium,
    Fast,
}

impl FlashSpeed {
    pub fn interval(self) -> Duration {
        match self {
            FlashSpeed::Slow => Duration::from_millis(1000),
            FlashSpeed::Medium => Duration::from_millis(500),
            FlashSpeed::Fast => Duration::from_millis(250),
        }
    }
}

// --- Defaults ---

fn default_port() -> u16 {
    6379
}

fn default_poll_timeout() -> u64 {
    100
}

fn default_health_check() -> u64 {
    30
}

fn default_initial_backoff() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    60
}

fn default_max_errors() -> u32 {
    3
}

fn default_ringtone() -> Ringtone {
    Ringtone::OpenOffice
}

fn default_volume() -> u8 {
    7
}

fn default_brightness() -> u8 {
    100
}

fn default_true() -> bool {
    true
}

fn default_ten() -> u64 {
    10
}

fn default_blink_interval() -> u64 {
    500
}

fn default_flash_count() -> u32 {
    3
}

fn default_flash_color() -> String {
    "#ffffff".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml_str = r#"
[bus]
host = "bus.example"

[user]
username = "alice"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bus.port, 6379);
        assert_eq!(config.bus.initial_backoff_secs, 5);
        assert_eq!(config.light.effect, Effect::None);
        assert_eq!(config.light.ringtone, Ringtone::OpenOffice);
        assert_eq!(config.light.brightness, 100);
        assert!(config.light.flash.enabled);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r##"
[bus]
host = "bus.example"
port = 6380
token = "abc"
poll_timeout_ms = 50
max_consecutive_errors = 5

[user]
username = "alice"
groups = ["ops"]
all_groups = ["ops", "noc", "dev"]
known_users = ["alice", "bob"]

[light]
effect = "blink"
ringtone = "telephone_nordic"
volume = 3
brightness = 40
simulation = false

[light.flash]
enabled = false
speed = "fast"
count = 5
color = "#0000ff"
"##;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bus.port, 6380);
        assert_eq!(config.bus.poll_timeout(), Duration::from_millis(50));
        assert_eq!(config.light.effect, Effect::Blink);
        assert_eq!(config.light.ringtone, Ringtone::TelephoneNordic);
        assert_eq!(config.light.flash.speed.interval(), Duration::from_millis(250));
        assert_eq!(config.light.flash.secondary(), Some(Rgb::new(0, 0, 255)));
        assert_eq!(config.user.known_users, vec!["alice", "bob"]);
    }

    #[test]
    fn status_groups_are_deduplicated() {
        let user = UserConfig {
            username: "alice".into(),
            groups: vec!["ops".into(), "sec".into()],
            all_groups: vec!["ops".into(), "noc".into()],
            known_users: vec![],
        };
        assert_eq!(user.status_groups(), vec!["ops", "noc", "sec", "alice"]);
    }
}
