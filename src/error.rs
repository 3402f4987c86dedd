use std::path::PathBuf;

/// Central error type for busylightd.
#[derive(Debug, thiserror::Error)]
pub enum LightError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher error: {0}")]
    Watcher(String),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Transport failures on the message bus. All of them end in a backoff.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no bus password or bearer token configured")]
    MissingCredentials,

    #[error("credential exchange failed: {0}")]
    Credentials(String),

    #[error("credential request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("bus connection closed")]
    Closed,
}

/// A single message could not be turned into an event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload has no status field")]
    MissingStatus,
}

/// The device is unavailable. Never escapes the light controller.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to open {name}: {message}")]
    Open { name: String, message: String },

    #[error("write failed: {0}")]
    Write(String),

    #[error("HID error: {0}")]
    Hid(String),
}

pub type Result<T> = std::result::Result<T, LightError>;
