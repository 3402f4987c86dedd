//! Status ingestion: bus connection supervision and channel listening.

pub mod listener;
pub mod supervisor;

pub use listener::ChannelListener;
pub use supervisor::{ConnectionSupervisor, Phase};
