#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::ignored_unit_patterns
)]

pub mod bus;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod event;
pub mod ingest;
pub mod light;
pub mod status;
