use crate::device::Rgb;
use crate::status::Status;

pub fn color_for(status: Status) -> Rgb {
    match status {
        Status::Alert => Rgb::new(255, 0, 0),
        Status::AlertAcked => Rgb::new(255, 140, 0),
        Status::Warning => Rgb::new(255, 255, 0),
        Status::Error => Rgb::new(255, 0, 255),
        Status::Normal => Rgb::new(0, 255, 0),
        Status::Off => Rgb::OFF,
    }
}

/// Human-readable name for logs.
pub fn describe(status: Status) -> &'static str {
    match status {
        Status::Alert => "Red (Alert)",
        Status::AlertAcked => "Orange (Alert-Acked)",
        Status::Warning => "Yellow (Warning)",
        Status::Error => "Purple (Error)",
        Status::Normal => "Green (Normal)",
        Status::Off => "Off",
    }
}
