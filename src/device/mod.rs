//! Busylight hardware boundary.
//!
//! Every failure is a `DeviceError` value; nothing here panics or lets a HID
//! error escape to the controller.

pub mod kuando;
#[cfg(test)]
pub mod mock;

use crate::error::DeviceError;
use serde::Deserialize;

/// An RGB colour, 0-255 per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` (the `#` is optional).
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('#');
        if s.len() != 6 || !s.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Scale every channel by a brightness percentage.
    pub fn scaled(self, brightness: u8) -> Self {
        let pct = u32::from(brightness.min(100));
        let scale = |c: u8| ((u32::from(c) * pct + 50) / 100) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

/// Tones built into the Kuando Busylight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ringtone {
    #[default]
    Off,
    OpenOffice,
    Quiet,
    Funky,
    FairyTale,
    KuandoTrain,
    TelephoneNordic,
    TelephoneOriginal,
    TelephonePickMeUp,
    Buzz,
}

/// An enumerated device that can be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Backend-specific address (the HID path).
    pub path: String,
    pub name: String,
}

/// Finds and opens devices.
pub trait DeviceDriver: Send {
    fn discover(&mut self) -> Vec<DeviceHandle>;

    /// # Errors
    /// Returns `DeviceError` when the device is unavailable.
    fn open(&mut self, handle: &DeviceHandle) -> Result<Box<dyn Device>, DeviceError>;
}

/// An opened light.
pub trait Device: Send {
    fn name(&self) -> &str;

    /// # Errors
    /// Returns `DeviceError::Write` when the command cannot be delivered.
    fn set_color(&mut self, color: Rgb) -> Result<(), DeviceError>;

    /// # Errors
    /// Returns `DeviceError::Write` when the command cannot be delivered.
    fn set_tone(&mut self, tone: Ringtone, volume: u8) -> Result<(), DeviceError>;

    /// Cheap liveness check.
    fn probe(&mut self) -> bool;
}
