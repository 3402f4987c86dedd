//! Recording driver for tests.

use super::{Device, DeviceDriver, DeviceHandle, Rgb, Ringtone};
use crate::error::DeviceError;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Color(Rgb),
    Tone(Ringtone, u8),
}

#[derive(Default)]
struct Shared {
    plugged: bool,
    failing: bool,
    opens: usize,
    commands: Vec<Command>,
}

/// A fake light that records every command it receives.
#[derive(Clone, Default)]
pub struct MockDriver {
    shared: Arc<Mutex<Shared>>,
}

impl MockDriver {
    pub fn plugged() -> Self {
        let driver = Self::default();
        driver.set_plugged(true);
        driver
    }

    pub fn set_plugged(&self, plugged: bool) {
        self.shared.lock().plugged = plugged;
    }

    /// Make writes and probes fail while the device stays enumerable.
    pub fn set_failing(&self, failing: bool) {
        self.shared.lock().failing = failing;
    }

    pub fn opens(&self) -> usize {
        self.shared.lock().opens
    }

    pub fn commands(&self) -> Vec<Command> {
        self.shared.lock().commands.clone()
    }

    pub fn colors(&self) -> Vec<Rgb> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Color(rgb) => Some(rgb),
                Command::Tone(..) => None,
            })
            .collect()
    }

    pub fn last_color(&self) -> Option<Rgb> {
        self.colors().last().copied()
    }

    pub fn last_tone(&self) -> Option<(Ringtone, u8)> {
        self.commands().into_iter().rev().find_map(|c| match c {
            Command::Tone(t, v) => Some((t, v)),
            Command::Color(_) => None,
        })
    }

    pub fn clear(&self) {
        self.shared.lock().commands.clear();
    }
}

impl DeviceDriver for MockDriver {
    fn discover(&mut self) -> Vec<DeviceHandle> {
        if self.shared.lock().plugged {
            vec![DeviceHandle {
                path: "mock://0".into(),
                name: "Mock Busylight".into(),
            }]
        } else {
            Vec::new()
        }
    }

    fn open(&mut self, handle: &DeviceHandle) -> Result<Box<dyn Device>, DeviceError> {
        let mut shared = self.shared.lock();
        if !shared.plugged || shared.failing {
            return Err(DeviceError::Open {
                name: handle.name.clone(),
                message: "unplugged".into(),
            });
        }
        shared.opens += 1;
        Ok(Box::new(MockLight {
            shared: Arc::clone(&self.shared),
            name: handle.name.clone(),
        }))
    }
}

struct MockLight {
    shared: Arc<Mutex<Shared>>,
    name: String,
}

impl MockLight {
    fn record(&self, command: Command) -> Result<(), DeviceError> {
        let mut shared = self.shared.lock();
        if !shared.plugged || shared.failing {
            return Err(DeviceError::Write("device gone".into()));
        }
        shared.commands.push(command);
        Ok(())
    }
}

impl Device for MockLight {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_color(&mut self, color: Rgb) -> Result<(), DeviceError> {
        self.record(Command::Color(color))
    }

    fn set_tone(&mut self, tone: Ringtone, volume: u8) -> Result<(), DeviceError> {
        self.record(Command::Tone(tone, volume))
    }

    fn probe(&mut self) -> bool {
        let shared = self.shared.lock();
        shared.plugged && !shared.failing
    }
}
