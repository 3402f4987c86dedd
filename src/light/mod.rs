//! Light controller: turns the overall status into device commands.
//!
//! One task owns the controller and everything it mutates. Discovery,
//! keepalive, blink and flash are timers in the same `select!` loop, so they
//! can never interleave mid-update. Flash takes precedence: blink and refresh
//! leave the device alone while a flash sequence is running.

pub mod flash;
pub mod palette;

use crate::config::schema::{Effect, LightConfig};
use crate::device::{Device, DeviceDriver, DeviceHandle, Rgb, Ringtone};
use crate::error::{DeviceError, Result};
use crate::event::LightEvent;
use crate::status::Status;
use flash::{BlinkTimer, FlashSequence, FlashStep};
use palette::{color_for, describe};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read-only view of the controller for other tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub connected: bool,
    pub simulation: bool,
    pub device_name: Option<String>,
    pub status: Status,
    pub effect: Effect,
    pub ringtone: Ringtone,
    pub volume: u8,
    pub brightness: u8,
    pub flashing: bool,
    pub blinking: bool,
}

/// Drives one busylight from status updates.
pub struct LightController {
    driver: Box<dyn DeviceDriver>,
    device: Option<Box<dyn Device>>,
    settings: LightConfig,
    status: Status,
    simulation: bool,
    /// Tone currently playing on the device.
    active_tone: (Ringtone, u8),
    flash: Option<FlashSequence>,
    blink: Option<BlinkTimer>,
    /// Last connectivity we announced, if any.
    announced: Option<bool>,
    events: broadcast::Sender<LightEvent>,
    snapshot: watch::Sender<DeviceSnapshot>,
}

impl LightController {
    pub fn new(
        driver: Box<dyn DeviceDriver>,
        settings: &LightConfig,
        events: broadcast::Sender<LightEvent>,
    ) -> Self {
        let mut settings = settings.clone();
        settings.brightness = settings.brightness.clamp(10, 100);
        settings.volume = settings.volume.min(7);

        let (snapshot, _) = watch::channel(DeviceSnapshot {
            connected: false,
            simulation: false,
            device_name: None,
            status: Status::Off,
            effect: settings.effect,
            ringtone: settings.ringtone,
            volume: settings.volume,
            brightness: settings.brightness,
            flashing: false,
            blinking: false,
        });

        Self {
            driver,
            device: None,
            settings,
            status: Status::Off,
            simulation: false,
            active_tone: (Ringtone::Off, 0),
            flash: None,
            blink: None,
            announced: None,
            events,
            snapshot,
        }
    }

    /// Receiver for state snapshots, updated after every change.
    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            connected: self.device.is_some(),
            simulation: self.simulation,
            device_name: self.device.as_ref().map(|d| d.name().to_string()),
            status: self.status,
            effect: self.settings.effect,
            ringtone: self.settings.ringtone,
            volume: self.settings.volume,
            brightness: self.settings.brightness,
            flashing: self.flash.is_some(),
            blinking: self.blink.is_some(),
        }
    }

    /// Process events and timers until cancelled, then turn the light off.
    ///
    /// # Errors
    /// Currently never fails; device problems only degrade to simulation.
    pub async fn run(
        mut self,
        mut rx: broadcast::Receiver<LightEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.discover_tick();

        let mut discovery = periodic(Duration::from_secs(self.settings.discovery_interval_secs));
        let mut refresh = periodic(Duration::from_secs(self.settings.refresh_interval_secs));

        loop {
            let flash_at = self.flash.as_ref().map(FlashSequence::deadline);
            let blink_at = self.blink.as_ref().map(BlinkTimer::deadline);

            tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => {
                        if self.handle_event(event) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("light controller lagged, missed {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = discovery.tick() => self.discover_tick(),
                _ = refresh.tick() => self.refresh_tick(),
                () = sleep_until(flash_at) => self.flash_tick(),
                () = sleep_until(blink_at) => self.blink_tick(),
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Returns `true` when the controller should stop.
    fn handle_event(&mut self, event: LightEvent) -> bool {
        match event {
            LightEvent::OverallStatus(status) => self.set_status(status, true),
            LightEvent::ManualStatus { status, tone } => self.set_status_with(status, tone, true),
            LightEvent::ReconnectDevice => {
                info!("manual device reconnect requested");
                self.discover_tick();
            }
            LightEvent::ConfigReloaded(config) => self.apply_config(&config.light),
            LightEvent::Shutdown => return true,
            _ => {}
        }
        false
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status, log: bool) {
        self.set_status_with(status, None, log);
    }

    /// Show a status. An explicit `tone` replaces the configured one and
    /// suppresses flash-on-alert.
    pub fn set_status_with(&mut self, status: Status, tone: Option<(Ringtone, u8)>, log: bool) {
        let previous = self.status;
        self.status = status;

        // A flash sequence never outlives the status that started it.
        let cancelled_flash = self.flash.take().is_some();
        if cancelled_flash {
            debug!("flash sequence cancelled by status change");
        }
        // A new status starts lit; a keepalive of the same one keeps the phase.
        if cancelled_flash || previous != status {
            self.restart_blink();
        }

        let _ = self.events.send(LightEvent::StatusApplied(status));
        if log {
            info!("changing light to {}", describe(status));
        }

        if self.device.is_none() && !self.simulation {
            if log {
                info!("no light device found and simulation mode is disabled");
            }
            self.blink = None;
            self.active_tone = tone.unwrap_or_else(|| self.tone_for(status));
            self.publish();
            return;
        }

        let entering_alert = status == Status::Alert && previous != Status::Alert;
        if entering_alert && tone.is_none() && self.settings.flash.enabled {
            self.start_flash();
        } else {
            let tone = tone.unwrap_or_else(|| self.tone_for(status));
            let color = self.current_color();
            self.apply(color, tone);
        }

        self.sync_blink();
        self.publish();
    }

    pub fn set_effect(&mut self, effect: Effect) {
        if self.settings.effect == effect {
            return;
        }
        info!("effect: {effect:?}");
        self.settings.effect = effect;
        self.sync_blink();
        if self.flash.is_none() && self.status != Status::Off {
            let color = self.current_color();
            self.write(|d| d.set_color(color));
        }
        self.publish();
    }

    /// Change the alert tone. Takes effect at once if an alert is showing.
    pub fn set_ringtone(&mut self, ringtone: Ringtone, volume: u8) {
        let volume = volume.min(7);
        self.settings.ringtone = ringtone;
        self.settings.volume = volume;
        if self.status == Status::Alert && self.flash.is_none() {
            self.active_tone = (ringtone, volume);
            self.write(|d| d.set_tone(ringtone, volume));
        }
        self.publish();
    }

    pub fn set_brightness(&mut self, brightness: u8) {
        self.settings.brightness = brightness.clamp(10, 100);
        if self.flash.is_none() && self.status != Status::Off {
            let color = self.current_color();
            self.write(|d| d.set_color(color));
        }
        self.publish();
    }

    /// Take over a reloaded `[light]` section. Timer intervals keep their
    /// startup values.
    pub fn apply_config(&mut self, config: &LightConfig) {
        self.settings.flash = config.flash.clone();
        self.settings.simulation = config.simulation;
        if !config.simulation && self.device.is_none() {
            self.simulation = false;
        }
        self.set_brightness(config.brightness);
        self.set_ringtone(config.ringtone, config.volume);
        self.set_effect(config.effect);
    }

    /// Discovery and reconnection pass.
    pub fn discover_tick(&mut self) {
        let found = self.driver.discover();

        if let Some(device) = self.device.as_mut() {
            if found.is_empty() {
                info!("busylight unplugged");
            } else if !device.probe() {
                warn!("busylight stopped responding");
            } else {
                return;
            }
            self.lose_device();
            let found = self.driver.discover();
            self.try_open(&found);
        } else {
            self.try_open(&found);
        }
    }

    /// Keepalive: re-send the current state so the device does not time out.
    pub fn refresh_tick(&mut self) {
        if self.device.is_none() || self.status == Status::Off || self.flash.is_some() {
            return;
        }
        let color = self.current_color();
        let tone = self.active_tone;
        self.write(|d| {
            d.set_color(color)?;
            d.set_tone(tone.0, tone.1)
        });
    }

    pub fn flash_tick(&mut self) {
        let Some(flash) = self.flash.as_mut() else {
            return;
        };
        match flash.step() {
            FlashStep::Show(color) => {
                let color = color.scaled(self.settings.brightness);
                self.write(|d| d.set_color(color));
            }
            FlashStep::Settle => {
                self.flash = None;
                debug!("flash sequence complete");
                self.restart_blink();
                let color = self.current_color();
                let tone = self.tone_for(self.status);
                self.apply(color, tone);
                self.publish();
            }
        }
    }

    pub fn blink_tick(&mut self) {
        let Some(blink) = self.blink.as_mut() else {
            return;
        };
        if self.flash.is_some() {
            blink.postpone();
            return;
        }
        blink.toggle();
        let color = self.current_color();
        self.write(|d| d.set_color(color));
    }

    /// Turn the light off and forget the status.
    pub fn shutdown(&mut self) {
        info!("turning light off");
        self.flash = None;
        self.blink = None;
        self.status = Status::Off;
        self.apply(Rgb::OFF, (Ringtone::Off, 0));
        let _ = self.events.send(LightEvent::StatusApplied(Status::Off));
        self.publish();
    }

    fn start_flash(&mut self) {
        let flash = &self.settings.flash;
        let secondary = flash.secondary().unwrap_or(Rgb::OFF);
        let sequence = FlashSequence::start(
            color_for(Status::Alert),
            secondary,
            flash.count,
            flash.speed.interval(),
        );
        debug!("flashing {} times", flash.count);
        self.flash = Some(sequence);

        // Silent while flashing; the tone comes with the settle step.
        let color = color_for(Status::Alert).scaled(self.settings.brightness);
        self.apply(color, (Ringtone::Off, 0));
    }

    fn sync_blink(&mut self) {
        let wanted = self.settings.effect == Effect::Blink && self.status != Status::Off;
        match (wanted, self.blink.is_some()) {
            (true, false) => {
                self.blink = Some(BlinkTimer::start(Duration::from_millis(
                    self.settings.blink_interval_ms,
                )));
            }
            (false, true) => self.blink = None,
            _ => {}
        }
    }

    /// Put a running blink back at the start of its lit phase.
    fn restart_blink(&mut self) {
        if self.blink.is_some() {
            self.blink = Some(BlinkTimer::start(Duration::from_millis(
                self.settings.blink_interval_ms,
            )));
        }
    }

    fn tone_for(&self, status: Status) -> (Ringtone, u8) {
        if status == Status::Alert {
            (self.settings.ringtone, self.settings.volume)
        } else {
            (Ringtone::Off, 0)
        }
    }

    /// Status colour at the current brightness, dark during a blink's off phase.
    fn current_color(&self) -> Rgb {
        if self.blink.as_ref().is_some_and(|b| !b.is_lit()) {
            return Rgb::OFF;
        }
        color_for(self.status).scaled(self.settings.brightness)
    }

    fn apply(&mut self, color: Rgb, tone: (Ringtone, u8)) {
        self.active_tone = tone;
        self.write(|d| {
            d.set_color(color)?;
            d.set_tone(tone.0, tone.1)
        });
    }

    /// Run a device command. Without a device this is a no-op; a failure
    /// drops the device until the next discovery pass.
    fn write<F>(&mut self, command: F)
    where
        F: FnOnce(&mut dyn Device) -> std::result::Result<(), DeviceError>,
    {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if let Err(e) = command(device.as_mut()) {
            warn!("error controlling light: {e}");
            self.lose_device();
        }
    }

    fn try_open(&mut self, found: &[DeviceHandle]) -> bool {
        let Some(handle) = found.first() else {
            self.enter_simulation("no busylight found");
            return false;
        };

        match self.driver.open(handle) {
            Ok(device) => {
                let name = device.name().to_string();
                info!("found light: {name}");
                self.device = Some(device);
                if self.simulation {
                    self.simulation = false;
                    info!("exited simulation mode, now using physical light");
                }
                self.announce(true, &name);
                self.reapply();
                self.publish();
                true
            }
            Err(e) => {
                self.enter_simulation(&e.to_string());
                false
            }
        }
    }

    /// Push the whole current state to a freshly opened device.
    fn reapply(&mut self) {
        if self.status == Status::Off || self.flash.is_some() {
            return;
        }
        self.sync_blink();
        let color = self.current_color();
        let tone = self.active_tone;
        self.apply(color, tone);
    }

    fn lose_device(&mut self) {
        if self.device.take().is_none() {
            return;
        }
        warn!("lost connection to light, will try to reconnect");
        self.enter_simulation("device lost");
    }

    fn enter_simulation(&mut self, reason: &str) {
        if self.settings.simulation && !self.simulation {
            self.simulation = true;
            info!("device unavailable ({reason}), running in simulation mode");
        } else {
            debug!("device unavailable: {reason}");
        }
        self.announce(false, "");
        self.publish();
    }

    fn announce(&mut self, connected: bool, name: &str) {
        if self.announced == Some(connected) {
            return;
        }
        self.announced = Some(connected);
        let _ = self.events.send(LightEvent::DeviceConnectivity {
            connected,
            name: name.to_string(),
        });
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

fn periodic(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
