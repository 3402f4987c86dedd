//! Kuando Busylight over HID.
//!
//! The device takes a 64-byte command buffer: eight 8-byte steps followed by
//! an 8-byte footer ending in a big-endian checksum of everything before it.
//! We only ever use step 0 with a "jump" opcode, which shows a solid colour
//! and optionally changes the ringtone.

use super::{Device, DeviceDriver, DeviceHandle, Rgb, Ringtone};
use crate::error::DeviceError;
use hidapi::{HidApi, HidDevice};
use std::ffi::CString;
use tracing::{debug, warn};

/// (vendor id, product id) pairs of known Kuando lights.
const SUPPORTED: &[(u16, u16)] = &[
    (0x04D8, 0xF848),
    (0x27BB, 0x3BCA),
    (0x27BB, 0x3BCB),
    (0x27BB, 0x3BCC),
    (0x27BB, 0x3BCD),
    (0x27BB, 0x3BCE),
    (0x27BB, 0x3BCF),
];

const BUFFER_LEN: usize = 64;
const OP_JUMP: u8 = 0x10;
const UPDATE_TONE: u8 = 0x80;

impl Ringtone {
    fn code(self) -> u8 {
        match self {
            Ringtone::Off => 0,
            Ringtone::OpenOffice => 1,
            Ringtone::Quiet => 2,
            Ringtone::Funky => 3,
            Ringtone::FairyTale => 4,
            Ringtone::KuandoTrain => 5,
            Ringtone::TelephoneNordic => 6,
            Ringtone::TelephoneOriginal => 7,
            Ringtone::TelephonePickMeUp => 8,
            Ringtone::Buzz => 11,
        }
    }
}

/// Ringtone byte of a step. `None` leaves the current tone alone.
fn tone_byte(tone: Option<(Ringtone, u8)>) -> u8 {
    match tone {
        Some((tone, volume)) => UPDATE_TONE | (tone.code() << 3) | (volume.min(7)),
        None => 0,
    }
}

/// The device takes PWM duty cycles 0-100 rather than 0-255.
fn pwm(channel: u8) -> u8 {
    ((u16::from(channel) * 100 + 127) / 255) as u8
}

/// Build a full command buffer showing `color` and optionally setting a tone.
pub fn command_buffer(color: Rgb, tone: Option<(Ringtone, u8)>) -> [u8; BUFFER_LEN] {
    let mut buf = [0u8; BUFFER_LEN];

    buf[0] = OP_JUMP;
    buf[2] = pwm(color.r);
    buf[3] = pwm(color.g);
    buf[4] = pwm(color.b);
    buf[7] = tone_byte(tone);

    // Footer: sensitivity, timeout, trigger stay zero; then the pad bytes.
    buf[59] = 0xFF;
    buf[60] = 0xFF;
    buf[61] = 0xFF;

    let checksum: u16 = buf[..62].iter().map(|&b| u16::from(b)).sum();
    buf[62..].copy_from_slice(&checksum.to_be_bytes());
    buf
}

/// Enumerates Kuando lights through hidapi.
pub struct KuandoDriver {
    api: Option<HidApi>,
}

impl KuandoDriver {
    pub fn new() -> Self {
        let api = match HidApi::new() {
            Ok(api) => Some(api),
            Err(e) => {
                warn!("HID backend unavailable: {e}");
                None
            }
        };
        Self { api }
    }

    fn api(&mut self) -> Result<&mut HidApi, DeviceError> {
        if self.api.is_none() {
            self.api = Some(HidApi::new().map_err(|e| DeviceError::Hid(e.to_string()))?);
        }
        self.api
            .as_mut()
            .ok_or_else(|| DeviceError::Hid("HID backend unavailable".to_string()))
    }
}

impl Default for KuandoDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for KuandoDriver {
    fn discover(&mut self) -> Vec<DeviceHandle> {
        let api = match self.api() {
            Ok(api) => api,
            Err(e) => {
                debug!("discovery skipped: {e}");
                return Vec::new();
            }
        };
        if let Err(e) = api.refresh_devices() {
            warn!("HID enumeration failed: {e}");
            return Vec::new();
        }

        api.device_list()
            .filter(|info| SUPPORTED.contains(&(info.vendor_id(), info.product_id())))
            .map(|info| DeviceHandle {
                path: info.path().to_string_lossy().into_owned(),
                name: info
                    .product_string()
                    .filter(|s| !s.is_empty())
                    .unwrap_or("Kuando Busylight")
                    .to_string(),
            })
            .collect()
    }

    fn open(&mut self, handle: &DeviceHandle) -> Result<Box<dyn Device>, DeviceError> {
        let open_err = |message: String| DeviceError::Open {
            name: handle.name.clone(),
            message,
        };
        let path = CString::new(handle.path.clone()).map_err(|e| open_err(e.to_string()))?;
        let device = self
            .api()?
            .open_path(&path)
            .map_err(|e| open_err(e.to_string()))?;

        Ok(Box::new(KuandoLight {
            device,
            name: handle.name.clone(),
            color: Rgb::OFF,
            tone: (Ringtone::Off, 0),
        }))
    }
}

/// An open Kuando light. Remembers the last colour and tone so either can be
/// changed on its own.
struct KuandoLight {
    device: HidDevice,
    name: String,
    color: Rgb,
    tone: (Ringtone, u8),
}

impl KuandoLight {
    fn write(&self, buf: &[u8; BUFFER_LEN]) -> Result<(), DeviceError> {
        // Report id 0 precedes the payload.
        let mut report = [0u8; BUFFER_LEN + 1];
        report[1..].copy_from_slice(buf);
        self.device
            .write(&report)
            .map(|_| ())
            .map_err(|e| DeviceError::Write(e.to_string()))
    }
}

impl Device for KuandoLight {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_color(&mut self, color: Rgb) -> Result<(), DeviceError> {
        self.write(&command_buffer(color, None))?;
        self.color = color;
        Ok(())
    }

    fn set_tone(&mut self, tone: Ringtone, volume: u8) -> Result<(), DeviceError> {
        self.write(&command_buffer(self.color, Some((tone, volume))))?;
        self.tone = (tone, volume);
        Ok(())
    }

    fn probe(&mut self) -> bool {
        self.device.get_product_string().is_ok()
    }
}
