// SPDX-License-Identifier: GPL-3.0-only

//! Torch LED control via Linux sysfs
//!
//! Discovers LEDs exposed at `/sys/class/leds/*:flash` or `*:torch` and
//! drives them through the `brightness` file, which is group-writable by
//! `feedbackd` on most mobile distributions.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LEDS_DIR: &str = "/sys/class/leds";

/// A torch-capable LED discovered via sysfs
#[derive(Debug, Clone, PartialEq)]
pub struct FlashDevice {
    /// Sysfs path, e.g. `/sys/class/leds/white:flash`
    path: PathBuf,
    max_brightness: u32,
    name: String,
}

impl FlashDevice {
    /// Scan the system LED class directory
    pub fn discover() -> Vec<FlashDevice> {
        Self::discover_in(Path::new(LEDS_DIR))
    }

    /// Scan `leds_dir` for writable `*:flash` and `*:torch` entries
    pub fn discover_in(leds_dir: &Path) -> Vec<FlashDevice> {
        let Ok(entries) = std::fs::read_dir(leds_dir) else {
            debug!(dir = %leds_dir.display(), "No LED class directory, torch unavailable");
            return Vec::new();
        };

        let mut devices: Vec<FlashDevice> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                if !(name.ends_with(":flash") || name.ends_with(":torch")) {
                    return None;
                }
                Self::probe(entry.path(), name)
            })
            .collect();

        // Deterministic order (white before yellow)
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    fn probe(path: PathBuf, name: String) -> Option<FlashDevice> {
        let max_path = path.join("max_brightness");
        let max_brightness = match std::fs::read_to_string(&max_path) {
            Ok(s) => match s.trim().parse::<u32>() {
                Ok(v) if v > 0 => v,
                _ => {
                    warn!(path = %max_path.display(), "Invalid max_brightness value");
                    return None;
                }
            },
            Err(e) => {
                warn!(path = %max_path.display(), error = %e, "Cannot read max_brightness");
                return None;
            }
        };

        let brightness_path = path.join("brightness");
        if let Err(e) = std::fs::OpenOptions::new()
            .write(true)
            .open(&brightness_path)
        {
            warn!(
                path = %brightness_path.display(),
                error = %e,
                "Torch LED not writable, user may need to be in 'feedbackd' group"
            );
            return None;
        }

        info!(name = %name, max_brightness, "Discovered torch LED");
        Some(FlashDevice {
            path,
            max_brightness,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set raw brightness (0 = off, `max_brightness` = full)
    pub fn set_brightness(&self, value: u32) -> io::Result<()> {
        let clamped = value.min(self.max_brightness);
        std::fs::write(self.path.join("brightness"), clamped.to_string())
    }

    pub fn off(&self) -> io::Result<()> {
        self.set_brightness(0)
    }

    /// Turn on at a fraction of max brightness
    pub fn torch(&self, intensity: f32) -> io::Result<()> {
        let clamped = intensity.clamp(0.0, 1.0);
        let value = (clamped * self.max_brightness as f32).round() as u32;
        self.set_brightness(value)
    }
}

/// Switch every device on or off; returns the first failure
pub fn set_all(devices: &[FlashDevice], on: bool) -> io::Result<()> {
    let mut first_error = None;
    for device in devices {
        let result = if on { device.torch(1.0) } else { device.off() };
        if let Err(e) = result {
            warn!(device = %device.name, on, error = %e, "Failed to switch torch LED");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
