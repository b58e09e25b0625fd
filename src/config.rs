// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::types::{Facing, FrameSize};
use crate::constants::{BitratePreset, recording};
use crate::filters::FilterSelector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Directory name under the platform config dir
const CONFIG_DIR_NAME: &str = "camera-recorder";

/// File name of the persisted settings
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Video encoder bitrate preset (Low, Medium, High)
    pub bitrate_preset: BitratePreset,
    /// Explicit bitrate, overrides the preset when set
    pub video_bitrate_kbps: Option<u32>,
    /// Recordings longer than this are stopped by the host
    pub max_duration_ms: u64,
    /// Recordings shorter than this are discarded
    pub min_duration_ms: u64,
    /// Frame-rate ceiling used when negotiating the preview
    pub preview_fps_ceiling: u32,
    /// Encoder output size; the negotiated preview size when unset
    pub recording_size: Option<FrameSize>,
    /// Mirror front camera frames horizontally (selfie mode)
    pub mirror_front_camera: bool,
    /// Root directory for recordings; `~/Videos/Camera` when unset
    pub output_root: Option<PathBuf>,
    /// Filter restored on the next session
    pub last_filter: FilterSelector,
    /// Camera restored on the next session
    pub last_facing: Facing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bitrate_preset: BitratePreset::Low,
            video_bitrate_kbps: None,
            max_duration_ms: recording::MAX_DURATION_MS,
            min_duration_ms: recording::MIN_DURATION_MS,
            preview_fps_ceiling: recording::FPS_CEILING,
            recording_size: None,
            mirror_front_camera: true,
            output_root: None,
            last_filter: FilterSelector::None,
            last_facing: Facing::Back,
        }
    }
}

impl Config {
    /// Location of the persisted settings file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory available, using default settings");
                Self::default()
            }
        }
    }

    /// Load settings from `path`; missing or corrupt files yield defaults
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt config, using defaults");
                Self::default()
            }
        }
    }

    /// Persist settings to the default location
    pub fn save(&self) -> Result<(), String> {
        let path = Self::default_path().ok_or("No config directory available")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        std::fs::write(path, json)
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Target encoder bitrate in bits per second for the given output size
    pub fn bitrate_bps(&self, width: u32, height: u32) -> u32 {
        let kbps = self
            .video_bitrate_kbps
            .unwrap_or_else(|| self.bitrate_preset.bitrate_kbps(width, height));
        kbps.saturating_mul(1000)
    }

    /// Root directory for per-recording folders
    pub fn recordings_root(&self) -> PathBuf {
        self.output_root.clone().unwrap_or_else(|| {
            dirs::video_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Camera")
        })
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_preset() {
        let config = Config {
            video_bitrate_kbps: Some(3_000),
            ..Config::default()
        };
        assert_eq!(config.bitrate_bps(640, 480), 3_000_000);
    }

    #[test]
    fn default_bitrate_is_one_megabit_at_sd() {
        assert_eq!(Config::default().bitrate_bps(640, 480), 1_000_000);
    }
}
