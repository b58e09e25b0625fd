// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Video encoder bitrate presets
///
/// These presets define the target bitrate for video encoding based on resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Low bitrate - 1 Mbps at SD, matching small clip sharing
    Low,
    /// Medium bitrate - balanced quality and file size
    #[default]
    Medium,
    /// High bitrate - larger files, better quality
    High,
}

impl BitratePreset {
    /// All preset variants, lowest first
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Get bitrate in kbps for a given resolution
    ///
    /// - SD (640x480 and below): Low=1, Medium=2, High=4 Mbps
    /// - HD (1280x720): Low=2.5, Medium=5, High=10 Mbps
    /// - Full HD (1920x1080 and above): Low=4, Medium=8, High=16 Mbps
    pub fn bitrate_kbps(&self, width: u32, _height: u32) -> u32 {
        match (ResolutionTier::for_width(width), self) {
            (ResolutionTier::SD, BitratePreset::Low) => 1_000,
            (ResolutionTier::SD, BitratePreset::Medium) => 2_000,
            (ResolutionTier::SD, BitratePreset::High) => 4_000,
            (ResolutionTier::HD, BitratePreset::Low) => 2_500,
            (ResolutionTier::HD, BitratePreset::Medium) => 5_000,
            (ResolutionTier::HD, BitratePreset::High) => 10_000,
            (ResolutionTier::FullHD, BitratePreset::Low) => 4_000,
            (ResolutionTier::FullHD, BitratePreset::Medium) => 8_000,
            (ResolutionTier::FullHD, BitratePreset::High) => 16_000,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// 640x480 and below
    SD,
    /// 1280x720
    HD,
    /// 1920x1080 and above
    FullHD,
}

impl ResolutionTier {
    pub fn for_width(width: u32) -> Self {
        match width {
            w if w >= 1920 => ResolutionTier::FullHD,
            w if w >= 1280 => ResolutionTier::HD,
            _ => ResolutionTier::SD,
        }
    }
}

/// Format bitrate for display (e.g., "8 Mbps" or "2.5 Mbps")
pub fn format_bitrate(kbps: u32) -> String {
    let mbps = kbps as f64 / 1000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Recording policy defaults
pub mod recording {
    /// Longest clip the session will record before asking the host to stop
    pub const MAX_DURATION_MS: u64 = 10_000;

    /// Clips shorter than this are discarded instead of reviewed
    pub const MIN_DURATION_MS: u64 = 1_000;

    /// Preview frame-rate ceiling used during negotiation
    pub const FPS_CEILING: u32 = 30;

    /// Storage key prefix used when the host does not provide one
    pub const KEY_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Maximum buffer queue size (keep small for low latency)
    pub const MAX_BUFFERS: u32 = 2;

    /// Get number of threads for videoconvert based on available CPU threads
    pub fn videoconvert_threads() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4)
    }

    /// Pixel format exchanged with appsink/appsrc; matches the GPU texture format
    pub const RAW_FORMAT: &str = "RGBA";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Pipeline state change timeout on stop
    pub const STOP_TIMEOUT_SECS: u64 = 2;

    /// Pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// Upper bound on waiting for the muxer to write its trailer
    pub const EOS_TIMEOUT_SECS: u64 = 10;

    /// Upper bound on `wait_for_stop` before the caller gives up
    pub const RECORDING_STOP_TIMEOUT: Duration = Duration::from_secs(15);

    /// How long the sidecar waits for the encoder session to open
    pub const ENCODER_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

    /// GStreamer pipeline timeout for duration queries and frame extraction
    pub const PROBE_TIMEOUT_SECS: u64 = 5;

    /// How long a decoder poll blocks before rechecking the stop signal
    pub const DECODER_POLL_TIMEOUT: Duration = Duration::from_millis(100);
}

/// Persisted file layout
pub mod file_formats {
    /// Container extension for recordings
    pub const VIDEO_EXTENSION: &str = "mp4";

    /// Suffix appended to the key for the thumbnail
    pub const THUMBNAIL_SUFFIX: &str = "_thumb";

    /// Thumbnail extension
    pub const THUMBNAIL_EXTENSION: &str = "jpg";

    /// JPEG quality used for thumbnails
    pub const THUMBNAIL_JPEG_QUALITY: u8 = 100;
}
