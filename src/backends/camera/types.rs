// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use gstreamer::buffer::{MappedBuffer, Readable};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Frame data storage - either pre-copied bytes or zero-copy GStreamer buffer
///
/// The `Mapped` variant keeps the GStreamer buffer mapped and alive until all
/// references are dropped, so appsink callbacks can hand frames to the render
/// thread without copying pixels.
#[derive(Clone)]
pub enum FrameData {
    /// Pre-copied bytes (decoded thumbnails, tests)
    Copied(Arc<[u8]>),
    /// Zero-copy mapped GStreamer buffer
    Mapped(Arc<MappedBuffer<Readable>>),
}

impl FrameData {
    pub fn from_mapped_buffer(buffer: MappedBuffer<Readable>) -> Self {
        FrameData::Mapped(Arc::new(buffer))
    }

    pub fn len(&self) -> usize {
        match self {
            FrameData::Copied(data) => data.len(),
            FrameData::Mapped(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Mapped(buf) => write!(f, "FrameData::Mapped({} bytes)", buf.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Mapped(buf) => buf.as_slice(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Which way the sensor points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Facing {
    /// World-facing sensor; external cameras are treated as back cameras
    #[default]
    Back,
    /// User-facing sensor
    Front,
}

impl Facing {
    pub fn opposite(self) -> Self {
        match self {
            Facing::Back => Facing::Front,
            Facing::Front => Facing::Back,
        }
    }

    /// Parse the `camera.location` style property used by libcamera and PipeWire
    pub fn from_location(location: &str) -> Self {
        match location.trim().to_ascii_lowercase().as_str() {
            "front" | "user" => Facing::Front,
            _ => Facing::Back,
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Back => write!(f, "back"),
            Facing::Front => write!(f, "front"),
        }
    }
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "back" | "rear" | "world" => Ok(Facing::Back),
            "front" | "user" | "selfie" => Ok(Facing::Front),
            other => Err(format!("Unknown camera facing: {}", other)),
        }
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Both dimensions are at least those of `other`
    pub fn covers(&self, other: FrameSize) -> bool {
        self.width >= other.width && self.height >= other.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Sensor rotation in degrees (clockwise)
///
/// Camera sensors may be physically mounted at an angle relative to the
/// display. The value comes from libcamera's `api.libcamera.rotation`
/// property when the device exposes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }
}

/// Texture-coordinate transform attached to each frame
///
/// Column-major 4×4 matrix applied to `(u, v, 0, 1)` before sampling, the
/// same contract as a platform surface texture transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform(pub [[f32; 4]; 4]);

impl FrameTransform {
    pub const IDENTITY: FrameTransform = FrameTransform([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    /// Build the transform for a sensor's mounting and mirroring
    pub fn for_sensor(rotation: SensorRotation, mirror: bool) -> Self {
        // Rotations are about the texture center (0.5, 0.5)
        let (cos, sin) = match rotation {
            SensorRotation::None => (1.0, 0.0),
            SensorRotation::Rotate90 => (0.0, 1.0),
            SensorRotation::Rotate180 => (-1.0, 0.0),
            SensorRotation::Rotate270 => (0.0, -1.0),
        };
        let flip = if mirror { -1.0 } else { 1.0 };
        let a = cos * flip;
        let b = sin * flip;
        let c = -sin;
        let d = cos;
        // u' = a*(u-0.5) + c*(v-0.5) + 0.5, v' = b*(u-0.5) + d*(v-0.5) + 0.5
        let tx = 0.5 - 0.5 * a - 0.5 * c;
        let ty = 0.5 - 0.5 * b - 0.5 * d;
        FrameTransform([
            [a, b, 0.0, 0.0],
            [c, d, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [tx, ty, 0.0, 1.0],
        ])
    }

    /// Apply to a texture coordinate
    pub fn apply(&self, u: f32, v: f32) -> (f32, f32) {
        let m = &self.0;
        (
            m[0][0] * u + m[1][0] * v + m[3][0],
            m[0][1] * u + m[1][1] * v + m[3][1],
        )
    }
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A single RGBA frame headed for the shared texture
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub data: FrameData,
    /// Row stride in bytes (may include padding)
    pub stride: u32,
    /// Monotonic capture time, see [`monotonic_ns`]
    pub timestamp_ns: u64,
    pub transform: FrameTransform,
}

impl CameraFrame {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Nanoseconds since the first call in this process
///
/// All frame producers share this clock so the encoder timeline stays
/// continuous when the frame source changes.
pub fn monotonic_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Focus behaviour requested from the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    ContinuousVideo,
    Auto,
    Fixed,
}

/// White balance behaviour requested from the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhiteBalanceMode {
    Auto,
    Manual,
}

/// Represents a camera device
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDevice {
    pub name: String,
    /// Backend-specific identifier (device node or PipeWire object)
    pub path: String,
    pub facing: Facing,
    pub rotation: SensorRotation,
}

/// What an opened sensor can do
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraCapabilities {
    /// Supported output sizes, in device order
    pub sizes: Vec<FrameSize>,
    /// Supported frame rates in whole frames per second
    pub frame_rates: Vec<u32>,
    pub focus_modes: Vec<FocusMode>,
    pub white_balance_modes: Vec<WhiteBalanceMode>,
    pub stabilization: bool,
    pub torch: bool,
}

/// Parameters applied to an opened sensor
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureParameters {
    pub size: FrameSize,
    pub frame_rate: u32,
    pub focus: Option<FocusMode>,
    pub white_balance: Option<WhiteBalanceMode>,
    pub stabilization: bool,
    pub torch: bool,
    /// Hint that frames feed a video encoder
    pub recording_hint: bool,
}

/// Result of capture negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub size: FrameSize,
    pub frame_rate: u32,
}

/// Backend-level camera errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Device is held by this or another session
    DeviceBusy,
    /// Format not supported
    FormatNotSupported(String),
    /// Control or feature not supported by the device
    NotSupported(String),
    /// Pipeline construction or state change failed
    PipelineFailed(String),
    /// General I/O error
    IoError(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::DeviceBusy => write!(f, "Device is busy"),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            BackendError::PipelineFailed(msg) => write!(f, "Pipeline failed: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6
    }

    #[test]
    fn identity_transform_keeps_coordinates() {
        let t = FrameTransform::for_sensor(SensorRotation::None, false);
        assert_eq!(t, FrameTransform::IDENTITY);
        assert!(approx(t.apply(0.25, 0.75), (0.25, 0.75)));
    }

    #[test]
    fn mirror_flips_u_only() {
        let t = FrameTransform::for_sensor(SensorRotation::None, true);
        assert!(approx(t.apply(0.0, 0.0), (1.0, 0.0)));
        assert!(approx(t.apply(0.25, 0.6), (0.75, 0.6)));
    }

    #[test]
    fn half_turn_maps_corners_to_opposite_corners() {
        let t = FrameTransform::for_sensor(SensorRotation::Rotate180, false);
        assert!(approx(t.apply(0.0, 0.0), (1.0, 1.0)));
        assert!(approx(t.apply(1.0, 0.0), (0.0, 1.0)));
    }

    #[test]
    fn facing_parses_locations() {
        assert_eq!(Facing::from_location("front"), Facing::Front);
        assert_eq!(Facing::from_location("external"), Facing::Back);
        assert_eq!("selfie".parse::<Facing>(), Ok(Facing::Front));
    }

    #[test]
    fn size_covers_requires_both_axes() {
        assert!(FrameSize::new(1280, 720).covers(FrameSize::new(700, 500)));
        assert!(!FrameSize::new(640, 480).covers(FrameSize::new(700, 500)));
    }
}
