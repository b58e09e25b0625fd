// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! ```text
//! ┌─────────────────────┐
//! │  Session Controller │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │CaptureSourceAdapter │  ← open/configure/flash, negotiation
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CameraBackend trait │  ← enumeration, sessions
//! └──────────┬──────────┘
//!            │
//!            ▼
//!      ┌───────────┐
//!      │ GStreamer │  ← DeviceMonitor + appsink
//!      └───────────┘
//! ```

pub mod adapter;
pub mod gst_backend;
pub mod negotiation;
pub mod types;
pub mod v4l2_controls;

pub use adapter::CaptureSourceAdapter;
pub use gst_backend::GstCameraBackend;
pub use types::*;

use crate::gpu::SurfaceWriter;

/// Discovers sensors and opens them
pub trait CameraBackend: Send + Sync {
    /// Cameras currently attached, in a stable order
    fn enumerate(&self) -> Vec<CameraDevice>;

    /// Open a sensor for exclusive use
    ///
    /// Fails with [`BackendError::DeviceBusy`] while the device is held.
    fn open(&self, device: &CameraDevice) -> BackendResult<Box<dyn CameraSession>>;
}

/// An opened sensor
pub trait CameraSession: Send {
    fn device(&self) -> &CameraDevice;

    /// What the sensor supports; sizes keep device order
    fn capabilities(&self) -> &CameraCapabilities;

    /// Apply a parameter set
    ///
    /// On error the previously applied parameters stay in effect.
    fn apply(&mut self, params: &CaptureParameters) -> BackendResult<()>;

    /// Stream frames into `writer` using the last applied parameters
    fn start_streaming(&mut self, writer: SurfaceWriter, transform: FrameTransform)
    -> BackendResult<()>;

    /// Stop streaming and give up the surface writer; safe when stopped
    fn stop_streaming(&mut self);

    fn is_streaming(&self) -> bool;
}
