// SPDX-License-Identifier: GPL-3.0-only

//! Capture source adapter
//!
//! Owns at most one open camera, negotiates its capture parameters and feeds
//! its frames into a [`FrameSurface`]. Backend errors are mapped into
//! [`CoreError`] here; parameter changes that the device rejects are logged
//! and the previous parameters stay in effect.

use super::negotiation::{capture_parameters, choose_frame_rate, choose_optimal_size};
use super::types::*;
use super::{CameraBackend, CameraSession};
use crate::constants::recording;
use crate::errors::{CoreError, CoreResult};
use crate::gpu::FrameSurface;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Writer name the camera registers on the frame surface
pub const CAMERA_WRITER: &str = "camera";

pub struct CaptureSourceAdapter {
    backend: Arc<dyn CameraBackend>,
    session: Option<Box<dyn CameraSession>>,
    params: Option<CaptureParameters>,
    negotiated: Option<NegotiatedFormat>,
    fps_ceiling: u32,
    mirror_front: bool,
}

impl CaptureSourceAdapter {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            session: None,
            params: None,
            negotiated: None,
            fps_ceiling: recording::FPS_CEILING,
            mirror_front: true,
        }
    }

    /// Frame-rate ceiling used by [`configure`](Self::configure)
    pub fn with_fps_ceiling(mut self, ceiling: u32) -> Self {
        self.fps_ceiling = ceiling.max(1);
        self
    }

    /// Mirror front camera frames horizontally
    pub fn with_front_mirroring(mut self, mirror: bool) -> Self {
        self.mirror_front = mirror;
        self
    }

    /// Open the first camera facing `facing`
    pub fn open(&mut self, facing: Facing) -> CoreResult<()> {
        if self.session.is_some() {
            warn!(facing = %facing, "Camera open requested while one is active");
            return Err(CoreError::DeviceAlreadyOpen);
        }

        let devices = self.backend.enumerate();
        let device = devices
            .iter()
            .find(|device| device.facing == facing)
            .ok_or_else(|| {
                CoreError::DeviceUnavailable(format!(
                    "No {} camera among {} device(s)",
                    facing,
                    devices.len()
                ))
            })?;

        let session = self.backend.open(device)?;
        info!(name = %device.name, facing = %facing, "Camera opened");
        self.session = Some(session);
        self.params = None;
        self.negotiated = None;
        Ok(())
    }

    fn session(&self) -> CoreResult<&dyn CameraSession> {
        self.session
            .as_deref()
            .ok_or_else(|| CoreError::DeviceUnavailable("No camera open".to_string()))
    }

    fn session_mut(&mut self) -> CoreResult<&mut Box<dyn CameraSession>> {
        self.session
            .as_mut()
            .ok_or_else(|| CoreError::DeviceUnavailable("No camera open".to_string()))
    }

    /// Negotiate size, frame rate and sensor modes for `preferred`
    pub fn configure(&mut self, preferred: FrameSize) -> CoreResult<NegotiatedFormat> {
        let ceiling = self.fps_ceiling;
        let session = self.session_mut()?;
        let capabilities = session.capabilities().clone();

        let size = choose_optimal_size(&capabilities.sizes, preferred).ok_or_else(|| {
            CoreError::DeviceUnavailable("Camera reports no frame sizes".to_string())
        })?;
        let frame_rate = choose_frame_rate(&capabilities.frame_rates, ceiling).unwrap_or(ceiling);
        let format = NegotiatedFormat { size, frame_rate };

        let mut params = capture_parameters(&capabilities, format);
        params.torch = false;

        match session.apply(&params) {
            Ok(()) => {
                info!(preferred = %preferred, size = %size, frame_rate, "Capture format negotiated");
                self.params = Some(params);
                self.negotiated = Some(format);
                Ok(format)
            }
            Err(e) => match self.negotiated {
                Some(previous) => {
                    warn!(error = %e, "Camera rejected new parameters, keeping previous");
                    Ok(previous)
                }
                None => {
                    warn!(error = %e, "Camera rejected parameters, streaming with device defaults");
                    self.params = Some(params);
                    self.negotiated = Some(format);
                    Ok(format)
                }
            },
        }
    }

    /// Claim the surface's writer slot and start streaming into it
    pub fn attach_output_surface(&mut self, surface: &FrameSurface) -> CoreResult<()> {
        let mirror_front = self.mirror_front;
        let session = self.session_mut()?;
        if session.is_streaming() {
            return Err(CoreError::DeviceAlreadyOpen);
        }

        let device = session.device().clone();
        let writer = surface.claim_writer(CAMERA_WRITER).ok_or_else(|| {
            CoreError::DeviceUnavailable(format!(
                "Frame surface is held by {}",
                surface.writer_name().unwrap_or_default()
            ))
        })?;

        let mirror = mirror_front && device.facing == Facing::Front;
        let transform = FrameTransform::for_sensor(device.rotation, mirror);
        session.start_streaming(writer, transform)?;
        debug!(name = %device.name, rotation = device.rotation.degrees(), mirror, "Streaming into surface");
        Ok(())
    }

    /// Stop streaming and release the surface writer; the camera stays open
    pub fn detach_output_surface(&mut self) {
        if let Some(session) = &mut self.session {
            session.stop_streaming();
        }
    }

    /// Switch the torch
    ///
    /// Front cameras and cameras without a torch report
    /// `UnsupportedOperation`. A device refusing the change is not an error;
    /// the torch keeps its previous state.
    pub fn set_flash(&mut self, on: bool) -> CoreResult<()> {
        let session = self.session()?;
        if session.device().facing == Facing::Front {
            return Err(CoreError::UnsupportedOperation(
                "Front camera has no flash".to_string(),
            ));
        }
        if !session.capabilities().torch {
            return Err(CoreError::UnsupportedOperation(
                "Camera has no torch".to_string(),
            ));
        }
        let Some(mut params) = self.params.clone() else {
            return Err(CoreError::UnsupportedOperation(
                "Camera is not configured".to_string(),
            ));
        };
        if params.torch == on {
            return Ok(());
        }

        params.torch = on;
        let session = self.session_mut()?;
        match session.apply(&params) {
            Ok(()) => {
                info!(on, "Torch switched");
                self.params = Some(params);
            }
            Err(e) => warn!(on, error = %e, "Camera rejected torch change"),
        }
        Ok(())
    }

    /// Torch off, stream stopped, device released
    pub fn close(&mut self) {
        if self.torch_on()
            && let Err(e) = self.set_flash(false)
        {
            warn!(error = %e, "Failed to turn torch off before closing");
        }
        if let Some(mut session) = self.session.take() {
            session.stop_streaming();
            info!(name = %session.device().name, "Camera closed");
        }
        self.params = None;
        self.negotiated = None;
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.is_streaming())
    }

    pub fn torch_on(&self) -> bool {
        self.params.as_ref().is_some_and(|params| params.torch)
    }

    pub fn facing(&self) -> Option<Facing> {
        self.session.as_ref().map(|session| session.device().facing)
    }

    pub fn device(&self) -> Option<&CameraDevice> {
        self.session.as_ref().map(|session| session.device())
    }

    pub fn capabilities(&self) -> Option<&CameraCapabilities> {
        self.session.as_ref().map(|session| session.capabilities())
    }

    pub fn negotiated(&self) -> Option<NegotiatedFormat> {
        self.negotiated
    }

    pub fn parameters(&self) -> Option<&CaptureParameters> {
        self.params.as_ref()
    }
}

impl Drop for CaptureSourceAdapter {
    fn drop(&mut self) {
        self.close();
    }
}
