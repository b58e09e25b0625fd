// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer camera backend
//!
//! Cameras are discovered with a `Video/Source` device monitor, so V4L2,
//! libcamera and PipeWire sources all show up. Frames are converted to RGBA
//! and handed to the frame surface from the appsink streaming thread
//! without copying the mapped buffer.

use super::types::*;
use super::v4l2_controls::SensorControls;
use super::{CameraBackend, CameraSession};
use crate::constants::{pipeline, timing};
use crate::flash::{self, FlashDevice};
use crate::gpu::SurfaceWriter;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks};
use gstreamer_video::VideoInfo;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Device properties carrying a stable node path, most specific first
const PATH_PROPERTIES: &[&str] = &["api.v4l2.path", "device.path", "object.path"];
const LOCATION_PROPERTIES: &[&str] = &["api.libcamera.location", "camera.location"];
const ROTATION_PROPERTY: &str = "api.libcamera.rotation";

type HeldDevices = Arc<Mutex<HashSet<String>>>;

/// Camera backend built on GStreamer device providers
#[derive(Default, Clone)]
pub struct GstCameraBackend {
    held: HeldDevices,
}

impl GstCameraBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn monitor_devices() -> Vec<gst::Device> {
        if let Err(e) = gst::init() {
            warn!(error = %e, "GStreamer init failed");
            return Vec::new();
        }

        let monitor = gst::DeviceMonitor::new();
        monitor.add_filter(Some("Video/Source"), None);
        if let Err(e) = monitor.start() {
            warn!(error = %e, "Failed to start device monitor");
            return Vec::new();
        }
        let devices = monitor.devices().into_iter().collect();
        monitor.stop();
        devices
    }

    fn describe(device: &gst::Device, index: usize) -> CameraDevice {
        let name = device.display_name().to_string();
        let props = device.properties();
        let lookup = |keys: &[&str]| -> Option<String> {
            let props = props.as_ref()?;
            keys.iter().find_map(|key| {
                props
                    .get::<String>(*key)
                    .ok()
                    .or_else(|| props.get::<i32>(*key).ok().map(|v| v.to_string()))
            })
        };

        let path = lookup(PATH_PROPERTIES).unwrap_or_else(|| format!("camera-{}", index));
        let facing = lookup(LOCATION_PROPERTIES)
            .map(|location| Facing::from_location(&location))
            .unwrap_or_default();
        let rotation = lookup(&[ROTATION_PROPERTY])
            .and_then(|r| r.trim().parse::<i32>().ok())
            .map(SensorRotation::from_degrees_int)
            .unwrap_or_default();

        CameraDevice {
            name,
            path,
            facing,
            rotation,
        }
    }
}

impl CameraBackend for GstCameraBackend {
    fn enumerate(&self) -> Vec<CameraDevice> {
        let cameras: Vec<CameraDevice> = Self::monitor_devices()
            .iter()
            .enumerate()
            .map(|(index, device)| Self::describe(device, index))
            .collect();
        info!(count = cameras.len(), "Enumerated cameras");
        for camera in &cameras {
            debug!(name = %camera.name, path = %camera.path, facing = %camera.facing, "Camera");
        }
        cameras
    }

    fn open(&self, device: &CameraDevice) -> BackendResult<Box<dyn CameraSession>> {
        let gst_device = Self::monitor_devices()
            .into_iter()
            .enumerate()
            .find(|(index, candidate)| Self::describe(candidate, *index).path == device.path)
            .map(|(_, candidate)| candidate)
            .ok_or_else(|| BackendError::DeviceNotFound(device.path.clone()))?;

        {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            if !held.insert(device.path.clone()) {
                return Err(BackendError::DeviceBusy);
            }
        }

        let (formats, frame_rates) = parse_device_caps(gst_device.caps().as_ref());
        let controls = SensorControls::probe(&device.path);
        let torch = match device.facing {
            Facing::Back => FlashDevice::discover(),
            Facing::Front => Vec::new(),
        };

        let capabilities = CameraCapabilities {
            sizes: formats.iter().map(|format| format.size).collect(),
            frame_rates,
            focus_modes: controls.focus_modes.clone(),
            white_balance_modes: controls.white_balance_modes.clone(),
            stabilization: controls.stabilization,
            torch: !torch.is_empty(),
        };
        info!(
            name = %device.name,
            sizes = capabilities.sizes.len(),
            rates = ?capabilities.frame_rates,
            torch = capabilities.torch,
            "Opened camera"
        );

        Ok(Box::new(GstCameraSession {
            device: device.clone(),
            gst_device,
            capabilities,
            formats,
            controls,
            torch,
            torch_lit: false,
            params: None,
            stream: None,
            held: Arc::clone(&self.held),
        }))
    }
}

/// One size a device offers and whether it needs JPEG decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceFormat {
    size: FrameSize,
    mjpeg: bool,
}

/// Collect fixed sizes (device order, raw preferred) and frame rates from device caps
fn parse_device_caps(caps: Option<&gst::Caps>) -> (Vec<SourceFormat>, Vec<u32>) {
    let mut formats: Vec<SourceFormat> = Vec::new();
    let mut rates: Vec<u32> = Vec::new();
    let Some(caps) = caps else {
        return (formats, rates);
    };

    for structure in caps.iter() {
        let mjpeg = match structure.name().as_str() {
            "video/x-raw" => false,
            "image/jpeg" => true,
            _ => continue,
        };
        let (Ok(width), Ok(height)) = (structure.get::<i32>("width"), structure.get::<i32>("height"))
        else {
            continue;
        };
        if width <= 0 || height <= 0 {
            continue;
        }
        let size = FrameSize::new(width as u32, height as u32);

        match formats.iter_mut().find(|format| format.size == size) {
            Some(existing) => existing.mjpeg &= mjpeg,
            None => formats.push(SourceFormat { size, mjpeg }),
        }

        for rate in structure_rates(structure) {
            if !rates.contains(&rate) {
                rates.push(rate);
            }
        }
    }

    rates.sort_unstable();
    (formats, rates)
}

fn structure_rates(structure: &gst::StructureRef) -> Vec<u32> {
    let whole = |fraction: gst::Fraction| -> Option<u32> {
        let (num, den) = (fraction.numer(), fraction.denom());
        (num > 0 && den > 0).then(|| (num as f64 / den as f64).round() as u32)
    };

    if let Ok(fraction) = structure.get::<gst::Fraction>("framerate") {
        return whole(fraction).into_iter().collect();
    }
    if let Ok(list) = structure.get::<gst::List>("framerate") {
        return list
            .iter()
            .filter_map(|value| value.get::<gst::Fraction>().ok())
            .filter_map(whole)
            .collect();
    }
    if let Ok(range) = structure.get::<gst::FractionRange>("framerate") {
        return [range.min(), range.max()]
            .into_iter()
            .filter_map(whole)
            .collect();
    }
    Vec::new()
}

struct Stream {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    writer: Arc<Mutex<Option<SurfaceWriter>>>,
    size: FrameSize,
    frame_rate: u32,
    transform: FrameTransform,
}

impl Stream {
    /// Stop the pipeline and hand back the writer
    fn stop(self) -> Option<SurfaceWriter> {
        self.appsink.set_callbacks(AppSinkCallbacks::builder().build());
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %e, "Failed to stop camera pipeline");
        }
        let (result, state, _) = self
            .pipeline
            .state(gst::ClockTime::from_seconds(timing::STOP_TIMEOUT_SECS));
        debug!(?result, ?state, "Camera pipeline stopped");
        writer
    }
}

/// An opened GStreamer camera
pub struct GstCameraSession {
    device: CameraDevice,
    gst_device: gst::Device,
    capabilities: CameraCapabilities,
    formats: Vec<SourceFormat>,
    controls: SensorControls,
    torch: Vec<FlashDevice>,
    torch_lit: bool,
    params: Option<CaptureParameters>,
    stream: Option<Stream>,
    held: HeldDevices,
}

impl GstCameraSession {
    fn build_stream(
        &self,
        size: FrameSize,
        frame_rate: u32,
        writer: SurfaceWriter,
        transform: FrameTransform,
    ) -> BackendResult<Stream> {
        let failed = |what: &str, e: &dyn std::fmt::Display| {
            BackendError::PipelineFailed(format!("{}: {}", what, e))
        };

        let mjpeg = self
            .formats
            .iter()
            .find(|format| format.size == size)
            .map(|format| format.mjpeg)
            .unwrap_or(false);

        let source = self
            .gst_device
            .create_element(Some("camera_source"))
            .map_err(|e| failed("Failed to create camera source", &e))?;

        let mut source_caps = gst::Caps::builder(if mjpeg { "image/jpeg" } else { "video/x-raw" })
            .field("width", size.width as i32)
            .field("height", size.height as i32);
        if frame_rate > 0 {
            source_caps = source_caps.field("framerate", gst::Fraction::new(frame_rate as i32, 1));
        }
        let source_filter = gst::ElementFactory::make("capsfilter")
            .property("caps", source_caps.build())
            .build()
            .map_err(|e| failed("Failed to create capsfilter", &e))?;

        let decoder = if mjpeg {
            info!("Adding JPEG decoder for MJPEG source");
            Some(
                gst::ElementFactory::make("jpegdec")
                    .build()
                    .map_err(|e| failed("Failed to create jpegdec", &e))?,
            )
        } else {
            None
        };

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .property("n-threads", pipeline::videoconvert_threads())
            .build()
            .map_err(|e| failed("Failed to create videoconvert", &e))?;

        let rgba = gst::Caps::builder("video/x-raw")
            .field("format", pipeline::RAW_FORMAT)
            .build();
        let appsink = AppSink::builder()
            .name("sink")
            .caps(&rgba)
            .max_buffers(pipeline::MAX_BUFFERS)
            .drop(true)
            .sync(false)
            .enable_last_sample(false)
            .build();

        let gst_pipeline = gst::Pipeline::new();
        let mut chain: Vec<&gst::Element> = vec![&source, &source_filter];
        if let Some(decoder) = &decoder {
            chain.push(decoder);
        }
        chain.push(&videoconvert);
        chain.push(appsink.upcast_ref::<gst::Element>());

        gst_pipeline
            .add_many(&chain)
            .map_err(|e| failed("Failed to add elements to pipeline", &e))?;
        gst::Element::link_many(&chain).map_err(|e| failed("Failed to link camera pipeline", &e))?;

        let writer = Arc::new(Mutex::new(Some(writer)));
        let slot = Arc::clone(&writer);
        let mut frames: u64 = 0;
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let info = sample
                        .caps()
                        .and_then(|caps| VideoInfo::from_caps(caps).ok())
                        .ok_or(gst::FlowError::Error)?;
                    let buffer = sample.buffer_owned().ok_or(gst::FlowError::Error)?;
                    if buffer.flags().contains(gst::BufferFlags::CORRUPTED) {
                        debug!("Skipping corrupted camera buffer");
                        return Ok(gst::FlowSuccess::Ok);
                    }
                    let mapped = buffer
                        .into_mapped_buffer_readable()
                        .map_err(|_| gst::FlowError::Error)?;

                    let frame = CameraFrame {
                        width: info.width(),
                        height: info.height(),
                        data: FrameData::from_mapped_buffer(mapped),
                        stride: info.stride()[0] as u32,
                        timestamp_ns: monotonic_ns(),
                        transform,
                    };

                    let writer = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    let Some(writer) = writer.as_ref() else {
                        return Err(gst::FlowError::Flushing);
                    };
                    writer.publish(frame);

                    frames += 1;
                    if frames % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(
                            frame = frames,
                            width = info.width(),
                            height = info.height(),
                            "Camera frame published"
                        );
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        gst_pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| failed("Failed to start camera pipeline", &e))?;
        let (result, state, pending) =
            gst_pipeline.state(gst::ClockTime::from_seconds(timing::START_TIMEOUT_SECS));
        if let Err(e) = result {
            error!(?state, ?pending, "Camera pipeline failed to start");
            let _ = gst_pipeline.set_state(gst::State::Null);
            return Err(failed("Camera pipeline failed to start", &e));
        }

        info!(size = %size, frame_rate, mjpeg, "Camera streaming");
        Ok(Stream {
            pipeline: gst_pipeline,
            appsink,
            writer,
            size,
            frame_rate,
            transform,
        })
    }

    fn set_torch(&mut self, on: bool) -> BackendResult<()> {
        if on == self.torch_lit {
            return Ok(());
        }
        if on && self.torch.is_empty() {
            return Err(BackendError::NotSupported("Camera has no torch".to_string()));
        }
        flash::set_all(&self.torch, on).map_err(|e| BackendError::IoError(e.to_string()))?;
        self.torch_lit = on;
        Ok(())
    }
}

impl CameraSession for GstCameraSession {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn capabilities(&self) -> &CameraCapabilities {
        &self.capabilities
    }

    fn apply(&mut self, params: &CaptureParameters) -> BackendResult<()> {
        if !self.capabilities.sizes.contains(&params.size) {
            return Err(BackendError::FormatNotSupported(params.size.to_string()));
        }

        let restart = self
            .stream
            .as_ref()
            .is_some_and(|stream| stream.size != params.size || stream.frame_rate != params.frame_rate);
        if restart && let Some(stream) = self.stream.take() {
            let transform = stream.transform;
            if let Some(writer) = stream.stop() {
                debug!(size = %params.size, rate = params.frame_rate, "Restarting camera stream");
                self.stream =
                    Some(self.build_stream(params.size, params.frame_rate, writer, transform)?);
            }
        }

        self.set_torch(params.torch)?;
        if let Err(e) = self.controls.apply(&self.device.path, params) {
            warn!(error = %e, "Sensor controls not applied");
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn start_streaming(
        &mut self,
        writer: SurfaceWriter,
        transform: FrameTransform,
    ) -> BackendResult<()> {
        if self.stream.is_some() {
            return Err(BackendError::DeviceBusy);
        }
        let (size, frame_rate) = match &self.params {
            Some(params) => (params.size, params.frame_rate),
            None => {
                let size = self
                    .capabilities
                    .sizes
                    .first()
                    .copied()
                    .ok_or_else(|| BackendError::FormatNotSupported("no sizes".to_string()))?;
                (size, 0)
            }
        };
        self.stream = Some(self.build_stream(size, frame_rate, writer, transform)?);
        Ok(())
    }

    fn stop_streaming(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Dropping the writer frees the surface for the next producer
            drop(stream.stop());
            info!(name = %self.device.name, "Camera stream stopped");
        }
    }

    fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for GstCameraSession {
    fn drop(&mut self) {
        self.stop_streaming();
        if self.torch_lit {
            let _ = flash::set_all(&self.torch, false);
        }
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.device.path);
        debug!(path = %self.device.path, "Camera released");
    }
}
