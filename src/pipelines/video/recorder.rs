// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer encoder session fed from the shared GPU texture
//!
//! Each forwarded frame is drawn through the frame program into an
//! encoder-owned target, read back and pushed into:
//!
//! ```text
//! appsrc (RGBA) ! queue ! videoconvert ! <encoder> ! <parser> ! mp4mux ! filesink
//! ```

use super::muxer::{create_muxer, link_muxer_to_sink, link_video_to_muxer};
use super::sidecar::{EncoderBackend, EncoderSession, ForwardedFrame, RecordingConfig};
use crate::constants::{pipeline, timing};
use crate::errors::{CoreError, CoreResult};
use crate::filters::FilterSelector;
use crate::gpu::{GpuContextHandle, WgpuDevice, wgpu};
use crate::media::encoders::select_video_encoder;
use crate::shaders::{
    CachedDimensions, FrameProgram, create_frame_texture, padded_bytes_per_row,
    read_buffer_async, unpad_rows,
};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn encoding_failed(message: impl Into<String>) -> CoreError {
    CoreError::EncodingFailed(message.into())
}

/// Opens [`GstEncoderSession`]s on the wgpu device
#[derive(Debug, Default, Clone, Copy)]
pub struct GstEncoderBackend;

impl EncoderBackend<WgpuDevice> for GstEncoderBackend {
    fn open(
        &self,
        config: &RecordingConfig,
        context: GpuContextHandle<WgpuDevice>,
    ) -> CoreResult<Box<dyn EncoderSession<WgpuDevice>>> {
        let session = GstEncoderSession::open(config, context)?;
        Ok(Box::new(session))
    }
}

/// Draws forwarded frames into an encoder-sized target and reads them back
struct FrameReadback {
    gpu: WgpuDevice,
    program: FrameProgram,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    filter: Option<FilterSelector>,
    source_size: CachedDimensions,
}

impl FrameReadback {
    fn new(gpu: &WgpuDevice, width: u32, height: u32) -> Self {
        let program = FrameProgram::new(gpu, "encoder_frame_program");
        let target = create_frame_texture(&gpu.device, "encoder_target", width, height);
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("encoder_readback_buffer"),
            size: u64::from(padded_bytes_per_row(width)) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        debug!(width, height, device = %gpu.info.adapter_name, "Created encoder readback");
        Self {
            gpu: gpu.clone(),
            program,
            target,
            target_view,
            buffer,
            width,
            height,
            filter: None,
            source_size: CachedDimensions::default(),
        }
    }

    fn uses_device(&self, gpu: &WgpuDevice) -> bool {
        Arc::ptr_eq(&self.gpu.device, &gpu.device)
    }

    /// Render `source` with the frame's filter and return tightly packed RGBA
    fn render(&mut self, frame: &ForwardedFrame, source: &wgpu::Texture) -> CoreResult<Vec<u8>> {
        if self.filter != Some(frame.filter.selector) {
            self.program.use_filter(frame.filter);
            self.filter = Some(frame.filter.selector);
        }
        let (src_w, src_h) = (source.width(), source.height());
        if self.source_size.needs_update(src_w, src_h) {
            self.program.set_texture_size(src_w, src_h);
            self.source_size.update(src_w, src_h);
        }

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("encoder_frame"),
            });
        self.program
            .encode(&mut encoder, source, &self.target_view, &frame.transform);
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row(self.width)),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let padded = pollster::block_on(read_buffer_async(&self.gpu.device, &self.buffer))
            .map_err(encoding_failed)?;
        Ok(unpad_rows(&padded, self.width, self.height))
    }
}

/// One recording: appsrc-fed GStreamer pipeline plus GPU readback
pub struct GstEncoderSession {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    output_path: PathBuf,
    readback: FrameReadback,
    frame_duration: gst::ClockTime,
}

impl GstEncoderSession {
    fn open(config: &RecordingConfig, context: GpuContextHandle<WgpuDevice>) -> CoreResult<Self> {
        gst::init().map_err(|e| encoding_failed(format!("Failed to initialize GStreamer: {}", e)))?;

        // Encoders require even dimensions
        let width = config.width & !1;
        let height = config.height & !1;
        if width == 0 || height == 0 {
            return Err(encoding_failed(format!(
                "Invalid recording size {}x{}",
                config.width, config.height
            )));
        }
        let fps = config.frame_rate.max(1);
        let bitrate_kbps = (config.bitrate_bps / 1000).max(1);

        let encoders = select_video_encoder(bitrate_kbps).map_err(encoding_failed)?;
        info!(
            encoder = encoders.spec.element_name,
            codec = ?encoders.spec.codec,
            width,
            height,
            fps,
            bitrate_kbps,
            "Opening encoder session"
        );

        let video_info =
            gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgba, width, height)
                .fps(gst::Fraction::new(fps as i32, 1))
                .build()
                .map_err(|e| encoding_failed(format!("Invalid video info: {}", e)))?;
        let caps = video_info
            .to_caps()
            .map_err(|e| encoding_failed(format!("Failed to build caps: {}", e)))?;

        let appsrc = gst_app::AppSrc::builder()
            .name("encoder_src")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();

        let queue = gst::ElementFactory::make("queue")
            .build()
            .map_err(|e| encoding_failed(format!("Failed to create queue: {}", e)))?;
        let videoconvert = gst::ElementFactory::make("videoconvert")
            .property("n-threads", pipeline::videoconvert_threads())
            .build()
            .map_err(|e| encoding_failed(format!("Failed to create videoconvert: {}", e)))?;
        let muxer_config = create_muxer(&config.output_path).map_err(encoding_failed)?;

        let pipeline = gst::Pipeline::new();
        let mut elements: Vec<&gst::Element> = vec![
            appsrc.upcast_ref::<gst::Element>(),
            &queue,
            &videoconvert,
            &encoders.encoder,
        ];
        if let Some(parser) = &encoders.parser {
            elements.push(parser);
        }
        elements.push(&muxer_config.muxer);
        elements.push(&muxer_config.filesink);

        pipeline
            .add_many(&elements)
            .map_err(|e| encoding_failed(format!("Failed to add elements to pipeline: {}", e)))?;
        gst::Element::link_many([
            appsrc.upcast_ref::<gst::Element>(),
            &queue,
            &videoconvert,
            &encoders.encoder,
        ])
        .map_err(|_| encoding_failed("Failed to link encoder input chain"))?;

        let encoded = match &encoders.parser {
            Some(parser) => {
                encoders
                    .encoder
                    .link(parser)
                    .map_err(|_| encoding_failed("Failed to link encoder to parser"))?;
                parser
            }
            None => &encoders.encoder,
        };
        link_video_to_muxer(encoded, &muxer_config.muxer).map_err(encoding_failed)?;
        link_muxer_to_sink(&muxer_config.muxer, &muxer_config.filesink)
            .map_err(encoding_failed)?;

        let readback = FrameReadback::new(context.device(), width, height);

        let session = Self {
            pipeline,
            appsrc,
            output_path: muxer_config.output_path,
            readback,
            frame_duration: gst::ClockTime::from_nseconds(1_000_000_000 / u64::from(fps)),
        };

        if let Err(e) = session.pipeline.set_state(gst::State::Playing) {
            let _ = session.pipeline.set_state(gst::State::Null);
            let _ = std::fs::remove_file(&session.output_path);
            return Err(encoding_failed(format!("Failed to start encoder pipeline: {}", e)));
        }
        session.check_bus(gst::ClockTime::ZERO)?;

        Ok(session)
    }

    /// Surface any pipeline error posted since the last check
    fn check_bus(&self, timeout: gst::ClockTime) -> CoreResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Err(encoding_failed("Encoder pipeline has no bus"));
        };
        while let Some(msg) = bus.timed_pop_filtered(
            timeout,
            &[gst::MessageType::Error, gst::MessageType::Warning],
        ) {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    error!(
                        error = %err.error(),
                        debug = ?err.debug(),
                        source = ?err.src().map(|s| s.name()),
                        "Encoder pipeline error"
                    );
                    return Err(encoding_failed(err.error().to_string()));
                }
                gst::MessageView::Warning(w) => {
                    warn!(
                        warning = %w.error(),
                        source = ?w.src().map(|s| s.name()),
                        "Encoder pipeline warning"
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn teardown(&self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %e, "Failed to stop encoder pipeline");
        }
    }
}

impl EncoderSession<WgpuDevice> for GstEncoderSession {
    fn encode_frame(
        &mut self,
        frame: &ForwardedFrame,
        texture: &Arc<wgpu::Texture>,
        pts_ns: u64,
    ) -> CoreResult<()> {
        let pixels = self.readback.render(frame, texture)?;

        let mut buffer = gst::Buffer::from_mut_slice(pixels);
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| encoding_failed("Encoder buffer is not writable"))?;
            buffer.set_pts(gst::ClockTime::from_nseconds(pts_ns));
            buffer.set_duration(self.frame_duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| encoding_failed(format!("Failed to push frame: {:?}", e)))?;
        Ok(())
    }

    fn drain(&mut self, end_of_stream: bool) -> CoreResult<()> {
        if end_of_stream {
            debug!("Draining encoder before end of stream");
        }
        self.check_bus(gst::ClockTime::ZERO)
    }

    fn rebind(&mut self, context: GpuContextHandle<WgpuDevice>) -> CoreResult<()> {
        let gpu = context.device();
        if !self.readback.uses_device(gpu) {
            info!(device = %gpu.info.adapter_name, "Recreating encoder readback on new device");
            self.readback = FrameReadback::new(gpu, self.readback.width, self.readback.height);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> CoreResult<()> {
        info!(path = %self.output_path.display(), "Finalizing recording");
        if self.appsrc.end_of_stream().is_err() {
            warn!("Failed to send end of stream to appsrc");
        }

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| encoding_failed("Encoder pipeline has no bus"))?;
        let outcome = match bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(timing::EOS_TIMEOUT_SECS),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        ) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(..) => Ok(()),
                gst::MessageView::Error(err) => {
                    Err(encoding_failed(format!("Muxer failed: {}", err.error())))
                }
                _ => Ok(()),
            },
            None => Err(encoding_failed("Timed out waiting for end of stream")),
        };

        self.teardown();
        outcome
    }

    fn abort(self: Box<Self>) {
        self.teardown();
        match std::fs::remove_file(&self.output_path) {
            Ok(()) => info!(path = %self.output_path.display(), "Removed partial recording"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.output_path.display(), error = %e, "Failed to remove partial recording"),
        }
    }
}

impl Drop for GstEncoderSession {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
