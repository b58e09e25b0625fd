// SPDX-License-Identifier: GPL-3.0-only

//! Video decoding for review playback
//!
//! A decoder yields RGBA [`CameraFrame`]s paced at the file's native rate.
//! Reaching the end of the stream is reported separately so the caller can
//! rewind and loop.

use super::inspect::{decode_pipeline, wait_for_preroll};
use crate::backends::camera::types::{
    CameraFrame, FrameData, FrameSize, FrameTransform, monotonic_ns,
};
use crate::constants::timing;
use crate::errors::{CoreError, CoreResult};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one poll of a decoder
#[derive(Debug)]
pub enum DecodedFrame {
    Frame(CameraFrame),
    /// Nothing decoded within the poll timeout
    Pending,
    EndOfStream,
}

pub trait MediaDecoder: Send {
    fn size(&self) -> FrameSize;

    /// Wait up to `timeout` for the next frame
    fn next_frame(&mut self, timeout: Duration) -> CoreResult<DecodedFrame>;

    /// Seek back to the first frame
    fn rewind(&mut self) -> CoreResult<()>;
}

/// Opens decoders for finished recordings
pub trait DecoderFactory: Send + Sync {
    fn open(&self, path: &Path) -> CoreResult<Box<dyn MediaDecoder>>;
}

/// GStreamer-backed [`DecoderFactory`]
#[derive(Debug, Default, Clone, Copy)]
pub struct GstDecoderFactory;

impl DecoderFactory for GstDecoderFactory {
    fn open(&self, path: &Path) -> CoreResult<Box<dyn MediaDecoder>> {
        Ok(Box::new(GstVideoDecoder::new(path)?))
    }
}

/// Real-time decoder over `filesrc ! decodebin ! appsink sync=true`
pub struct GstVideoDecoder {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    size: FrameSize,
    frames: u64,
}

impl GstVideoDecoder {
    pub fn new(path: &Path) -> CoreResult<Self> {
        info!(path = %path.display(), "Creating playback decoder");
        let (pipeline, appsink) = decode_pipeline(path, true)?;

        let prepared = (|| -> CoreResult<FrameSize> {
            pipeline
                .set_state(gst::State::Paused)
                .map_err(|e| CoreError::StorageUnavailable(format!("Failed to pause decoder: {:?}", e)))?;
            wait_for_preroll(&pipeline, Duration::from_secs(timing::PROBE_TIMEOUT_SECS))?;

            let size = appsink
                .static_pad("sink")
                .and_then(|pad| pad.current_caps())
                .and_then(|caps| VideoInfo::from_caps(&caps).ok())
                .map(|info| FrameSize::new(info.width(), info.height()))
                .unwrap_or_default();
            if size.is_empty() {
                return Err(CoreError::StorageUnavailable(
                    "Failed to determine video dimensions".to_string(),
                ));
            }

            pipeline
                .set_state(gst::State::Playing)
                .map_err(|e| CoreError::StorageUnavailable(format!("Failed to start decoder: {:?}", e)))?;
            Ok(size)
        })();

        match prepared {
            Ok(size) => {
                info!(size = %size, "Playback decoder ready");
                Ok(Self {
                    pipeline,
                    appsink,
                    size,
                    frames: 0,
                })
            }
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                Err(e)
            }
        }
    }

    fn check_bus(&self) -> CoreResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Err(CoreError::StorageUnavailable(format!(
                    "Playback error: {}",
                    err.error()
                )));
            }
        }
        Ok(())
    }
}

impl MediaDecoder for GstVideoDecoder {
    fn size(&self) -> FrameSize {
        self.size
    }

    fn next_frame(&mut self, timeout: Duration) -> CoreResult<DecodedFrame> {
        self.check_bus()?;

        let Some(sample) = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_nseconds(timeout.as_nanos() as u64))
        else {
            return Ok(if self.appsink.is_eos() {
                DecodedFrame::EndOfStream
            } else {
                DecodedFrame::Pending
            });
        };

        let info = sample
            .caps()
            .and_then(|caps| VideoInfo::from_caps(caps).ok())
            .ok_or_else(|| CoreError::StorageUnavailable("Decoded sample has no caps".to_string()))?;
        let buffer = sample
            .buffer_owned()
            .ok_or_else(|| CoreError::StorageUnavailable("Decoded sample has no buffer".to_string()))?;
        let mapped = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| CoreError::StorageUnavailable("Failed to map decoded buffer".to_string()))?;

        self.frames += 1;
        if self.frames % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(frame = self.frames, "Playback frame decoded");
        }

        Ok(DecodedFrame::Frame(CameraFrame {
            width: info.width(),
            height: info.height(),
            data: FrameData::from_mapped_buffer(mapped),
            stride: info.stride()[0] as u32,
            timestamp_ns: monotonic_ns(),
            transform: FrameTransform::IDENTITY,
        }))
    }

    fn rewind(&mut self) -> CoreResult<()> {
        debug!(frames = self.frames, "Rewinding playback");
        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::ZERO,
            )
            .map_err(|e| CoreError::StorageUnavailable(format!("Rewind failed: {}", e)))
    }
}

impl Drop for GstVideoDecoder {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(?e, "Failed to stop playback decoder");
        }
        debug!(frames = self.frames, "Playback decoder stopped");
    }
}
