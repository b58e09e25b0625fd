// SPDX-License-Identifier: GPL-3.0-only

//! Finished-file inspection
//!
//! Reads width, height and duration from a recorded container and decodes
//! single frames for thumbnails. The GStreamer implementation prerolls a
//! `filesrc ! decodebin ! videoconvert ! appsink` pipeline in `PAUSED`.

use crate::constants::timing;
use crate::errors::{CoreError, CoreResult};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stream properties of a finished recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
}

impl MediaInfo {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Reads metadata and frames out of finished files
pub trait MediaInspector: Send + Sync {
    fn probe(&self, path: &Path) -> CoreResult<MediaInfo>;

    /// Decode the frame nearest `position`
    fn extract_frame(&self, path: &Path, position: Duration) -> CoreResult<image::RgbaImage>;
}

/// [`MediaInspector`] backed by a GStreamer decode pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct GstMediaInspector;

fn inspect_error(msg: impl std::fmt::Display) -> CoreError {
    CoreError::StorageUnavailable(msg.to_string())
}

/// Build `filesrc ! decodebin ! videoconvert ! RGBA appsink` for `path`
pub(crate) fn decode_pipeline(path: &Path, sync: bool) -> CoreResult<(gst::Pipeline, AppSink)> {
    gst::init().map_err(|e| inspect_error(format!("GStreamer init failed: {}", e)))?;

    let description = format!(
        "filesrc name=src ! decodebin ! queue ! videoconvert ! video/x-raw,format=RGBA ! \
         appsink name=sink max-buffers=1 drop=true sync={}",
        sync
    );
    let pipeline = gst::parse::launch(&description)
        .map_err(|e| inspect_error(format!("Failed to create decode pipeline: {}", e)))?
        .downcast::<gst::Pipeline>()
        .map_err(|_| inspect_error("Failed to downcast to Pipeline"))?;

    // Set as a property so paths never need quoting in the description
    let source = pipeline
        .by_name("src")
        .ok_or_else(|| inspect_error("Failed to find filesrc"))?;
    source.set_property("location", path.to_string_lossy().to_string());

    let appsink = pipeline
        .by_name("sink")
        .ok_or_else(|| inspect_error("Failed to find appsink"))?
        .downcast::<AppSink>()
        .map_err(|_| inspect_error("Failed to downcast to AppSink"))?;

    Ok((pipeline, appsink))
}

/// Wait for preroll; bus errors fail, a timeout does not
pub(crate) fn wait_for_preroll(pipeline: &gst::Pipeline, timeout: Duration) -> CoreResult<()> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| inspect_error("No bus on pipeline"))?;
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) else {
            continue;
        };
        match msg.view() {
            gst::MessageView::Error(err) => {
                return Err(inspect_error(format!(
                    "Decode pipeline error: {}",
                    err.error()
                )));
            }
            gst::MessageView::AsyncDone(_) => return Ok(()),
            _ => {}
        }
    }
    warn!("Timed out waiting for decode pipeline preroll");
    Ok(())
}

/// Copy a decoded RGBA sample into a tightly packed image
pub(crate) fn sample_to_image(sample: &gst::Sample) -> CoreResult<image::RgbaImage> {
    let info = sample
        .caps()
        .and_then(|caps| VideoInfo::from_caps(caps).ok())
        .ok_or_else(|| inspect_error("Sample has no video caps"))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| inspect_error("Sample has no buffer"))?;
    let map = buffer
        .map_readable()
        .map_err(|_| inspect_error("Failed to map buffer"))?;

    let (width, height) = (info.width(), info.height());
    let stride = info.stride()[0] as usize;
    let row_bytes = width as usize * 4;
    let data = map.as_slice();
    if height == 0 || stride < row_bytes || data.len() < stride * (height as usize - 1) + row_bytes {
        return Err(inspect_error("Decoded buffer smaller than its caps"));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_bytes]);
    }
    image::RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| inspect_error("Decoded frame has inconsistent size"))
}

impl MediaInspector for GstMediaInspector {
    fn probe(&self, path: &Path) -> CoreResult<MediaInfo> {
        debug!(path = %path.display(), "Probing recording");
        let (pipeline, appsink) = decode_pipeline(path, false)?;

        let result = (|| -> CoreResult<MediaInfo> {
            pipeline
                .set_state(gst::State::Paused)
                .map_err(|e| inspect_error(format!("Failed to pause pipeline: {:?}", e)))?;
            wait_for_preroll(&pipeline, Duration::from_secs(timing::PROBE_TIMEOUT_SECS))?;

            let sample = appsink
                .try_pull_preroll(gst::ClockTime::from_seconds(timing::PROBE_TIMEOUT_SECS))
                .ok_or_else(|| inspect_error("No preroll frame"))?;
            let video = sample
                .caps()
                .and_then(|caps| VideoInfo::from_caps(caps).ok())
                .ok_or_else(|| inspect_error("Preroll frame has no video caps"))?;
            let duration_ms = pipeline
                .query_duration::<gst::ClockTime>()
                .map(|duration| duration.mseconds())
                .unwrap_or(0);

            Ok(MediaInfo {
                width: video.width(),
                height: video.height(),
                duration_ms,
            })
        })();

        let _ = pipeline.set_state(gst::State::Null);
        if let Ok(info) = &result {
            info!(
                path = %path.display(),
                width = info.width,
                height = info.height,
                duration_ms = info.duration_ms,
                "Recording probed"
            );
        }
        result
    }

    fn extract_frame(&self, path: &Path, position: Duration) -> CoreResult<image::RgbaImage> {
        debug!(path = %path.display(), ?position, "Extracting frame");
        let (pipeline, appsink) = decode_pipeline(path, false)?;

        let result = (|| -> CoreResult<image::RgbaImage> {
            pipeline
                .set_state(gst::State::Paused)
                .map_err(|e| inspect_error(format!("Failed to pause pipeline: {:?}", e)))?;
            wait_for_preroll(&pipeline, Duration::from_secs(timing::PROBE_TIMEOUT_SECS))?;

            if !position.is_zero()
                && let Err(e) = pipeline.seek_simple(
                    gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                    gst::ClockTime::from_nseconds(position.as_nanos() as u64),
                )
            {
                warn!(?e, "Seek failed, using the first frame");
            }

            pipeline
                .set_state(gst::State::Playing)
                .map_err(|e| inspect_error(format!("Failed to start pipeline: {:?}", e)))?;
            let sample = appsink
                .try_pull_sample(gst::ClockTime::from_seconds(timing::PROBE_TIMEOUT_SECS))
                .ok_or_else(|| inspect_error("Timed out waiting for a decoded frame"))?;
            sample_to_image(&sample)
        })();

        let _ = pipeline.set_state(gst::State::Null);
        result
    }
}
