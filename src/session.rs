// SPDX-License-Identifier: GPL-3.0-only

//! Session controller
//!
//! Sequences preview, recording, review and commit on top of the capture
//! adapter, the render thread, the encoder sidecar, the asset manager and
//! the playback adapter. The host drives it with commands and receives
//! [`SessionListener`] callbacks.
//!
//! Failures that leave devices in an unknown state (camera, storage, encoder,
//! GPU) are reported through `on_error` and followed by a reset: the camera
//! is released, playback stops and a partial recording is deleted.

use crate::backends::camera::{CameraBackend, CaptureSourceAdapter, Facing, FrameSize};
use crate::config::Config;
use crate::constants::timing;
use crate::errors::{CoreError, CoreResult, ErrorKind};
use crate::filters::FilterSelector;
use crate::gpu::{FrameSurface, GpuDevice};
use crate::media::{DecoderFactory, MediaInspector};
use crate::pipelines::video::{
    EncoderBackend, EncoderSidecar, RecordingConfig, RecordingState, RecordingSummary,
};
use crate::playback::PlaybackAdapter;
use crate::renderer::{RenderBackend, RenderThread};
use crate::storage::{AssetManager, VideoAsset};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Callbacks into the host
pub trait SessionListener: Send + Sync {
    fn on_preview_ready(&self, width: u32, height: u32);

    /// May be called from worker threads
    fn on_error(&self, kind: ErrorKind, detail: &str);
}

/// Device and media backends a session runs on
pub struct SessionBackends<D: GpuDevice> {
    pub camera: Arc<dyn CameraBackend>,
    pub encoder: Arc<dyn EncoderBackend<D>>,
    pub inspector: Arc<dyn MediaInspector>,
    pub decoders: Arc<dyn DecoderFactory>,
}

impl<D: GpuDevice> Clone for SessionBackends<D> {
    fn clone(&self) -> Self {
        Self {
            camera: Arc::clone(&self.camera),
            encoder: Arc::clone(&self.encoder),
            inspector: Arc::clone(&self.inspector),
            decoders: Arc::clone(&self.decoders),
        }
    }
}

/// A recording that made it to disk
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedVideo {
    pub video_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Shorter than the configured minimum; the asset was deleted
    TooShort { elapsed_ms: u64 },
    /// Kept for review; commit or cancel next
    Saved {
        video: RecordedVideo,
        summary: RecordingSummary,
    },
}

struct ActiveRecording {
    asset: VideoAsset,
    started: Instant,
}

pub struct SessionController<D: GpuDevice> {
    config: Config,
    listener: Arc<dyn SessionListener>,
    surface: FrameSurface,
    render: RenderThread<D>,
    sidecar: EncoderSidecar<D>,
    capture: CaptureSourceAdapter,
    assets: AssetManager,
    playback: PlaybackAdapter,
    display: Option<FrameSize>,
    suspended: bool,
    preview_requested: bool,
    facing: Facing,
    recording: Option<ActiveRecording>,
    review: Option<VideoAsset>,
    encoder_fault: Arc<AtomicBool>,
}

impl<D: GpuDevice> SessionController<D> {
    /// Spawn the render thread and wire the sidecar and playback listeners
    pub fn new<B>(
        render_backend: B,
        backends: SessionBackends<D>,
        config: Config,
        listener: Arc<dyn SessionListener>,
    ) -> CoreResult<Self>
    where
        B: RenderBackend<Device = D>,
    {
        let surface = FrameSurface::new();
        let sidecar = EncoderSidecar::new(backends.encoder);
        let render = RenderThread::spawn(render_backend, surface.clone(), sidecar.clone())?;
        render.select_filter(config.last_filter);

        let encoder_fault = Arc::new(AtomicBool::new(false));
        {
            let listener = Arc::clone(&listener);
            let fault = Arc::clone(&encoder_fault);
            sidecar.set_error_listener(move |e| {
                fault.store(true, Ordering::SeqCst);
                listener.on_error(e.kind(), &e.to_string());
            });
        }

        let mut playback = PlaybackAdapter::new(backends.decoders);
        {
            let listener = Arc::clone(&listener);
            playback.set_error_listener(move |e| listener.on_error(e.kind(), &e.to_string()));
        }

        let capture = CaptureSourceAdapter::new(backends.camera)
            .with_fps_ceiling(config.preview_fps_ceiling)
            .with_front_mirroring(config.mirror_front_camera);
        let assets = AssetManager::new(config.recordings_root(), backends.inspector);
        let facing = config.last_facing;

        info!(root = %assets.root().display(), facing = %facing, "Session created");
        Ok(Self {
            config,
            listener,
            surface,
            render,
            sidecar,
            capture,
            assets,
            playback,
            display: None,
            suspended: false,
            preview_requested: false,
            facing,
            recording: None,
            review: None,
            encoder_fault,
        })
    }

    // ===== Error handling =====

    /// Report `e` and reset if it leaves devices in an unknown state
    fn fail(&mut self, e: CoreError) -> CoreError {
        error!(error = %e, kind = %e.kind(), "Session command failed");
        self.listener.on_error(e.kind(), &e.to_string());
        if e.requires_reset() {
            self.reset();
        }
        e
    }

    /// Release the camera, stop playback and delete a partial recording
    fn reset(&mut self) {
        warn!("Resetting session");
        self.render.set_recording_enabled(false);
        if let Some(mut recording) = self.recording.take() {
            if let Err(e) = self.sidecar.cancel_recording() {
                warn!(error = %e, "Encoder did not cancel cleanly");
            }
            if let Err(e) = self.assets.discard(&mut recording.asset) {
                warn!(error = %e, "Failed to delete partial recording");
            }
        }
        self.playback.stop();
        self.render.set_playback_mode(false);
        self.capture.close();
        self.encoder_fault.store(false, Ordering::SeqCst);
    }

    /// Reset after an encoder failure the sidecar already reported
    ///
    /// Returns whether a fault was pending.
    fn recover_encoder_fault(&mut self) -> bool {
        if !self.encoder_fault.swap(false, Ordering::SeqCst) {
            return false;
        }
        warn!("Encoder failed while recording");
        self.reset();
        true
    }

    fn encoder_faulted(&self) -> bool {
        self.encoder_fault.load(Ordering::SeqCst)
    }

    fn guard<T>(&mut self, result: CoreResult<T>) -> CoreResult<T> {
        result.map_err(|e| self.fail(e))
    }

    fn can_show_frames(&self) -> bool {
        self.display.is_some() && !self.suspended
    }

    // ===== Preview =====

    /// Open the camera facing `facing` and stream it to the display
    ///
    /// Without an attached display the request is remembered and the
    /// preview starts on [`attach_display`](Self::attach_display).
    pub fn start_preview(&mut self, facing: Facing) -> CoreResult<()> {
        self.recover_encoder_fault();
        if self.capture.is_open() && self.capture.facing() != Some(facing) {
            self.close_camera();
        }
        self.facing = facing;
        self.config.last_facing = facing;
        self.preview_requested = true;

        if !self.can_show_frames() {
            debug!(facing = %facing, "Preview deferred until a display is attached");
            return Ok(());
        }
        let result = self.show_preview();
        self.guard(result)
    }

    fn show_preview(&mut self) -> CoreResult<()> {
        let display = self
            .display
            .ok_or_else(|| CoreError::GpuUnavailable("No display attached".to_string()))?;

        self.playback.stop();
        self.render.set_playback_mode(false);

        if !self.capture.is_open() {
            self.capture.open(self.facing)?;
        }
        let format = match self.capture.negotiated() {
            Some(format) => format,
            None => {
                let preferred = self.config.recording_size.unwrap_or(display);
                self.capture.configure(preferred)?
            }
        };

        if !self.capture.is_streaming() {
            self.render.set_incoming_size(format.size);
            self.capture.attach_output_surface(&self.surface)?;
        }

        info!(size = %format.size, frame_rate = format.frame_rate, "Preview running");
        self.listener
            .on_preview_ready(format.size.width, format.size.height);
        Ok(())
    }

    fn close_camera(&mut self) {
        if self.capture.torch_on()
            && let Err(e) = self.capture.set_flash(false)
        {
            warn!(error = %e, "Failed to turn torch off");
        }
        self.capture.close();
    }

    /// Switch between front and back camera, torch off first
    pub fn switch_camera(&mut self) -> CoreResult<()> {
        self.recover_encoder_fault();
        if self.recording.is_some() {
            let e = CoreError::UnsupportedOperation(
                "Cannot switch camera while recording".to_string(),
            );
            return Err(self.fail(e));
        }
        let target = self.facing.opposite();
        info!(from = %self.facing, to = %target, "Switching camera");
        self.close_camera();
        self.start_preview(target)
    }

    /// Toggle the torch; returns whether it is now lit
    pub fn toggle_flash(&mut self) -> CoreResult<bool> {
        self.recover_encoder_fault();
        if !self.capture.is_open() {
            let e = CoreError::UnsupportedOperation("No camera open".to_string());
            return Err(self.fail(e));
        }
        let target = !self.capture.torch_on();
        let result = self.capture.set_flash(target);
        self.guard(result)?;
        Ok(self.capture.torch_on())
    }

    /// Takes effect on the next draw cycle
    pub fn select_filter(&mut self, selector: FilterSelector) {
        self.recover_encoder_fault();
        self.render.select_filter(selector);
        self.config.last_filter = selector;
    }

    // ===== Recording =====

    /// Start recording into `<root>/<key>/`
    pub fn start_record(&mut self, key: &str) -> CoreResult<()> {
        self.recover_encoder_fault();
        if self.recording.is_some() || self.sidecar.state() != RecordingState::Off {
            return Err(self.fail(CoreError::EncoderBusy));
        }
        if !self.capture.is_streaming() {
            let e = CoreError::UnsupportedOperation("Preview is not running".to_string());
            return Err(self.fail(e));
        }
        let result = self.begin_recording(key);
        self.guard(result)
    }

    fn begin_recording(&mut self, key: &str) -> CoreResult<()> {
        let context = self
            .render
            .shared_context()
            .ok_or_else(|| CoreError::GpuUnavailable("No display context".to_string()))?;
        let format = self
            .capture
            .negotiated()
            .ok_or_else(|| CoreError::DeviceUnavailable("Camera is not configured".to_string()))?;

        if let Some(mut stale) = self.review.take() {
            debug!(key = stale.key(), "Dropping unreviewed recording");
            self.playback.stop();
            self.assets.discard(&mut stale)?;
        }

        let mut asset = self.assets.create_output_location(key)?;
        let config = RecordingConfig {
            output_path: asset.video_path().to_path_buf(),
            width: format.size.width,
            height: format.size.height,
            bitrate_bps: self.config.bitrate_bps(format.size.width, format.size.height),
            frame_rate: format.frame_rate,
        };

        self.encoder_fault.store(false, Ordering::SeqCst);
        if let Err(e) = self.sidecar.start_recording(config, &context) {
            let _ = self.assets.discard(&mut asset);
            return Err(e);
        }

        self.render.set_recording_enabled(true);
        self.recording = Some(ActiveRecording {
            asset,
            started: Instant::now(),
        });
        info!(key, "Recording started");
        Ok(())
    }

    /// Finish the recording and enter review
    ///
    /// Recordings shorter than the configured minimum are deleted and
    /// reported as [`RecordOutcome::TooShort`]; that is not an error.
    pub fn stop_record(&mut self) -> CoreResult<RecordOutcome> {
        if self.recover_encoder_fault() {
            return Err(CoreError::EncodingFailed(
                "Encoder failed while recording".to_string(),
            ));
        }
        let Some(recording) = self.recording.take() else {
            let e = CoreError::UnsupportedOperation("Not recording".to_string());
            return Err(self.fail(e));
        };
        self.render.set_recording_enabled(false);

        let result = self.finish_recording(recording);
        match result {
            Err(e) if self.encoder_fault.swap(false, Ordering::SeqCst) => {
                // Already reported by the sidecar listener
                self.reset();
                Err(e)
            }
            other => self.guard(other),
        }
    }

    fn finish_recording(&mut self, recording: ActiveRecording) -> CoreResult<RecordOutcome> {
        let ActiveRecording { mut asset, started } = recording;
        let elapsed = started.elapsed();
        let minimum = self.config.min_duration();

        if elapsed < minimum {
            info!(elapsed_ms = elapsed.as_millis() as u64, "Recording too short, discarding");
            if let Err(e) = self.sidecar.cancel_recording() {
                warn!(error = %e, "Encoder did not cancel cleanly");
            }
            self.assets.discard(&mut asset)?;
            return Ok(RecordOutcome::TooShort {
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        self.sidecar.stop_recording();
        let summary = match self.sidecar.wait_for_stop(timing::RECORDING_STOP_TIMEOUT) {
            Ok(Some(summary)) => summary,
            Ok(None) => {
                let _ = self.assets.discard(&mut asset);
                return Err(CoreError::EncodingFailed(
                    "Recording ended without output".to_string(),
                ));
            }
            Err(e) => {
                let _ = self.assets.discard(&mut asset);
                return Err(e);
            }
        };

        let info = self.assets.probe(&mut asset);
        if info.is_empty() || Duration::from_millis(info.duration_ms) < minimum {
            info!(
                duration_ms = info.duration_ms,
                frames = summary.frames,
                "Recorded file below minimum duration, discarding"
            );
            self.assets.discard(&mut asset)?;
            return Ok(RecordOutcome::TooShort {
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        info!(
            path = %asset.video_path().display(),
            width = info.width,
            height = info.height,
            duration_ms = info.duration_ms,
            frames = summary.frames,
            resumed = summary.resumed,
            "Recording saved"
        );
        let video = recorded_video(&asset);
        self.review = Some(asset);

        if self.can_show_frames() {
            self.show_review()?;
        }
        Ok(RecordOutcome::Saved { video, summary })
    }

    /// Abort a recording, or drop the recording under review
    pub fn cancel_record(&mut self) -> CoreResult<()> {
        if self.recover_encoder_fault() {
            return Ok(());
        }
        if let Some(mut recording) = self.recording.take() {
            info!("Cancelling recording");
            self.render.set_recording_enabled(false);
            let cancelled = self.sidecar.cancel_recording();
            let discarded = self.assets.discard(&mut recording.asset);
            return self.guard(cancelled.and(discarded));
        }

        if let Some(mut asset) = self.review.take() {
            info!(key = asset.key(), "Discarding reviewed recording");
            self.playback.stop();
            self.render.set_playback_mode(false);
            let discarded = self.assets.discard(&mut asset);
            self.guard(discarded)?;
            return self.return_to_preview();
        }
        Ok(())
    }

    /// Keep the reviewed recording and return to preview
    pub fn commit_record(&mut self) -> CoreResult<RecordedVideo> {
        self.recover_encoder_fault();
        let Some(mut asset) = self.review.take() else {
            let e = CoreError::UnsupportedOperation("No recording to commit".to_string());
            return Err(self.fail(e));
        };
        self.playback.stop();
        self.render.set_playback_mode(false);

        let thumbnail = self.assets.generate_thumbnail(&asset);
        self.guard(thumbnail)?;
        self.assets.probe(&mut asset);
        let video = recorded_video(&asset);
        info!(path = %video.video_path.display(), "Recording committed");

        self.return_to_preview()?;
        Ok(video)
    }

    fn return_to_preview(&mut self) -> CoreResult<()> {
        if self.preview_requested && self.can_show_frames() {
            let result = self.show_preview();
            self.guard(result)?;
        }
        Ok(())
    }

    // ===== Review playback =====

    /// Play the recording under review through the renderer
    pub fn start_playback(&mut self) -> CoreResult<()> {
        self.recover_encoder_fault();
        if self.review.is_none() {
            let e = CoreError::UnsupportedOperation("No recording to play".to_string());
            return Err(self.fail(e));
        }
        if !self.can_show_frames() {
            debug!("Playback deferred until a display is attached");
            return Ok(());
        }
        let result = self.show_review();
        self.guard(result)
    }

    fn show_review(&mut self) -> CoreResult<()> {
        let Some(asset) = &self.review else {
            return Ok(());
        };
        self.capture.detach_output_surface();
        self.render.set_playback_mode(true);
        self.playback.play(asset)
    }

    /// Stop review playback and go back to the camera
    pub fn stop_playback(&mut self) -> CoreResult<()> {
        self.recover_encoder_fault();
        self.playback.stop();
        self.render.set_playback_mode(false);
        self.return_to_preview()
    }

    // ===== Display lifecycle =====

    /// Display surface created
    pub fn attach_display(&mut self, width: u32, height: u32) -> CoreResult<()> {
        self.recover_encoder_fault();
        let size = FrameSize::new(width, height);
        if self.display.is_some() {
            self.display = Some(size);
            self.render.surface_changed(size);
            return Ok(());
        }

        self.display = Some(size);
        self.playback.attach_surface(self.surface.clone());
        if self.suspended {
            return Ok(());
        }
        let created = self.render.surface_created(size);
        self.guard(created)?;
        self.restart_frame_source()
    }

    /// Display surface destroyed; the camera stays open
    pub fn detach_display(&mut self) {
        self.recover_encoder_fault();
        debug!("Display detached");
        self.playback.detach_surface();
        self.capture.detach_output_surface();
        self.render.surface_lost();
        self.display = None;
    }

    fn restart_frame_source(&mut self) -> CoreResult<()> {
        if self.review.is_some() {
            let result = self.show_review();
            self.guard(result)
        } else if self.preview_requested {
            let result = self.show_preview();
            self.guard(result)
        } else {
            Ok(())
        }
    }

    /// Host went to the background
    ///
    /// A running recording is stopped (subject to the minimum duration),
    /// playback and camera are released and the display context is dropped.
    pub fn suspend(&mut self) -> CoreResult<Option<RecordOutcome>> {
        if self.suspended {
            return Ok(None);
        }
        self.recover_encoder_fault();
        info!("Suspending session");
        self.suspended = true;

        let outcome = if self.recording.is_some() {
            Some(self.stop_record())
        } else {
            None
        };
        self.playback.stop();
        self.close_camera();
        self.render.surface_lost();
        outcome.transpose()
    }

    /// Host back in the foreground
    pub fn resume(&mut self) -> CoreResult<()> {
        if !self.suspended {
            return Ok(());
        }
        self.recover_encoder_fault();
        info!("Resuming session");
        self.suspended = false;
        let Some(display) = self.display else {
            return Ok(());
        };
        let created = self.render.surface_created(display);
        self.guard(created)?;
        self.restart_frame_source()
    }

    // ===== Queries =====

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn torch_on(&self) -> bool {
        self.capture.torch_on()
    }

    pub fn is_previewing(&self) -> bool {
        self.capture.is_streaming()
    }

    /// False once the encoder has failed, before the reset has run
    pub fn is_recording(&self) -> bool {
        self.recording.is_some() && !self.encoder_faulted()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_active()
    }

    pub fn recording_state(&self) -> RecordingState {
        self.sidecar.state()
    }

    pub fn review_asset(&self) -> Option<&VideoAsset> {
        self.review.as_ref()
    }

    pub fn capture(&self) -> &CaptureSourceAdapter {
        &self.capture
    }

    pub fn render(&self) -> &RenderThread<D> {
        &self.render
    }

    pub fn max_duration(&self) -> Duration {
        self.config.max_duration()
    }

    pub fn recording_elapsed(&self) -> Option<Duration> {
        if self.encoder_faulted() {
            return None;
        }
        self.recording.as_ref().map(|r| r.started.elapsed())
    }

    /// The host should call [`stop_record`](Self::stop_record) now
    pub fn should_auto_stop(&self) -> bool {
        self.recording_elapsed()
            .is_some_and(|elapsed| elapsed >= self.config.max_duration())
    }
}

fn recorded_video(asset: &VideoAsset) -> RecordedVideo {
    RecordedVideo {
        video_path: asset.video_path().to_path_buf(),
        thumbnail_path: asset.thumbnail_path().to_path_buf(),
        width: asset.width(),
        height: asset.height(),
        duration_ms: asset.duration_ms(),
    }
}

impl<D: GpuDevice> Drop for SessionController<D> {
    fn drop(&mut self) {
        self.render.set_recording_enabled(false);
        if let Some(mut recording) = self.recording.take() {
            self.sidecar.shutdown();
            let _ = self.assets.discard(&mut recording.asset);
        }
        self.playback.stop();
        self.close_camera();
        debug!("Session closed");
    }
}
