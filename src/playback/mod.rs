// SPDX-License-Identifier: GPL-3.0-only

//! Review playback
//!
//! Routes a finished recording's decoded frames into the same
//! [`FrameSurface`] the camera writes to, so review goes through the
//! renderer's draw cycle. The decoder is opened on the playback thread and
//! the file loops until [`PlaybackAdapter::stop`].

pub mod frame_loop;

use crate::constants::timing;
use crate::errors::{CoreError, CoreResult};
use crate::gpu::FrameSurface;
use crate::media::decoder::{DecodedFrame, DecoderFactory};
use crate::storage::VideoAsset;
use frame_loop::{FrameLoop, LoopAction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Writer name playback registers on the frame surface
pub const PLAYBACK_WRITER: &str = "playback";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    /// Decoder is being opened
    Preparing,
    Playing,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Preparing,
            2 => PlaybackState::Playing,
            _ => PlaybackState::Stopped,
        }
    }
}

#[derive(Default)]
struct Progress {
    state: AtomicU8,
    frames: AtomicU64,
    loops: AtomicU32,
}

impl Progress {
    fn set(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

type ErrorListener = Arc<dyn Fn(&CoreError) + Send + Sync>;

pub struct PlaybackAdapter {
    factory: Arc<dyn DecoderFactory>,
    surface: Option<FrameSurface>,
    frame_loop: Option<FrameLoop>,
    progress: Arc<Progress>,
    source: Option<PathBuf>,
    error_listener: Option<ErrorListener>,
}

impl PlaybackAdapter {
    pub fn new(factory: Arc<dyn DecoderFactory>) -> Self {
        Self {
            factory,
            surface: None,
            frame_loop: None,
            progress: Arc::new(Progress::default()),
            source: None,
            error_listener: None,
        }
    }

    /// Called from the playback thread when decoding fails
    pub fn set_error_listener<F>(&mut self, listener: F)
    where
        F: Fn(&CoreError) + Send + Sync + 'static,
    {
        self.error_listener = Some(Arc::new(listener));
    }

    /// Display surface frames are written to
    pub fn attach_surface(&mut self, surface: FrameSurface) {
        self.surface = Some(surface);
    }

    /// Stop playback and forget the surface
    pub fn detach_surface(&mut self) {
        self.stop();
        self.surface = None;
    }

    /// Play `asset` looped; does nothing without an attached surface
    pub fn play(&mut self, asset: &VideoAsset) -> CoreResult<()> {
        let Some(surface) = self.surface.clone() else {
            debug!(path = %asset.video_path().display(), "No display attached, playback skipped");
            return Ok(());
        };
        self.stop();

        let writer = surface.claim_writer(PLAYBACK_WRITER).ok_or_else(|| {
            CoreError::DeviceUnavailable(format!(
                "Frame surface is held by {}",
                surface.writer_name().unwrap_or_default()
            ))
        })?;

        let path = asset.video_path().to_path_buf();
        self.progress.frames.store(0, Ordering::SeqCst);
        self.progress.loops.store(0, Ordering::SeqCst);
        self.progress.set(PlaybackState::Preparing);

        let factory = Arc::clone(&self.factory);
        let init_progress = Arc::clone(&self.progress);
        let init_listener = self.error_listener.clone();
        let init_path = path.clone();
        let init = move || {
            // The writer lives as long as the decoder; both drop when the loop exits
            factory
                .open(&init_path)
                .map(|decoder| (decoder, writer))
                .inspect_err(|e| {
                    init_progress.set(PlaybackState::Stopped);
                    if let Some(listener) = &init_listener {
                        listener(e);
                    }
                })
        };

        let progress = Arc::clone(&self.progress);
        let listener = self.error_listener.clone();
        let fail = move |progress: &Progress, e: CoreError| {
            warn!(error = %e, "Playback failed");
            progress.set(PlaybackState::Stopped);
            if let Some(listener) = &listener {
                listener(&e);
            }
            LoopAction::Stop
        };
        let body = move |(decoder, writer): &mut (Box<dyn crate::media::MediaDecoder>, crate::gpu::SurfaceWriter)| {
            match decoder.next_frame(timing::DECODER_POLL_TIMEOUT) {
                Ok(DecodedFrame::Frame(frame)) => {
                    if progress.frames.fetch_add(1, Ordering::SeqCst) == 0 {
                        progress.set(PlaybackState::Playing);
                    }
                    writer.publish(frame);
                    LoopAction::Continue
                }
                Ok(DecodedFrame::Pending) => LoopAction::Continue,
                Ok(DecodedFrame::EndOfStream) => {
                    let loops = progress.loops.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(loops, "Playback looped");
                    match decoder.rewind() {
                        Ok(()) => LoopAction::Continue,
                        Err(e) => fail(&progress, e),
                    }
                }
                Err(e) => fail(&progress, e),
            }
        };

        let frame_loop = FrameLoop::start_with_init("playback", init, body).map_err(|e| {
            self.progress.set(PlaybackState::Stopped);
            CoreError::DeviceUnavailable(format!("Failed to spawn playback thread: {}", e))
        })?;

        info!(path = %path.display(), "Playback started");
        self.frame_loop = Some(frame_loop);
        self.source = Some(path);
        Ok(())
    }

    /// Release the decoder and the surface writer; safe when stopped
    pub fn stop(&mut self) {
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.stop();
            info!(
                frames = self.progress.frames.load(Ordering::SeqCst),
                loops = self.progress.loops.load(Ordering::SeqCst),
                "Playback stopped"
            );
        }
        self.progress.set(PlaybackState::Stopped);
        self.source = None;
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.progress.state.load(Ordering::SeqCst))
    }

    /// Whether a playback thread is live (preparing or playing)
    pub fn is_active(&self) -> bool {
        self.frame_loop.as_ref().is_some_and(|l| l.is_running())
    }

    pub fn frames_played(&self) -> u64 {
        self.progress.frames.load(Ordering::SeqCst)
    }

    pub fn loops(&self) -> u32 {
        self.progress.loops.load(Ordering::SeqCst)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl Drop for PlaybackAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}
