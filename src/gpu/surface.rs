// SPDX-License-Identifier: GPL-3.0-only

//! Frame surface shared between a frame producer and the renderer
//!
//! Producers (the camera pipeline or the playback decoder) publish frames
//! through a [`SurfaceWriter`]; only one writer may exist at a time. The
//! renderer takes the newest frame when it imports into the shared texture,
//! older unconsumed frames are simply replaced. Publishing never blocks on GPU
//! work: it swaps the pending frame and fires the frame-available listener.

use crate::backends::camera::types::CameraFrame;
use crate::gpu::TextureId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

type FrameAvailableListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SurfaceState {
    pending: Option<CameraFrame>,
    writer: Option<(u64, String)>,
    texture: Option<TextureId>,
    published: u64,
}

struct SurfaceInner {
    state: Mutex<SurfaceState>,
    listener: Mutex<Option<FrameAvailableListener>>,
    next_token: AtomicU64,
}

/// Single-writer frame slot read by the renderer
#[derive(Clone)]
pub struct FrameSurface {
    inner: Arc<SurfaceInner>,
}

impl Default for FrameSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSurface {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                state: Mutex::new(SurfaceState::default()),
                listener: Mutex::new(None),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SurfaceState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the callback fired after each published frame
    pub fn set_frame_available_listener<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
    }

    /// Claim the writer slot; `None` while another writer holds it
    pub fn claim_writer(&self, name: &str) -> Option<SurfaceWriter> {
        let mut state = self.state();
        if let Some((_, current)) = &state.writer {
            warn!(requested = name, current = %current, "Frame surface already has a writer");
            return None;
        }
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        state.writer = Some((token, name.to_string()));
        debug!(writer = name, "Frame surface writer attached");
        Some(SurfaceWriter {
            surface: self.clone(),
            token,
        })
    }

    pub fn has_writer(&self) -> bool {
        self.state().writer.is_some()
    }

    /// Name of the current writer, if any
    pub fn writer_name(&self) -> Option<String> {
        self.state().writer.as_ref().map(|(_, name)| name.clone())
    }

    /// Take the newest unconsumed frame
    pub fn take_latest(&self) -> Option<CameraFrame> {
        self.state().pending.take()
    }

    /// Bind the texture frames are imported into
    pub fn bind_texture(&self, texture: TextureId) {
        self.state().texture = Some(texture);
    }

    /// Invalidate the bound texture; returns the id that was bound
    pub fn unbind_texture(&self) -> Option<TextureId> {
        self.state().texture.take()
    }

    pub fn texture_id(&self) -> Option<TextureId> {
        self.state().texture
    }

    /// Total frames published since creation
    pub fn frames_published(&self) -> u64 {
        self.state().published
    }

    fn publish(&self, token: u64, frame: CameraFrame) -> bool {
        {
            let mut state = self.state();
            match &state.writer {
                Some((current, _)) if *current == token => {}
                _ => return false,
            }
            state.pending = Some(frame);
            state.published += 1;
        }

        let listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener();
        }
        true
    }

    fn release_writer(&self, token: u64) {
        let mut state = self.state();
        if let Some((current, name)) = &state.writer {
            if *current == token {
                debug!(writer = %name, "Frame surface writer detached");
                state.writer = None;
                state.pending = None;
            }
        }
    }
}

/// Exclusive publishing handle; dropping it frees the writer slot
pub struct SurfaceWriter {
    surface: FrameSurface,
    token: u64,
}

impl SurfaceWriter {
    /// Publish a frame, replacing any frame the renderer has not consumed
    pub fn publish(&self, frame: CameraFrame) -> bool {
        self.surface.publish(self.token, frame)
    }

    pub fn surface(&self) -> &FrameSurface {
        &self.surface
    }
}

impl Drop for SurfaceWriter {
    fn drop(&mut self) {
        self.surface.release_writer(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{FrameData, FrameTransform};
    use std::sync::atomic::AtomicUsize;

    fn frame(timestamp_ns: u64) -> CameraFrame {
        CameraFrame {
            width: 2,
            height: 2,
            data: FrameData::Copied(Arc::from(vec![0u8; 16])),
            stride: 8,
            timestamp_ns,
            transform: FrameTransform::IDENTITY,
        }
    }

    #[test]
    fn only_one_writer_at_a_time() {
        let surface = FrameSurface::new();
        let writer = surface.claim_writer("camera").unwrap();
        assert!(surface.claim_writer("playback").is_none());
        drop(writer);
        assert!(surface.claim_writer("playback").is_some());
    }

    #[test]
    fn newest_frame_replaces_pending_one() {
        let surface = FrameSurface::new();
        let writer = surface.claim_writer("camera").unwrap();
        writer.publish(frame(1));
        writer.publish(frame(2));
        assert_eq!(surface.take_latest().map(|f| f.timestamp_ns), Some(2));
        assert!(surface.take_latest().is_none());
        assert_eq!(surface.frames_published(), 2);
    }

    #[test]
    fn listener_fires_per_publish() {
        let surface = FrameSurface::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        surface.set_frame_available_listener(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        let writer = surface.claim_writer("camera").unwrap();
        writer.publish(frame(1));
        writer.publish(frame(2));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_writer_discards_pending_frame() {
        let surface = FrameSurface::new();
        let writer = surface.claim_writer("camera").unwrap();
        writer.publish(frame(1));
        drop(writer);
        assert!(surface.take_latest().is_none());
        assert!(!surface.has_writer());
    }
}
