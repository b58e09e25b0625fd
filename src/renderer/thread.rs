// SPDX-License-Identifier: GPL-3.0-only

//! Dedicated render thread
//!
//! All renderer work is serialized through one command queue. Frame-available
//! signals from the producer are coalesced: while a draw is queued, further
//! signals are dropped, so the capture thread never waits on the GPU.

use super::{DrawOutcome, RenderBackend, RenderControls, Renderer};
use crate::backends::camera::types::FrameSize;
use crate::errors::{CoreError, CoreResult};
use crate::filters::FilterSelector;
use crate::gpu::{FrameSurface, GpuContextHandle, GpuDevice};
use crate::pipelines::video::EncoderSidecar;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

enum RenderCommand {
    SurfaceCreated(FrameSize, SyncSender<CoreResult<()>>),
    SurfaceChanged(FrameSize),
    SurfaceLost(SyncSender<()>),
    IncomingSize(FrameSize),
    FrameAvailable,
    Barrier(SyncSender<()>),
    Shutdown,
}

type ContextSlot<D> = Arc<Mutex<Option<GpuContextHandle<D>>>>;

/// Handle to the render thread
pub struct RenderThread<D: GpuDevice> {
    sender: Sender<RenderCommand>,
    controls: Arc<RenderControls>,
    surface: FrameSurface,
    context: ContextSlot<D>,
    handle: Option<JoinHandle<()>>,
}

impl<D: GpuDevice> RenderThread<D> {
    /// Start the render thread drawing frames published to `surface`
    pub fn spawn<B>(backend: B, surface: FrameSurface, sidecar: EncoderSidecar<D>) -> CoreResult<Self>
    where
        B: RenderBackend<Device = D>,
    {
        let (sender, receiver) = mpsc::channel();
        let controls = Arc::new(RenderControls::default());
        let context: ContextSlot<D> = Arc::new(Mutex::new(None));
        let render_pending = Arc::new(AtomicBool::new(false));

        let renderer = Renderer::new(backend, Arc::clone(&controls), surface.clone(), sidecar);

        let listener_sender = sender.clone();
        let listener_pending = Arc::clone(&render_pending);
        surface.set_frame_available_listener(move || {
            if !listener_pending.swap(true, Ordering::AcqRel) {
                let _ = listener_sender.send(RenderCommand::FrameAvailable);
            }
        });

        let thread_context = Arc::clone(&context);
        let handle = std::thread::Builder::new()
            .name("renderer".to_string())
            .spawn(move || run(renderer, receiver, thread_context, render_pending))
            .map_err(|e| CoreError::GpuUnavailable(format!("Failed to spawn render thread: {}", e)))?;

        info!("Render thread started");
        Ok(Self {
            sender,
            controls,
            surface,
            context,
            handle: Some(handle),
        })
    }

    pub fn surface(&self) -> &FrameSurface {
        &self.surface
    }

    pub fn controls(&self) -> &Arc<RenderControls> {
        &self.controls
    }

    /// Create the display context; blocks until the render thread answers
    pub fn surface_created(&self, display: FrameSize) -> CoreResult<()> {
        let (reply, answer) = mpsc::sync_channel(1);
        self.send(RenderCommand::SurfaceCreated(display, reply))?;
        answer
            .recv()
            .map_err(|_| CoreError::GpuUnavailable("Render thread exited".to_string()))?
    }

    pub fn surface_changed(&self, display: FrameSize) {
        let _ = self.send(RenderCommand::SurfaceChanged(display));
    }

    /// Release the display context; blocks until it is gone
    pub fn surface_lost(&self) {
        let (reply, answer) = mpsc::sync_channel(1);
        if self.send(RenderCommand::SurfaceLost(reply)).is_ok() {
            let _ = answer.recv();
        }
    }

    /// Announce the size of frames about to be published
    pub fn set_incoming_size(&self, size: FrameSize) {
        let _ = self.send(RenderCommand::IncomingSize(size));
    }

    /// Select the filter picked up by the next draw cycle
    pub fn select_filter(&self, selector: FilterSelector) {
        debug!(filter = %selector, "Filter selected");
        self.controls.set_filter(selector);
    }

    pub fn set_recording_enabled(&self, enabled: bool) {
        self.controls.set_recording_enabled(enabled);
    }

    pub fn set_playback_mode(&self, playback: bool) {
        self.controls.set_playback_mode(playback);
    }

    /// The current display context, if the surface exists
    pub fn shared_context(&self) -> Option<GpuContextHandle<D>> {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.controls.frames_drawn()
    }

    /// Wait until every queued command has been handled
    pub fn sync(&self) {
        let (reply, answer) = mpsc::sync_channel(1);
        if self.send(RenderCommand::Barrier(reply)).is_ok() {
            let _ = answer.recv();
        }
    }

    fn send(&self, command: RenderCommand) -> CoreResult<()> {
        self.sender
            .send(command)
            .map_err(|_| CoreError::GpuUnavailable("Render thread exited".to_string()))
    }
}

impl<D: GpuDevice> Drop for RenderThread<D> {
    fn drop(&mut self) {
        let _ = self.sender.send(RenderCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!("Render thread panicked: {:?}", e);
            } else {
                debug!("Render thread finished");
            }
        }
    }
}

fn run<B: RenderBackend>(
    mut renderer: Renderer<B>,
    receiver: Receiver<RenderCommand>,
    context: ContextSlot<B::Device>,
    render_pending: Arc<AtomicBool>,
) {
    let publish = |renderer: &Renderer<B>| {
        *context.lock().unwrap_or_else(PoisonError::into_inner) = renderer.context().cloned();
    };

    while let Ok(command) = receiver.recv() {
        match command {
            RenderCommand::SurfaceCreated(display, reply) => {
                let result = renderer.on_surface_created(display);
                if let Err(e) = &result {
                    warn!(error = %e, "Failed to create display context");
                }
                publish(&renderer);
                let _ = reply.send(result);
            }
            RenderCommand::SurfaceChanged(display) => renderer.on_surface_changed(display),
            RenderCommand::SurfaceLost(reply) => {
                renderer.on_surface_lost();
                publish(&renderer);
                let _ = reply.send(());
            }
            RenderCommand::IncomingSize(size) => renderer.set_incoming_size(size),
            RenderCommand::FrameAvailable => {
                render_pending.store(false, Ordering::Release);
                match renderer.draw_frame() {
                    Ok(DrawOutcome::Drawn { .. }) | Ok(DrawOutcome::NoFrame) => {}
                    Ok(outcome) => debug!(?outcome, "Draw cycle skipped"),
                    Err(e) => warn!(error = %e, "Draw cycle failed"),
                }
            }
            RenderCommand::Barrier(reply) => {
                let _ = reply.send(());
            }
            RenderCommand::Shutdown => break,
        }
    }

    renderer.on_surface_lost();
    publish(&renderer);
    info!("Render thread exiting");
}
