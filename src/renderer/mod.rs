// SPDX-License-Identifier: GPL-3.0-only

//! GPU frame pipeline
//!
//! The renderer owns the display-bound GPU context. Every texture-update
//! signal runs one draw cycle:
//!
//! 1. import the newest frame into the shared texture
//! 2. skip while the incoming size is unknown
//! 3. swap the program if the selected filter changed (pass-through in playback)
//! 4. push the incoming size to the program if it changed
//! 5. draw the full-frame quad
//! 6. forward the texture to the encoder sidecar while recording
//!
//! Cycles run on the [`RenderThread`], never concurrently with themselves.

mod thread;
pub mod wgpu_backend;

pub use thread::RenderThread;
pub use wgpu_backend::WgpuRenderBackend;

use crate::backends::camera::types::{CameraFrame, FrameSize, FrameTransform};
use crate::constants::timing;
use crate::errors::CoreResult;
use crate::filters::{self, FilterDescriptor, FilterSelector};
use crate::gpu::{FrameSurface, GpuContextHandle, GpuDevice, TextureId};
use crate::pipelines::video::{EncoderSidecar, ForwardedFrame};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// GPU operations the draw cycle needs from the display context
pub trait RenderBackend: Send + 'static {
    type Device: GpuDevice;

    /// Create the display context for a surface of `display` size
    fn create_context(&mut self, display: FrameSize) -> CoreResult<GpuContextHandle<Self::Device>>;

    /// Allocate the shared texture frames are imported into
    fn create_frame_texture(
        &mut self,
        context: &GpuContextHandle<Self::Device>,
    ) -> CoreResult<TextureId>;

    fn resize_display(&mut self, size: FrameSize);

    /// Upload `frame` into `texture`
    ///
    /// Returns the texture now holding the frame, which is a new id when the
    /// texture had to be reallocated for a different size.
    fn import_frame(
        &mut self,
        context: &GpuContextHandle<Self::Device>,
        texture: TextureId,
        frame: &CameraFrame,
    ) -> CoreResult<TextureId>;

    fn use_program(&mut self, filter: &'static FilterDescriptor) -> CoreResult<()>;

    fn set_texture_size(&mut self, size: FrameSize);

    fn draw(
        &mut self,
        context: &GpuContextHandle<Self::Device>,
        texture: TextureId,
        transform: &FrameTransform,
    ) -> CoreResult<()>;

    /// Drop programs and targets after the display context is gone
    fn release(&mut self);
}

/// Flags written by the session and read by the draw cycle
#[derive(Debug, Default)]
pub struct RenderControls {
    filter: AtomicU8,
    recording: AtomicBool,
    playback: AtomicBool,
    frames_drawn: AtomicU64,
}

impl RenderControls {
    pub fn filter(&self) -> FilterSelector {
        FilterSelector::from_index(self.filter.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set_filter(&self, selector: FilterSelector) {
        self.filter.store(selector.index(), Ordering::Release);
    }

    pub fn recording_enabled(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn set_recording_enabled(&self, enabled: bool) {
        self.recording.store(enabled, Ordering::Release);
    }

    pub fn playback_mode(&self) -> bool {
        self.playback.load(Ordering::Acquire)
    }

    pub fn set_playback_mode(&self, playback: bool) {
        self.playback.store(playback, Ordering::Release);
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn.load(Ordering::Relaxed)
    }
}

/// Result of one draw cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    /// The display context is gone
    NoContext,
    /// Nothing has been imported yet
    NoFrame,
    /// The incoming frame size is not known yet
    UnknownSize,
    Drawn {
        /// Whether the frame was handed to the encoder sidecar
        forwarded: bool,
    },
}

/// Draw-cycle state for one display surface
pub struct Renderer<B: RenderBackend> {
    backend: B,
    controls: Arc<RenderControls>,
    surface: FrameSurface,
    sidecar: EncoderSidecar<B::Device>,
    context: Option<GpuContextHandle<B::Device>>,
    texture: Option<TextureId>,
    current_filter: Option<&'static FilterDescriptor>,
    incoming: FrameSize,
    size_dirty: bool,
    has_frame: bool,
    last_transform: FrameTransform,
    last_timestamp_ns: u64,
}

impl<B: RenderBackend> Renderer<B> {
    pub fn new(
        backend: B,
        controls: Arc<RenderControls>,
        surface: FrameSurface,
        sidecar: EncoderSidecar<B::Device>,
    ) -> Self {
        Self {
            backend,
            controls,
            surface,
            sidecar,
            context: None,
            texture: None,
            current_filter: None,
            incoming: FrameSize::default(),
            size_dirty: true,
            has_frame: false,
            last_transform: FrameTransform::IDENTITY,
            last_timestamp_ns: 0,
        }
    }

    pub fn context(&self) -> Option<&GpuContextHandle<B::Device>> {
        self.context.as_ref()
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn incoming_size(&self) -> FrameSize {
        self.incoming
    }

    /// Filter the last cycle drew with
    pub fn current_filter(&self) -> Option<&'static FilterDescriptor> {
        self.current_filter
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Display surface created: build the context and shared texture
    ///
    /// A sidecar still recording from a previous context is rebound to the
    /// new one.
    pub fn on_surface_created(&mut self, display: FrameSize) -> CoreResult<()> {
        if self.context.is_some() {
            debug!("Surface recreated without loss notification, releasing old context");
            self.on_surface_lost();
        }

        let context = self.backend.create_context(display)?;
        let texture = match self.backend.create_frame_texture(&context) {
            Ok(texture) => texture,
            Err(e) => {
                self.backend.release();
                return Err(e);
            }
        };
        self.surface.bind_texture(texture);

        let display_size = display;
        info!(
            context = context.id(),
            texture = %texture,
            display = %display_size,
            "Renderer context created"
        );

        if self.sidecar.is_recording() {
            info!("Resuming recording on the new display context");
            self.sidecar.update_shared_context(&context);
        }

        self.context = Some(context);
        self.texture = Some(texture);
        self.current_filter = None;
        self.size_dirty = true;
        self.has_frame = false;
        Ok(())
    }

    pub fn on_surface_changed(&mut self, display: FrameSize) {
        let display_size = display;
        debug!(display = %display_size, "Display surface changed");
        self.backend.resize_display(display);
    }

    /// Display context lost: release the program and texture
    pub fn on_surface_lost(&mut self) {
        let bound = self.surface.unbind_texture();
        if let Some(context) = self.context.take() {
            for texture in bound.into_iter().chain(self.texture.take()) {
                context.release(texture);
            }
            info!(context = context.id(), "Renderer context released");
        }
        self.texture = None;
        self.backend.release();
        self.current_filter = None;
        self.incoming = FrameSize::default();
        self.size_dirty = true;
        self.has_frame = false;
    }

    /// Size announced by the frame source before frames arrive
    pub fn set_incoming_size(&mut self, size: FrameSize) {
        if size != self.incoming {
            debug!(size = %size, "Incoming frame size changed");
            self.incoming = size;
            self.size_dirty = true;
        }
    }

    /// Run one draw cycle
    pub fn draw_frame(&mut self) -> CoreResult<DrawOutcome> {
        let (Some(context), Some(mut texture)) = (self.context.clone(), self.texture) else {
            return Ok(DrawOutcome::NoContext);
        };

        let fresh = match self.surface.take_latest() {
            Some(frame) => {
                let imported = self.backend.import_frame(&context, texture, &frame)?;
                if imported != texture {
                    debug!(old = %texture, new = %imported, "Shared texture reallocated");
                    self.surface.bind_texture(imported);
                    context.release(texture);
                    texture = imported;
                    self.texture = Some(imported);
                }
                self.set_incoming_size(frame.size());
                self.last_transform = frame.transform;
                self.last_timestamp_ns = frame.timestamp_ns;
                self.has_frame = true;
                true
            }
            None => false,
        };

        if self.incoming.is_empty() {
            return Ok(DrawOutcome::UnknownSize);
        }
        if !self.has_frame {
            return Ok(DrawOutcome::NoFrame);
        }

        let wanted = if self.controls.playback_mode() {
            filters::pass_through()
        } else {
            filters::resolve(self.controls.filter())
        };
        if self.current_filter.map(|current| current.selector) != Some(wanted.selector) {
            debug!(filter = %wanted.selector, "Swapping filter program");
            self.backend.use_program(wanted)?;
            self.current_filter = Some(wanted);
            self.size_dirty = true;
        }

        if self.size_dirty {
            self.backend.set_texture_size(self.incoming);
            self.size_dirty = false;
        }

        self.backend.draw(&context, texture, &self.last_transform)?;
        let drawn = self.controls.frames_drawn.fetch_add(1, Ordering::Relaxed) + 1;
        if drawn % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(frames = drawn, size = %self.incoming, filter = %wanted.selector, "Rendering");
        }

        let forwarded = fresh
            && self.controls.recording_enabled()
            && self.sidecar.is_recording()
            && self.sidecar.frame_available(ForwardedFrame {
                texture,
                transform: self.last_transform,
                filter: wanted,
                timestamp_ns: self.last_timestamp_ns,
            });

        Ok(DrawOutcome::Drawn { forwarded })
    }
}

impl<B: RenderBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if self.context.is_some() {
            warn!("Renderer dropped with a live context");
            self.on_surface_lost();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::FrameData;
    use crate::pipelines::video::{EncoderBackend, EncoderSession, RecordingConfig};
    use std::sync::Mutex;

    #[derive(Clone)]
    struct NullDevice;

    impl GpuDevice for NullDevice {
        type Texture = FrameSize;

        fn describe(&self) -> String {
            "null".to_string()
        }
    }

    #[derive(Default)]
    struct Log {
        programs: Vec<FilterSelector>,
        sizes: Vec<FrameSize>,
        draws: usize,
        released: usize,
    }

    struct FakeBackend {
        log: Arc<Mutex<Log>>,
    }

    impl RenderBackend for FakeBackend {
        type Device = NullDevice;

        fn create_context(&mut self, _display: FrameSize) -> CoreResult<GpuContextHandle<NullDevice>> {
            Ok(GpuContextHandle::create_display(NullDevice))
        }

        fn create_frame_texture(
            &mut self,
            context: &GpuContextHandle<NullDevice>,
        ) -> CoreResult<TextureId> {
            Ok(context.register_texture(FrameSize::new(1, 1)))
        }

        fn resize_display(&mut self, _size: FrameSize) {}

        fn import_frame(
            &mut self,
            context: &GpuContextHandle<NullDevice>,
            texture: TextureId,
            frame: &CameraFrame,
        ) -> CoreResult<TextureId> {
            if context.texture(texture) == Some(frame.size()) {
                Ok(texture)
            } else {
                Ok(context.register_texture(frame.size()))
            }
        }

        fn use_program(&mut self, filter: &'static FilterDescriptor) -> CoreResult<()> {
            self.log.lock().unwrap().programs.push(filter.selector);
            Ok(())
        }

        fn set_texture_size(&mut self, size: FrameSize) {
            self.log.lock().unwrap().sizes.push(size);
        }

        fn draw(
            &mut self,
            _context: &GpuContextHandle<NullDevice>,
            _texture: TextureId,
            _transform: &FrameTransform,
        ) -> CoreResult<()> {
            self.log.lock().unwrap().draws += 1;
            Ok(())
        }

        fn release(&mut self) {
            self.log.lock().unwrap().released += 1;
        }
    }

    struct NoEncoder;

    impl EncoderBackend<NullDevice> for NoEncoder {
        fn open(
            &self,
            _config: &RecordingConfig,
            _context: GpuContextHandle<NullDevice>,
        ) -> CoreResult<Box<dyn EncoderSession<NullDevice>>> {
            Err(crate::errors::CoreError::EncodingFailed("unused".to_string()))
        }
    }

    fn frame(width: u32, height: u32) -> CameraFrame {
        CameraFrame {
            width,
            height,
            data: FrameData::Copied(Arc::from(vec![0u8; (width * height * 4) as usize])),
            stride: width * 4,
            timestamp_ns: 1,
            transform: FrameTransform::IDENTITY,
        }
    }

    fn renderer() -> (Renderer<FakeBackend>, FrameSurface, Arc<RenderControls>, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let surface = FrameSurface::new();
        let controls = Arc::new(RenderControls::default());
        let renderer = Renderer::new(
            FakeBackend {
                log: Arc::clone(&log),
            },
            Arc::clone(&controls),
            surface.clone(),
            EncoderSidecar::new(Arc::new(NoEncoder)),
        );
        (renderer, surface, controls, log)
    }

    #[test]
    fn draw_without_context_is_skipped() {
        let (mut renderer, _, _, _) = renderer();
        assert_eq!(renderer.draw_frame().unwrap(), DrawOutcome::NoContext);
    }

    #[test]
    fn unknown_size_skips_drawing() {
        let (mut renderer, surface, _, log) = renderer();
        renderer.on_surface_created(FrameSize::new(800, 600)).unwrap();
        let writer = surface.claim_writer("test").unwrap();
        writer.publish(frame(0, 0));
        assert_eq!(renderer.draw_frame().unwrap(), DrawOutcome::UnknownSize);
        assert_eq!(log.lock().unwrap().draws, 0);
    }

    #[test]
    fn filter_swap_is_lazy_and_marks_size_dirty() {
        let (mut renderer, surface, controls, log) = renderer();
        renderer.on_surface_created(FrameSize::new(800, 600)).unwrap();
        let writer = surface.claim_writer("test").unwrap();

        writer.publish(frame(640, 480));
        renderer.draw_frame().unwrap();
        writer.publish(frame(640, 480));
        renderer.draw_frame().unwrap();
        {
            let log = log.lock().unwrap();
            assert_eq!(log.programs, vec![FilterSelector::None]);
            assert_eq!(log.sizes, vec![FrameSize::new(640, 480)]);
        }

        controls.set_filter(FilterSelector::Emboss);
        writer.publish(frame(640, 480));
        renderer.draw_frame().unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.programs, vec![FilterSelector::None, FilterSelector::Emboss]);
        assert_eq!(log.sizes.len(), 2);
        assert_eq!(log.draws, 3);
    }

    #[test]
    fn playback_forces_pass_through() {
        let (mut renderer, surface, controls, log) = renderer();
        renderer.on_surface_created(FrameSize::new(800, 600)).unwrap();
        controls.set_filter(FilterSelector::Blur);
        controls.set_playback_mode(true);
        let writer = surface.claim_writer("decoder").unwrap();
        writer.publish(frame(320, 240));
        renderer.draw_frame().unwrap();
        assert_eq!(log.lock().unwrap().programs, vec![FilterSelector::None]);
        assert!(renderer.current_filter().unwrap().is_pass_through());
    }

    #[test]
    fn reallocated_texture_is_rebound() {
        let (mut renderer, surface, _, _) = renderer();
        renderer.on_surface_created(FrameSize::new(800, 600)).unwrap();
        let initial = renderer.texture().unwrap();
        let writer = surface.claim_writer("test").unwrap();
        writer.publish(frame(640, 480));
        renderer.draw_frame().unwrap();

        let current = renderer.texture().unwrap();
        assert_ne!(current, initial);
        assert_eq!(surface.texture_id(), Some(current));
        let context = renderer.context().unwrap();
        assert_eq!(context.texture(initial), None);
        assert_eq!(context.live_textures(), 1);
    }

    #[test]
    fn surface_lost_invalidates_texture_and_size() {
        let (mut renderer, surface, _, log) = renderer();
        renderer.on_surface_created(FrameSize::new(800, 600)).unwrap();
        let writer = surface.claim_writer("test").unwrap();
        writer.publish(frame(640, 480));
        renderer.draw_frame().unwrap();

        renderer.on_surface_lost();
        assert_eq!(surface.texture_id(), None);
        assert!(renderer.incoming_size().is_empty());
        assert_eq!(log.lock().unwrap().released, 1);
        assert_eq!(renderer.draw_frame().unwrap(), DrawOutcome::NoContext);

        // A recreated context picks the program again
        renderer.on_surface_created(FrameSize::new(800, 600)).unwrap();
        writer.publish(frame(640, 480));
        renderer.draw_frame().unwrap();
        assert_eq!(log.lock().unwrap().programs.len(), 2);
    }

    #[test]
    fn nothing_is_forwarded_when_sidecar_is_off() {
        let (mut renderer, surface, controls, _) = renderer();
        renderer.on_surface_created(FrameSize::new(800, 600)).unwrap();
        controls.set_recording_enabled(true);
        let writer = surface.claim_writer("test").unwrap();
        writer.publish(frame(640, 480));
        assert_eq!(
            renderer.draw_frame().unwrap(),
            DrawOutcome::Drawn { forwarded: false }
        );
    }
}
