// SPDX-License-Identifier: GPL-3.0-only

//! wgpu implementation of the render backend
//!
//! The display target is an offscreen texture sized like the host surface;
//! the host composites it. Frame textures live in the context's shared
//! namespace so the encoder sidecar can read them.

use super::RenderBackend;
use crate::backends::camera::types::{CameraFrame, FrameSize, FrameTransform};
use crate::errors::{CoreError, CoreResult};
use crate::filters::FilterDescriptor;
use crate::gpu::{self, GpuContextHandle, TextureId, WgpuDevice, wgpu};
use crate::shaders::{CachedDimensions, FrameProgram, create_frame_texture};
use std::sync::Arc;
use tracing::{debug, info};

struct DisplayTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: CachedDimensions,
}

impl DisplayTarget {
    fn new(device: &wgpu::Device, size: FrameSize) -> Self {
        let (width, height) = (size.width.max(1), size.height.max(1));
        let texture = create_frame_texture(device, "display_target", width, height);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut cached = CachedDimensions::default();
        cached.update(width, height);
        Self {
            texture,
            view,
            size: cached,
        }
    }
}

/// Renders into an offscreen display target with the frame program
#[derive(Default)]
pub struct WgpuRenderBackend {
    gpu: Option<WgpuDevice>,
    program: Option<FrameProgram>,
    display: Option<DisplayTarget>,
}

impl WgpuRenderBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texture holding the last drawn display image
    pub fn display_texture(&self) -> Option<&wgpu::Texture> {
        self.display.as_ref().map(|display| &display.texture)
    }

    fn gpu(&self) -> CoreResult<&WgpuDevice> {
        self.gpu
            .as_ref()
            .ok_or_else(|| CoreError::GpuUnavailable("No display context".to_string()))
    }

    fn allocate_frame_texture(
        gpu: &WgpuDevice,
        context: &GpuContextHandle<WgpuDevice>,
        size: FrameSize,
    ) -> TextureId {
        let texture = create_frame_texture(&gpu.device, "camera_frame", size.width, size.height);
        context.register_texture(Arc::new(texture))
    }
}

impl RenderBackend for WgpuRenderBackend {
    type Device = WgpuDevice;

    fn create_context(&mut self, display: FrameSize) -> CoreResult<GpuContextHandle<WgpuDevice>> {
        let gpu = pollster::block_on(gpu::create_device("camera-recorder-display"))?;
        let display_size = display;
        info!(device = %gpu.info.adapter_name, display = %display_size, "Display device ready");

        self.program = Some(FrameProgram::new(&gpu, "display_frame_program"));
        self.display = Some(DisplayTarget::new(&gpu.device, display));
        let context = GpuContextHandle::create_display(gpu.clone());
        self.gpu = Some(gpu);
        Ok(context)
    }

    fn create_frame_texture(
        &mut self,
        context: &GpuContextHandle<WgpuDevice>,
    ) -> CoreResult<TextureId> {
        // Reallocated to the real size by the first import
        let gpu = self.gpu()?;
        Ok(Self::allocate_frame_texture(gpu, context, FrameSize::new(1, 1)))
    }

    fn resize_display(&mut self, size: FrameSize) {
        let Some(gpu) = &self.gpu else {
            return;
        };
        let needs_update = self
            .display
            .as_ref()
            .map(|display| display.size.needs_update(size.width, size.height))
            .unwrap_or(true);
        if needs_update && !size.is_empty() {
            debug!(size = %size, "Resizing display target");
            self.display = Some(DisplayTarget::new(&gpu.device, size));
        }
    }

    fn import_frame(
        &mut self,
        context: &GpuContextHandle<WgpuDevice>,
        texture: TextureId,
        frame: &CameraFrame,
    ) -> CoreResult<TextureId> {
        let gpu = self.gpu()?;
        let size = frame.size();
        if size.is_empty() {
            return Ok(texture);
        }
        let required = frame.stride as usize * (frame.height as usize - 1) + frame.width as usize * 4;
        if frame.stride < frame.width * 4 || frame.data.len() < required {
            return Err(CoreError::DeviceUnavailable(format!(
                "Frame buffer too small for {} (stride {}, {} bytes)",
                size,
                frame.stride,
                frame.data.len()
            )));
        }

        let target_id = match context.texture(texture) {
            Some(current) if current.width() == size.width && current.height() == size.height => {
                texture
            }
            _ => Self::allocate_frame_texture(gpu, context, size),
        };
        let target = context
            .texture(target_id)
            .ok_or_else(|| CoreError::GpuUnavailable("Frame texture vanished".to_string()))?;

        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.stride),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(target_id)
    }

    fn use_program(&mut self, filter: &'static FilterDescriptor) -> CoreResult<()> {
        let program = self
            .program
            .as_mut()
            .ok_or_else(|| CoreError::GpuUnavailable("No frame program".to_string()))?;
        program.use_filter(filter);
        Ok(())
    }

    fn set_texture_size(&mut self, size: FrameSize) {
        if let Some(program) = &mut self.program {
            program.set_texture_size(size.width, size.height);
        }
    }

    fn draw(
        &mut self,
        context: &GpuContextHandle<WgpuDevice>,
        texture: TextureId,
        transform: &FrameTransform,
    ) -> CoreResult<()> {
        let source = context
            .texture(texture)
            .ok_or_else(|| CoreError::GpuUnavailable(format!("Unknown texture {}", texture)))?;
        let (Some(gpu), Some(program), Some(display)) =
            (&self.gpu, &mut self.program, &self.display)
        else {
            return Err(CoreError::GpuUnavailable("No display context".to_string()));
        };

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("display_frame"),
            });
        program.encode(&mut encoder, &source, &display.view, transform);
        gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn release(&mut self) {
        if self.gpu.is_some() {
            debug!("Releasing display program and target");
        }
        self.program = None;
        self.display = None;
        self.gpu = None;
    }
}
