// SPDX-License-Identifier: GPL-3.0-only
//! Shared shader definitions for the frame pipeline
//!
//! The preview renderer and the encoder readback draw with the same program,
//! so recorded frames match what is shown on screen.

mod gpu_processor;
mod program;

pub use gpu_processor::{CachedDimensions, padded_bytes_per_row, read_buffer_async, unpad_rows};
pub use program::{FRAME_TEXTURE_FORMAT, FrameProgram, create_frame_texture};

use crate::backends::camera::types::FrameTransform;
use crate::filters::FilterDescriptor;

/// WGSL source for the full-frame quad
pub const FRAME_QUAD_SHADER: &str = include_str!("frame_quad.wgsl");

/// Uniform block consumed by `frame_quad.wgsl`
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub tex_transform: [[f32; 4]; 4],
    pub kernel0: [f32; 4],
    pub kernel1: [f32; 4],
    /// k8, color bias, texel width, texel height
    pub kernel2: [f32; 4],
    pub mode: u32,
    pub _padding: [u32; 3],
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            tex_transform: FrameTransform::IDENTITY.0,
            kernel0: [0.0; 4],
            kernel1: [0.0; 4],
            kernel2: [0.0; 4],
            mode: 0,
            _padding: [0; 3],
        }
    }
}

impl FrameUniforms {
    /// Load a filter's program mode, kernel and bias
    pub fn set_filter(&mut self, filter: &FilterDescriptor) {
        let k = filter.kernel.unwrap_or([0.0; 9]);
        self.mode = filter.program.shader_mode();
        self.kernel0 = [k[0], k[1], k[2], k[3]];
        self.kernel1 = [k[4], k[5], k[6], k[7]];
        self.kernel2[0] = k[8];
        self.kernel2[1] = filter.color_bias;
    }

    /// Texel step used by convolution taps
    pub fn set_texture_size(&mut self, width: u32, height: u32) {
        self.kernel2[2] = 1.0 / width.max(1) as f32;
        self.kernel2[3] = 1.0 / height.max(1) as f32;
    }

    pub fn set_transform(&mut self, transform: &FrameTransform) {
        self.tex_transform = transform.0;
    }
}
