// SPDX-License-Identifier: GPL-3.0-only

//! GPU resource helpers shared by the renderer and the encoder readback
//!
//! - Dimension caching so targets are only reallocated on size changes
//! - Row padding math for texture-to-buffer copies
//! - Async buffer readback (map, poll, read, unmap)

use crate::gpu::wgpu;

/// Cached resource dimensions - avoids reallocation when dimensions match
#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub struct CachedDimensions {
    pub width: u32,
    pub height: u32,
}

impl CachedDimensions {
    /// Check if dimensions have changed and need update
    pub fn needs_update(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }

    pub fn update(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }
}

/// Bytes per row for an RGBA copy, padded to wgpu's copy alignment
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strip row padding from a readback buffer
pub fn unpad_rows(padded: &[u8], width: u32, height: u32) -> Vec<u8> {
    let row = (width * 4) as usize;
    let stride = padded_bytes_per_row(width) as usize;
    if row == stride {
        return padded[..row * height as usize].to_vec();
    }
    let mut out = Vec::with_capacity(row * height as usize);
    for chunk in padded.chunks(stride).take(height as usize) {
        out.extend_from_slice(&chunk[..row]);
    }
    out
}

/// Helper for async buffer readback (map, poll, read, unmap)
///
/// # Arguments
/// * `device` - The wgpu device for polling
/// * `buffer` - The buffer to read from (must be MAP_READ)
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>, String> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let _ = device.poll(wgpu::PollType::wait_indefinitely());

    receiver
        .await
        .map_err(|_| "Failed to receive buffer mapping".to_string())?
        .map_err(|e| format!("Failed to map buffer: {:?}", e))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_dimensions() {
        let mut dims = CachedDimensions::default();
        assert!(dims.needs_update(640, 480));

        dims.update(640, 480);
        assert!(!dims.needs_update(640, 480));
        assert!(dims.needs_update(1280, 720));
    }

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(640), 2560);
    }

    #[test]
    fn unpad_drops_trailing_row_bytes() {
        // 2x2 RGBA, rows padded to 256 bytes
        let mut padded = vec![0u8; 512];
        padded[..8].copy_from_slice(&[1; 8]);
        padded[256..264].copy_from_slice(&[2; 8]);
        let rows = unpad_rows(&padded, 2, 2);
        assert_eq!(rows.len(), 16);
        assert_eq!(&rows[..8], &[1; 8]);
        assert_eq!(&rows[8..], &[2; 8]);
    }
}
