// SPDX-License-Identifier: GPL-3.0-only

//! GPU device and shared-context plumbing
//!
//! The renderer and the encoder sidecar each work through their own
//! [`GpuContextHandle`]. The encoder handle can only be obtained by sharing
//! the display handle, which guarantees both resolve texture ids through the
//! same [`SharedNamespace`] before either draws from the shared texture.

pub mod arena;
pub mod surface;

pub use arena::{ContextRole, TextureArena, TextureId};
pub use surface::{FrameSurface, SurfaceWriter};
pub use wgpu;

use crate::errors::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// A device whose textures can be shared between contexts
pub trait GpuDevice: Clone + Send + Sync + 'static {
    /// Resource stored in the shared arena
    type Texture: Clone + Send + Sync + 'static;

    /// Human readable adapter description for logs
    fn describe(&self) -> String;
}

/// Information about the created GPU device
#[derive(Debug)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, GL, ...)
    pub backend: wgpu::Backend,
}

/// wgpu device shared by the renderer and the encoder readback
#[derive(Clone)]
pub struct WgpuDevice {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub info: Arc<GpuDeviceInfo>,
}

impl GpuDevice for WgpuDevice {
    type Texture = Arc<wgpu::Texture>;

    fn describe(&self) -> String {
        format!("{} ({:?})", self.info.adapter_name, self.info.backend)
    }
}

/// Set while a device is being created; creation is not reentrant
static DEVICE_CREATION: AtomicBool = AtomicBool::new(false);

struct CreationGuard;

impl Drop for CreationGuard {
    fn drop(&mut self) {
        DEVICE_CREATION.store(false, Ordering::SeqCst);
    }
}

/// Create a wgpu device and queue for preview rendering and encoder readback.
///
/// A second call while one is in flight fails fast with `GpuUnavailable`.
pub async fn create_device(label: &str) -> CoreResult<WgpuDevice> {
    if DEVICE_CREATION
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(CoreError::GpuUnavailable(
            "device creation already in progress".to_string(),
        ));
    }
    let _guard = CreationGuard;

    info!(label = label, "Creating GPU device");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| CoreError::GpuUnavailable(format!("No suitable GPU adapter: {}", e)))?;

    let adapter_info = adapter.get_info();
    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| CoreError::GpuUnavailable(format!("Failed to create GPU device: {}", e)))?;

    Ok(WgpuDevice {
        device: Arc::new(device),
        queue: Arc::new(queue),
        info: Arc::new(GpuDeviceInfo {
            adapter_name: adapter_info.name.clone(),
            backend: adapter_info.backend,
        }),
    })
}

static NEXT_NAMESPACE: AtomicU32 = AtomicU32::new(1);
static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Texture namespace shared by a display context and its encoder peer
pub struct SharedNamespace<D: GpuDevice> {
    id: u32,
    device: D,
    arena: Arc<Mutex<TextureArena<D::Texture>>>,
}

impl<D: GpuDevice> Clone for SharedNamespace<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            device: self.device.clone(),
            arena: Arc::clone(&self.arena),
        }
    }
}

impl<D: GpuDevice> SharedNamespace<D> {
    fn new(device: D) -> Self {
        let id = NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            device,
            arena: Arc::new(Mutex::new(TextureArena::new(id))),
        }
    }

    fn with_arena<R>(&self, f: impl FnOnce(&mut TextureArena<D::Texture>) -> R) -> R {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut arena)
    }
}

/// One GPU context bound to a shared texture namespace
pub struct GpuContextHandle<D: GpuDevice> {
    id: u64,
    role: ContextRole,
    namespace: SharedNamespace<D>,
}

impl<D: GpuDevice> Clone for GpuContextHandle<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            role: self.role,
            namespace: self.namespace.clone(),
        }
    }
}

impl<D: GpuDevice> std::fmt::Debug for GpuContextHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContextHandle")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("namespace", &self.namespace.id)
            .finish()
    }
}

impl<D: GpuDevice> GpuContextHandle<D> {
    /// Create a display context with a fresh namespace
    pub fn create_display(device: D) -> Self {
        let namespace = SharedNamespace::new(device);
        let id = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
        info!(
            context = id,
            namespace = namespace.id,
            device = %namespace.device.describe(),
            "Created display context"
        );
        Self {
            id,
            role: ContextRole::Display,
            namespace,
        }
    }

    /// Create the encoder peer sharing this context's namespace
    pub fn share(&self) -> Self {
        let id = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
        debug!(context = id, parent = self.id, namespace = self.namespace.id, "Shared context");
        Self {
            id,
            role: ContextRole::Encoder,
            namespace: self.namespace.clone(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    pub fn namespace_id(&self) -> u32 {
        self.namespace.id
    }

    pub fn device(&self) -> &D {
        &self.namespace.device
    }

    /// Whether both handles resolve textures through the same namespace
    pub fn shares_namespace_with(&self, other: &GpuContextHandle<D>) -> bool {
        Arc::ptr_eq(&self.namespace.arena, &other.namespace.arena)
    }

    /// Register a texture held by this context
    pub fn register_texture(&self, texture: D::Texture) -> TextureId {
        self.namespace
            .with_arena(|arena| arena.insert(texture, self.role))
    }

    /// Resolve a texture id; `None` once it has been invalidated
    pub fn texture(&self, id: TextureId) -> Option<D::Texture> {
        self.namespace.with_arena(|arena| arena.get(id).cloned())
    }

    /// Take a hold on a texture created by the peer context
    pub fn retain(&self, id: TextureId) -> bool {
        self.namespace.with_arena(|arena| arena.retain(id, self.role))
    }

    /// Drop this context's hold on a texture
    pub fn release(&self, id: TextureId) {
        self.namespace.with_arena(|arena| {
            arena.release(id, self.role);
        });
    }

    /// Whether the texture is still held by `role`
    pub fn is_held_by(&self, id: TextureId, role: ContextRole) -> bool {
        self.namespace.with_arena(|arena| arena.is_held_by(id, role))
    }

    /// Live textures in the namespace
    pub fn live_textures(&self) -> usize {
        self.namespace.with_arena(|arena| arena.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct NullDevice;

    impl GpuDevice for NullDevice {
        type Texture = u32;

        fn describe(&self) -> String {
            "null".to_string()
        }
    }

    #[test]
    fn shared_context_resolves_display_textures() {
        let display = GpuContextHandle::create_display(NullDevice);
        let encoder = display.share();
        assert!(display.shares_namespace_with(&encoder));
        assert_eq!(encoder.role(), ContextRole::Encoder);
        assert_ne!(display.id(), encoder.id());

        let id = display.register_texture(9);
        assert_eq!(encoder.texture(id), Some(9));
    }

    #[test]
    fn texture_outlives_display_release_while_encoder_holds_it() {
        let display = GpuContextHandle::create_display(NullDevice);
        let encoder = display.share();
        let id = display.register_texture(4);
        assert!(encoder.retain(id));

        display.release(id);
        assert_eq!(encoder.texture(id), Some(4));
        encoder.release(id);
        assert_eq!(encoder.texture(id), None);
        assert_eq!(display.live_textures(), 0);
    }

    #[test]
    fn separate_displays_do_not_share() {
        let first = GpuContextHandle::create_display(NullDevice);
        let second = GpuContextHandle::create_display(NullDevice);
        let id = first.register_texture(1);
        assert!(!first.shares_namespace_with(&second));
        assert_eq!(second.texture(id), None);
    }

    #[test]
    fn device_creation_skips_without_gpu() {
        // This test requires a GPU, so it may be skipped in CI
        match pollster::block_on(create_device("test_device")) {
            Ok(device) => assert!(!device.info.adapter_name.is_empty()),
            Err(e) => println!("Skipping test (no GPU): {}", e),
        }
    }
}
