//! Per-device texture registry.
//!
//! Every [`GpuTexture`](crate::texture::GpuTexture) acquires a slot on creation
//! and releases it on drop. The pool lazily creates the scratch framebuffer
//! used by the texture clear fast path and tears it down when the last texture
//! is released.

use crate::config::RenderConfig;
use crate::device::{DeviceFeatures, FramebufferId, GpuDevice};
use crate::error::DeviceError;
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info, warn};

struct PoolInner {
    device: Rc<dyn GpuDevice>,
    live: Cell<usize>,
    scratch_framebuffer: Cell<Option<FramebufferId>>,
    clear_blacklisted: bool,
}

/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct TexturePool {
    inner: Rc<PoolInner>,
}

impl std::fmt::Debug for TexturePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TexturePool")
            .field("live", &self.inner.live.get())
            .field("scratch_framebuffer", &self.inner.scratch_framebuffer.get())
            .finish()
    }
}

impl TexturePool {
    pub fn new(device: Rc<dyn GpuDevice>, config: &RenderConfig) -> Self {
        let clear_blacklisted = config.is_clear_blacklisted(&device.info().renderer);
        if clear_blacklisted {
            info!(
                target: "gl",
                "Framebuffer clears disabled for renderer {:?}", device.info().renderer
            );
        }
        Self {
            inner: Rc::new(PoolInner {
                device,
                live: Cell::new(0),
                scratch_framebuffer: Cell::new(None),
                clear_blacklisted,
            }),
        }
    }

    pub fn device(&self) -> &Rc<dyn GpuDevice> {
        &self.inner.device
    }

    /// Registers a texture; returns the new live count.
    pub fn acquire(&self) -> usize {
        let live = self.inner.live.get() + 1;
        self.inner.live.set(live);
        live
    }

    /// Unregisters a texture. Releasing the last one deletes the scratch
    /// framebuffer.
    pub fn release(&self) -> usize {
        let live = self.inner.live.get();
        if live == 0 {
            warn!(target: "gl", "Texture pool released more textures than it acquired");
            return 0;
        }
        self.inner.live.set(live - 1);
        if live == 1 {
            if let Some(fbo) = self.inner.scratch_framebuffer.take() {
                debug!(target: "gl", "Last texture released; deleting scratch {}", fbo);
                self.inner.device.delete_framebuffer(fbo);
            }
        }
        live - 1
    }

    pub fn live_textures(&self) -> usize {
        self.inner.live.get()
    }

    /// Whether textures may be cleared by attaching them to a framebuffer.
    pub fn clear_fast_path_available(&self) -> bool {
        !self.inner.clear_blacklisted
            && self
                .inner
                .device
                .info()
                .supports(DeviceFeatures::FRAMEBUFFER_OBJECTS)
    }

    pub fn has_scratch_framebuffer(&self) -> bool {
        self.inner.scratch_framebuffer.get().is_some()
    }

    pub(crate) fn scratch_framebuffer(&self) -> Result<FramebufferId, DeviceError> {
        if let Some(fbo) = self.inner.scratch_framebuffer.get() {
            return Ok(fbo);
        }
        let fbo = self.inner.device.create_framebuffer()?;
        self.inner.scratch_framebuffer.set(Some(fbo));
        Ok(fbo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;

    #[test]
    fn last_release_tears_down_scratch_framebuffer() {
        let device = Rc::new(SoftwareDevice::new());
        let pool = TexturePool::new(device.clone(), &RenderConfig::default());
        pool.acquire();
        pool.acquire();
        let fbo = pool.scratch_framebuffer().unwrap();
        assert_eq!(pool.scratch_framebuffer().unwrap(), fbo);

        assert_eq!(pool.release(), 1);
        assert!(device.framebuffer_exists(fbo));
        assert_eq!(pool.release(), 0);
        assert!(!device.framebuffer_exists(fbo));
        assert!(!pool.has_scratch_framebuffer());
        assert_eq!(pool.release(), 0);
    }

    #[test]
    fn blacklisted_renderer_disables_fast_clear() {
        let device = Rc::new(SoftwareDevice::new());
        let config = RenderConfig {
            clear_blacklist: vec!["software rasterizer".to_string()],
            ..RenderConfig::default()
        };
        let pool = TexturePool::new(device, &config);
        assert!(!pool.clear_fast_path_available());
    }
}
