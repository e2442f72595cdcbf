//! Presentation backends.
//!
//! A [`RenderBackend`] owns the rendering context and one [`OutputSurface`] per
//! physical output. The frame pipeline only talks to these traits; optional
//! hooks default to [`BackendError::Unsupported`] so a backend implements just
//! what it can do.

pub mod events;
pub mod listener;
pub mod software;
mod swapchain;

#[cfg(feature = "backend_egl")]
pub mod egl;

pub use events::{EventBus, RenderEvent, RenderEventKind, SubscriptionId};
pub use listener::{NativeCallback, NativeListener};
pub use software::SoftwareBackend;
pub use swapchain::{PageFlip, VirtualOutput};

use crate::device::{Filter, GpuDevice};
use crate::error::BackendError;
use crate::geometry::{OutputTransform, Region, Size};
use crate::render_target::{RenderTarget, RenderTargetStack, TargetBinding};
use crate::texture_pool::TexturePool;
use std::rc::Rc;

/// Identifies a physical output within a backend.
pub type OutputId = u32;

/// The buffer an output hands out for the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTarget {
    pub binding: TargetBinding,
    /// Frames since this buffer was last on screen; zero when its contents
    /// are undefined.
    pub buffer_age: u32,
}

impl FrameTarget {
    pub fn size(&self) -> Size {
        self.binding.size
    }
}

/// Buffer-age reporting of an output.
pub trait DamageTrackable {
    fn supports_buffer_age(&self) -> bool;

    /// Age of the buffer most recently handed out by `begin_frame`.
    fn buffer_age(&self) -> u32;
}

/// Per-output frame hand-off.
pub trait Presentable {
    /// Acquires the next buffer to render into.
    fn begin_frame(&mut self) -> Result<FrameTarget, BackendError>;

    /// Queues the acquired buffer for display; `damage` is in buffer pixels.
    fn present(&mut self, damage: &Region) -> Result<(), BackendError>;

    /// Gives the acquired buffer back without showing it.
    fn rollback(&mut self);
}

pub trait OutputSurface: DamageTrackable + Presentable {
    fn id(&self) -> OutputId;

    /// Size of the buffers in pixels.
    fn size(&self) -> Size;

    /// Orientation of the panel relative to the logical output.
    fn transform(&self) -> OutputTransform {
        OutputTransform::Normal
    }

    /// Whether the render core has to apply [`transform`](Self::transform)
    /// itself instead of the display hardware.
    fn needs_transform_correction(&self) -> bool {
        false
    }
}

/// A rendering backend: context lifecycle, capabilities and outputs.
pub trait RenderBackend {
    fn name(&self) -> &str;

    fn device(&self) -> Rc<dyn GpuDevice>;

    /// The texture registry shared by everything rendering on [`device`](Self::device).
    fn texture_pool(&self) -> TexturePool;

    fn outputs(&self) -> Vec<OutputId>;

    fn output_mut(&mut self, id: OutputId) -> Option<&mut dyn OutputSurface>;

    fn make_current(&mut self) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("make_current"))
    }

    fn done_current(&mut self) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("done_current"))
    }

    fn supports_buffer_age(&self) -> bool {
        false
    }

    fn is_direct_rendering(&self) -> bool {
        false
    }

    fn has_extension(&self, _name: &str) -> bool {
        false
    }

    /// Copies `region` (top-left based) from the current target into the same
    /// place of `destination`.
    fn copy_pixels(
        &mut self,
        _stack: &RenderTargetStack,
        _destination: &mut RenderTarget,
        _region: &Region,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("copy_pixels"))
    }
}

/// [`RenderBackend::copy_pixels`] through framebuffer blits or texture copies.
pub(crate) fn blit_region(
    stack: &RenderTargetStack,
    destination: &mut RenderTarget,
    region: &Region,
) -> Result<(), BackendError> {
    for rect in region.rects() {
        stack.blit_from_current(destination, *rect, *rect, Filter::Nearest)?;
    }
    Ok(())
}
