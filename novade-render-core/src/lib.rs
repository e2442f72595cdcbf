//! # NovaDE Render Core (`novade-render-core`)
//!
//! The rendering and compositing core shared by NovaDE's Wayland and X11
//! compositor paths. It owns the GPU-side resources (textures, vertex
//! streaming, render targets, shader programs), negotiates rendering contexts
//! and drives every output through the buffer-age aware frame pipeline.
//!
//! ## Layers
//!
//! - **Device**: the GL-like [`GpuDevice`](device::GpuDevice) command surface,
//!   implemented over `glow` and by a CPU [`SoftwareDevice`](device::software::SoftwareDevice)
//!   used as the raster fallback and by tests.
//! - **Resources**: [`GpuTexture`], [`VertexBuffer`](vertex::VertexBuffer) with the
//!   persistent-mapped streaming ring, [`RenderTarget`] and the target stack.
//! - **Context**: ranked [`CandidateList`](context::CandidateList) negotiation,
//!   with an EGL implementation behind the `backend_egl` feature.
//! - **Output**: the per-output [`OutputFramePipeline`] deciding how much of each
//!   buffer to repaint, presenting or rolling back frames.
//! - **Backend**: the [`RenderBackend`](backend::RenderBackend) seam between the
//!   pipeline and presentation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use novade_render_core::{backend::SoftwareBackend, geometry::*, RenderConfig, Renderer};
//!
//! let config = RenderConfig::default();
//! let mut backend = SoftwareBackend::new(&config);
//! backend.add_output(1, Size::new(1920, 1080))?;
//! let mut renderer = Renderer::new(backend, config)?;
//!
//! let damage = Region::from_rect(Rect::new(0, 0, 64, 64));
//! renderer.render_output(1, &damage, |pass| {
//!     pass.fill_rect(Rect::new(0, 0, 64, 64), [0.2, 0.2, 0.2, 1.0])
//! })?;
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod geometry;
pub mod image;
pub mod logging;
pub mod output;
pub mod render_target;
pub mod renderer;
pub mod shader;
pub mod texture;
pub mod texture_pool;
pub mod vertex;

pub use config::RenderConfig;
pub use error::{
    BackendError, BufferError, ConfigError, ContextError, DeviceError, FrameError, RenderError,
    TextureError,
};
pub use geometry::{OutputTransform, Point, Rect, Region, Size};
pub use image::{PixelBuffer, PixelFormat};
pub use logging::init_minimal_logging;
pub use output::{FrameOutcome, OutputFramePipeline, RenderPass, RepaintPlan, RepaintReason};
pub use render_target::{RenderTarget, RenderTargetStack};
pub use renderer::Renderer;
pub use texture::GpuTexture;
pub use texture_pool::TexturePool;
