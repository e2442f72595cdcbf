//! Headless EGL backend: a negotiated GL context with offscreen swapchains.

use super::{blit_region, OutputId, OutputSurface, RenderBackend, VirtualOutput};
use crate::config::RenderConfig;
use crate::context::egl::{EglContext, EglDisplay};
use crate::context::{ContextApi, ContextRequest};
use crate::device::gl::GlowDevice;
use crate::device::GpuDevice;
use crate::error::{BackendError, FrameError};
use crate::geometry::{Region, Size};
use crate::render_target::{RenderTarget, RenderTargetStack};
use crate::texture_pool::TexturePool;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::info;

const DEFAULT_BUFFER_COUNT: usize = 3;

pub struct EglBackend {
    // Dropped before the context.
    outputs: BTreeMap<OutputId, VirtualOutput>,
    pool: TexturePool,
    device: Rc<GlowDevice>,
    context: EglContext,
    buffer_count: usize,
}

impl std::fmt::Debug for EglBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EglBackend")
            .field("context", &self.context)
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EglBackend {
    /// Opens the default EGL display and negotiates a context for `api`.
    pub fn new(api: ContextApi, config: &RenderConfig) -> Result<Self, BackendError> {
        let display = EglDisplay::open_default()?;
        let request = match api {
            ContextApi::OpenGlEs => ContextRequest::gles(),
            ContextApi::OpenGl => ContextRequest::desktop(config.prefer_core_profile),
        };
        let context = display.create_context(&request)?;
        let device = Rc::new(GlowDevice::new(context.gl().clone()));
        info!(
            target: "egl",
            "EGL backend on {} ({}), context {}",
            device.info().renderer,
            device.info().version_string,
            context.attributes()
        );
        let pool = TexturePool::new(device.clone(), config);
        Ok(Self {
            outputs: BTreeMap::new(),
            pool,
            device,
            context,
            buffer_count: DEFAULT_BUFFER_COUNT,
        })
    }

    pub fn context(&self) -> &EglContext {
        &self.context
    }

    pub fn set_buffer_count(&mut self, buffers: usize) {
        self.buffer_count = buffers.max(1);
    }

    pub fn add_output(&mut self, id: OutputId, size: Size) -> Result<&mut VirtualOutput, BackendError> {
        let output = VirtualOutput::new(&self.pool, id, size, self.buffer_count)
            .map_err(|e| BackendError::Frame(FrameError::RenderTarget(e)))?;
        self.outputs.insert(id, output);
        self.outputs
            .get_mut(&id)
            .ok_or(BackendError::Frame(FrameError::UnknownOutput(id)))
    }

    pub fn remove_output(&mut self, id: OutputId) -> bool {
        self.outputs.remove(&id).is_some()
    }

    pub fn virtual_output_mut(&mut self, id: OutputId) -> Option<&mut VirtualOutput> {
        self.outputs.get_mut(&id)
    }
}

impl RenderBackend for EglBackend {
    fn name(&self) -> &str {
        "egl-headless"
    }

    fn device(&self) -> Rc<dyn GpuDevice> {
        self.device.clone()
    }

    fn texture_pool(&self) -> TexturePool {
        self.pool.clone()
    }

    fn outputs(&self) -> Vec<OutputId> {
        self.outputs.keys().copied().collect()
    }

    fn output_mut(&mut self, id: OutputId) -> Option<&mut dyn OutputSurface> {
        self.outputs
            .get_mut(&id)
            .map(|output| output as &mut dyn OutputSurface)
    }

    fn make_current(&mut self) -> Result<(), BackendError> {
        Ok(self.context.make_current()?)
    }

    fn done_current(&mut self) -> Result<(), BackendError> {
        Ok(self.context.done_current()?)
    }

    fn supports_buffer_age(&self) -> bool {
        true
    }

    fn is_direct_rendering(&self) -> bool {
        !self.device.info().is_software_rasterizer()
    }

    fn has_extension(&self, name: &str) -> bool {
        self.context.display().has_extension(name) || self.device.info().has_extension(name)
    }

    fn copy_pixels(
        &mut self,
        stack: &RenderTargetStack,
        destination: &mut RenderTarget,
        region: &Region,
    ) -> Result<(), BackendError> {
        blit_region(stack, destination, region)
    }
}
