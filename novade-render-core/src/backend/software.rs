//! Raster fallback backend running on the [`SoftwareDevice`].

use super::{blit_region, OutputId, OutputSurface, RenderBackend, VirtualOutput};
use crate::config::RenderConfig;
use crate::device::software::SoftwareDevice;
use crate::device::GpuDevice;
use crate::error::{BackendError, FrameError};
use crate::geometry::{Region, Size};
use crate::render_target::{RenderTarget, RenderTargetStack};
use crate::texture_pool::TexturePool;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::info;

const DEFAULT_BUFFER_COUNT: usize = 2;

pub struct SoftwareBackend {
    device: Rc<SoftwareDevice>,
    pool: TexturePool,
    outputs: BTreeMap<OutputId, VirtualOutput>,
    buffer_count: usize,
    current: bool,
}

impl std::fmt::Debug for SoftwareBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareBackend")
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("buffer_count", &self.buffer_count)
            .finish()
    }
}

impl SoftwareBackend {
    pub fn new(config: &RenderConfig) -> Self {
        Self::with_device(Rc::new(SoftwareDevice::new()), config)
    }

    pub fn with_device(device: Rc<SoftwareDevice>, config: &RenderConfig) -> Self {
        info!(target: "frame", "Using the software rendering backend");
        let pool = TexturePool::new(device.clone(), config);
        Self {
            device,
            pool,
            outputs: BTreeMap::new(),
            buffer_count: DEFAULT_BUFFER_COUNT,
            current: false,
        }
    }

    pub fn software_device(&self) -> &Rc<SoftwareDevice> {
        &self.device
    }

    /// Buffers per output swapchain for outputs added afterwards.
    pub fn set_buffer_count(&mut self, buffers: usize) {
        self.buffer_count = buffers.max(1);
    }

    pub fn add_output(&mut self, id: OutputId, size: Size) -> Result<&mut VirtualOutput, BackendError> {
        let output = VirtualOutput::new(&self.pool, id, size, self.buffer_count)
            .map_err(|e| BackendError::Frame(FrameError::RenderTarget(e)))?;
        Ok(match self.outputs.entry(id) {
            Entry::Occupied(mut entry) => {
                entry.insert(output);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(output),
        })
    }

    pub fn remove_output(&mut self, id: OutputId) -> bool {
        self.outputs.remove(&id).is_some()
    }

    pub fn virtual_output(&self, id: OutputId) -> Option<&VirtualOutput> {
        self.outputs.get(&id)
    }

    pub fn virtual_output_mut(&mut self, id: OutputId) -> Option<&mut VirtualOutput> {
        self.outputs.get_mut(&id)
    }

    /// RGBA pixels of the buffer currently on screen.
    pub fn presented_pixels(&self, id: OutputId) -> Option<(Size, Vec<u8>)> {
        let texture = self.outputs.get(&id)?.front_buffer()?.texture()?;
        self.device.texture_pixels(texture.id(), 0)
    }

    pub fn is_current(&self) -> bool {
        self.current
    }
}

impl RenderBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
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
        self.current = true;
        Ok(())
    }

    fn done_current(&mut self) -> Result<(), BackendError> {
        self.current = false;
        Ok(())
    }

    fn supports_buffer_age(&self) -> bool {
        true
    }

    fn has_extension(&self, name: &str) -> bool {
        self.device.info().has_extension(name)
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
