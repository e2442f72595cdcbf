//! Framebuffer abstraction for redirecting rendering into textures.
//!
//! A [`RenderTarget`] is either the window-system framebuffer of an output or a
//! framebuffer object with a colour texture attached. Rendering always happens
//! into the top of a [`RenderTargetStack`]; popping restores the previous
//! binding and viewport.

use crate::device::{
    DeviceFeatures, DeviceInfo, Filter, FramebufferId, FramebufferTarget, GpuDevice, Uniform,
};
use crate::error::{DeviceError, TextureError};
use crate::geometry::{OutputTransform, Rect, Region, Size};
use crate::shader::{projection, ShaderProgram};
use crate::texture::GpuTexture;
use crate::texture_pool::TexturePool;
use glam::Mat4;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// What a stack entry binds: a framebuffer (or the default one) and its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetBinding {
    pub framebuffer: Option<FramebufferId>,
    pub size: Size,
}

impl TargetBinding {
    /// Converts a top-left based region into the binding's device coordinates.
    pub fn device_region(&self, info: &DeviceInfo, region: &Region) -> Region {
        Region::from_rects(
            region
                .rects()
                .iter()
                .map(|r| info.to_device_rect(*r, self.size.height)),
        )
    }
}

pub struct RenderTarget {
    device: Rc<dyn GpuDevice>,
    framebuffer: Option<FramebufferId>,
    texture: Option<GpuTexture>,
    size: Size,
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("framebuffer", &self.framebuffer)
            .field("texture", &self.texture.as_ref().map(GpuTexture::id))
            .field("size", &self.size)
            .finish()
    }
}

impl RenderTarget {
    /// The window-system framebuffer of an output.
    pub fn default_framebuffer(device: Rc<dyn GpuDevice>, size: Size) -> Self {
        Self {
            device,
            framebuffer: None,
            texture: None,
            size,
        }
    }

    /// An offscreen target backed by a fresh texture of `size`.
    pub fn with_texture(pool: &TexturePool, size: Size) -> Result<Self, TextureError> {
        let device = pool.device().clone();
        if !device.info().supports(DeviceFeatures::FRAMEBUFFER_OBJECTS) {
            return Err(TextureError::Device(DeviceError::Unsupported("framebuffer objects")));
        }
        let mut texture = GpuTexture::allocate(pool, size, 1)?;
        texture.set_y_inverted(device.info().origin_bottom_left);

        let framebuffer = device.create_framebuffer()?;
        let previous = device.draw_framebuffer_binding();
        device.bind_framebuffer(FramebufferTarget::Draw, Some(framebuffer));
        let attached = device.attach_color_texture(FramebufferTarget::Draw, Some(texture.id()), 0);
        device.bind_framebuffer(FramebufferTarget::Draw, previous);
        if let Err(e) = attached {
            warn!(target: "gl", "Offscreen render target {} is unusable: {}", size, e);
            device.delete_framebuffer(framebuffer);
            return Err(TextureError::Device(e));
        }
        debug!(target: "gl", "Created offscreen render target {} ({})", framebuffer, size);
        Ok(Self {
            device,
            framebuffer: Some(framebuffer),
            texture: Some(texture),
            size,
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Only meaningful for the default framebuffer, whose size follows the output.
    pub fn set_size(&mut self, size: Size) {
        if self.texture.is_none() {
            self.size = size;
        }
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    pub fn is_offscreen(&self) -> bool {
        self.texture.is_some()
    }

    pub fn texture(&self) -> Option<&GpuTexture> {
        self.texture.as_ref()
    }

    pub fn texture_mut(&mut self) -> Option<&mut GpuTexture> {
        self.texture.as_mut()
    }

    pub fn binding(&self) -> TargetBinding {
        TargetBinding {
            framebuffer: self.framebuffer,
            size: self.size,
        }
    }

    /// Converts a top-left based rectangle into this target's device coordinates.
    pub fn device_rect(&self, rect: Rect) -> Rect {
        self.device.info().to_device_rect(rect, self.size.height)
    }

    pub fn device_region(&self, region: &Region) -> Region {
        self.binding().device_region(self.device.info(), region)
    }

    pub fn projection(&self) -> Mat4 {
        projection(self.size)
    }

    /// Draws this target's texture into the current target, rotated by `transform`.
    ///
    /// The texture fills `destination_size` after rotation; `clip` is in the
    /// destination's device coordinates.
    pub fn draw_transformed(
        &mut self,
        shader: &ShaderProgram,
        transform: OutputTransform,
        destination_size: Size,
        clip: Option<&Region>,
    ) -> Result<(), TextureError> {
        let Some(texture) = self.texture.as_mut() else {
            return Err(TextureError::Device(DeviceError::Unsupported(
                "drawing the default framebuffer as a texture",
            )));
        };
        texture.set_content_transform(transform);
        shader.bind();
        shader.set_mvp(&projection(destination_size));
        shader.set_texture_matrix(&Mat4::IDENTITY);
        shader.set_uniform("sampler", Uniform::Int(0));
        shader.set_uniform("opacity", Uniform::Float(1.0));
        let result = texture.render_region(Rect::from_size(texture.logical_size()), clip, destination_size);
        shader.unbind();
        result
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        if let Some(framebuffer) = self.framebuffer.take() {
            if self.device.draw_framebuffer_binding() == Some(framebuffer) {
                self.device.bind_framebuffer(FramebufferTarget::Both, None);
            }
            self.device.delete_framebuffer(framebuffer);
        }
    }
}

/// The stack of targets rendering is redirected to; the top is current.
pub struct RenderTargetStack {
    device: Rc<dyn GpuDevice>,
    stack: Vec<TargetBinding>,
}

impl RenderTargetStack {
    pub fn new(device: Rc<dyn GpuDevice>) -> Self {
        Self {
            device,
            stack: Vec::new(),
        }
    }

    pub fn current(&self) -> Option<TargetBinding> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn apply(&self, binding: TargetBinding) {
        self.device
            .bind_framebuffer(FramebufferTarget::Draw, binding.framebuffer);
        self.device.viewport(Rect::from_size(binding.size));
    }

    /// Makes `binding` current.
    pub fn push(&mut self, binding: TargetBinding) {
        trace!(target: "gl", "Render target push {:?} (depth {})", binding, self.stack.len() + 1);
        self.apply(binding);
        self.stack.push(binding);
    }

    /// Restores the previous target, or unbinds everything when the stack
    /// becomes empty.
    pub fn pop(&mut self) -> Option<TargetBinding> {
        let popped = self.stack.pop()?;
        match self.stack.last() {
            Some(previous) => self.apply(*previous),
            None => self.device.bind_framebuffer(FramebufferTarget::Draw, None),
        }
        Some(popped)
    }

    /// Copies `source` of the current target into `destination` of `target`.
    ///
    /// Both rectangles are top-left based. Without framebuffer blits the copy
    /// goes through the target's texture and cannot scale.
    pub fn blit_from_current(
        &self,
        target: &mut RenderTarget,
        source: Rect,
        destination: Rect,
        filter: Filter,
    ) -> Result<(), DeviceError> {
        let Some(current) = self.current() else {
            return Err(DeviceError::InvalidHandle("no current render target".to_string()));
        };
        let info = self.device.info();
        let src = info.to_device_rect(source, current.size.height);
        let dst = target.device_rect(destination);

        self.device.bind_framebuffer(FramebufferTarget::Read, current.framebuffer);
        let result = if info.supports(DeviceFeatures::BLIT_FRAMEBUFFER) {
            self.device.bind_framebuffer(FramebufferTarget::Draw, target.framebuffer);
            self.device.set_scissor(None);
            self.device.blit_framebuffer(src, dst, filter);
            self.device.bind_framebuffer(FramebufferTarget::Draw, current.framebuffer);
            Ok(())
        } else if source.size() != destination.size() {
            Err(DeviceError::Unsupported("scaled copies without framebuffer blits"))
        } else if let Some(texture) = target.texture.as_mut() {
            texture.bind(0);
            self.device
                .copy_tex_sub_image_2d(texture.target(), dst.origin(), src);
            texture.unbind(0);
            Ok(())
        } else {
            Err(DeviceError::Unsupported("copying into the default framebuffer"))
        };
        self.device.bind_framebuffer(FramebufferTarget::Read, None);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::device::software::SoftwareDevice;
    use crate::shader::ShaderManager;

    fn setup(features: DeviceFeatures) -> (Rc<SoftwareDevice>, TexturePool) {
        let device = Rc::new(SoftwareDevice::with_features(features));
        let pool = TexturePool::new(device.clone(), &RenderConfig::default());
        (device, pool)
    }

    #[test]
    fn stack_restores_binding_and_viewport() {
        let (device, pool) = setup(DeviceFeatures::all());
        let screen = RenderTarget::default_framebuffer(device.clone(), Size::new(100, 50));
        let offscreen = RenderTarget::with_texture(&pool, Size::new(20, 10)).unwrap();
        let mut stack = RenderTargetStack::new(device.clone());

        stack.push(screen.binding());
        stack.push(offscreen.binding());
        assert_eq!(device.current_draw_framebuffer(), offscreen.framebuffer());
        assert_eq!(device.current_viewport(), Rect::new(0, 0, 20, 10));

        stack.pop();
        assert_eq!(device.current_draw_framebuffer(), None);
        assert_eq!(device.current_viewport(), Rect::new(0, 0, 100, 50));
        assert_eq!(stack.current(), Some(screen.binding()));
        stack.pop();
        assert!(stack.pop().is_none());
    }

    #[test]
    fn incomplete_framebuffer_is_reported_and_cleaned_up() {
        let (device, pool) = setup(DeviceFeatures::all());
        device.set_incomplete_framebuffers(true);
        assert!(RenderTarget::with_texture(&pool, Size::new(8, 8)).is_err());
        assert_eq!(device.live_framebuffer_count(), 0);
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn blit_copies_between_targets_with_and_without_blit_support() {
        for features in [
            DeviceFeatures::all(),
            DeviceFeatures::all() - DeviceFeatures::BLIT_FRAMEBUFFER,
        ] {
            let (device, pool) = setup(features);
            let source = RenderTarget::with_texture(&pool, Size::new(8, 8)).unwrap();
            let mut destination = RenderTarget::with_texture(&pool, Size::new(8, 8)).unwrap();
            let mut stack = RenderTargetStack::new(device.clone());
            stack.push(source.binding());
            device.set_scissor(Some(Rect::new(2, 2, 2, 2)));
            device.clear_color([1.0, 0.0, 0.0, 1.0]);

            stack
                .blit_from_current(&mut destination, Rect::new(0, 0, 4, 4), Rect::new(4, 4, 4, 4), Filter::Nearest)
                .unwrap();

            let (size, pixels) = device
                .texture_pixels(destination.texture().unwrap().id(), 0)
                .unwrap();
            let at = |x: i32, y: i32| {
                let o = ((y * size.width + x) * 4) as usize;
                pixels[o..o + 4].to_vec()
            };
            assert_eq!(at(6, 6), vec![255, 0, 0, 255]);
            assert_eq!(at(4, 4), vec![0, 0, 0, 0]);
            assert_eq!(device.current_draw_framebuffer(), source.framebuffer());
        }
    }

    #[test]
    fn scaled_copy_needs_blit_support() {
        let (device, pool) = setup(DeviceFeatures::all() - DeviceFeatures::BLIT_FRAMEBUFFER);
        let source = RenderTarget::with_texture(&pool, Size::new(8, 8)).unwrap();
        let mut destination = RenderTarget::with_texture(&pool, Size::new(8, 8)).unwrap();
        let mut stack = RenderTargetStack::new(device);
        stack.push(source.binding());
        assert!(stack
            .blit_from_current(&mut destination, Rect::new(0, 0, 4, 4), Rect::new(0, 0, 8, 8), Filter::Linear)
            .is_err());
    }

    #[test]
    fn transformed_draw_covers_rotated_destination() {
        let (device, pool) = setup(DeviceFeatures::all());
        let shaders = ShaderManager::new(device.clone());
        let mut intermediate = RenderTarget::with_texture(&pool, Size::new(40, 20)).unwrap();
        device.take_draws();

        intermediate
            .draw_transformed(shaders.textured().unwrap(), OutputTransform::Rotated90, Size::new(20, 40), None)
            .unwrap();
        let draws = device.take_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].positions, vec![[0.0, 0.0], [0.0, 40.0], [20.0, 0.0], [20.0, 40.0]]);
        assert_eq!(intermediate.texture().unwrap().logical_size(), Size::new(20, 40));
    }
}
