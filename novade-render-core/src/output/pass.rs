use crate::device::{GpuDevice, Uniform};
use crate::error::FrameError;
use crate::geometry::{Rect, Region};
use crate::render_target::{RenderTarget, RenderTargetStack, TargetBinding};
use crate::shader::{projection, ShaderManager};
use crate::texture::GpuTexture;
use crate::texture_pool::TexturePool;
use crate::vertex::{BufferManager, PlainVertex, TexturedVertex, Topology};
use glam::{Mat4, Vec3};
use std::rc::Rc;
use tracing::{trace, warn};

/// The device-wide objects a frame renders with.
pub struct RenderResources<'a> {
    pub device: Rc<dyn GpuDevice>,
    pub pool: &'a TexturePool,
    pub shaders: &'a ShaderManager,
    pub buffers: &'a mut BufferManager,
    pub stack: &'a mut RenderTargetStack,
}

/// Drawing interface handed to scene code for one output frame.
///
/// Everything drawn on the output is restricted to the frame's repaint region.
/// Offscreen targets pushed with [`push_offscreen`](Self::push_offscreen) are
/// drawn without that restriction and do not count as output content.
pub struct RenderPass<'p, 'r> {
    resources: &'p mut RenderResources<'r>,
    output: TargetBinding,
    repaint: Region,
    offscreen: Vec<TargetBinding>,
    drawn: bool,
    gpu_work: bool,
}

impl<'p, 'r> RenderPass<'p, 'r> {
    pub(crate) fn new(resources: &'p mut RenderResources<'r>, output: TargetBinding, repaint: Region) -> Self {
        Self {
            resources,
            output,
            repaint,
            offscreen: Vec::new(),
            drawn: false,
            gpu_work: false,
        }
    }

    /// Output-local region this frame repaints.
    pub fn repaint_region(&self) -> &Region {
        &self.repaint
    }

    pub fn is_offscreen(&self) -> bool {
        !self.offscreen.is_empty()
    }

    /// Whether anything was drawn on the output so far.
    pub fn has_drawn(&self) -> bool {
        self.drawn
    }

    pub fn texture_pool(&self) -> &TexturePool {
        self.resources.pool
    }

    fn current(&self) -> TargetBinding {
        self.offscreen.last().copied().unwrap_or(self.output)
    }

    fn mark(&mut self) {
        self.gpu_work = true;
        if self.offscreen.is_empty() {
            self.drawn = true;
        }
    }

    /// Where a draw covering `rect` may touch pixels, top-left based.
    fn clip_for(&self, rect: Rect) -> Region {
        if self.offscreen.is_empty() {
            self.repaint.intersected_with_rect(&rect)
        } else {
            Region::from_rect(rect.intersection(&Rect::from_size(self.current().size)))
        }
    }

    fn device_clip(&self, clip: &Region) -> Region {
        self.current().device_region(self.resources.device.info(), clip)
    }

    /// Fills the repaint region (or the whole offscreen target) with `color`.
    pub fn clear(&mut self, color: [f32; 4]) {
        let current = self.current();
        let clip = self.clip_for(Rect::from_size(current.size));
        if clip.is_empty() {
            return;
        }
        let device = self.resources.device.clone();
        for rect in self.device_clip(&clip).rects() {
            device.set_scissor(Some(*rect));
            device.clear_color(color);
        }
        device.set_scissor(None);
        self.mark();
    }

    /// Draws `src` of `texture` (logical pixels, the whole image when `None`)
    /// stretched over `dst`.
    pub fn draw_texture(
        &mut self,
        texture: &mut GpuTexture,
        src: Option<Rect>,
        dst: Rect,
        opacity: f32,
    ) -> Result<(), FrameError> {
        let clip = self.clip_for(dst);
        if clip.is_empty() {
            trace!(target: "frame", "Texture {} at {} outside the repaint region", texture.id(), dst);
            return Ok(());
        }
        let shaders = self.resources.shaders;
        let shader = shaders.textured().ok_or(FrameError::ShaderUnavailable("textured"))?;
        let current = self.current();
        let device_clip = self.device_clip(&clip);

        shader.bind();
        shader.set_mvp(&(projection(current.size) * Mat4::from_translation(Vec3::new(dst.x as f32, dst.y as f32, 0.0))));
        shader.set_texture_matrix(&Mat4::IDENTITY);
        shader.set_uniform("sampler", Uniform::Int(0));
        shader.set_uniform("opacity", Uniform::Float(opacity));
        let src = src.unwrap_or_else(|| Rect::from_size(texture.logical_size()));
        let result = texture.render_region(src, Some(&device_clip), dst.size());
        shader.unbind();
        result?;
        self.mark();
        Ok(())
    }

    /// Fills `rect` with a solid colour through the streaming buffer.
    pub fn fill_rect(&mut self, rect: Rect, color: [f32; 4]) -> Result<(), FrameError> {
        let clip = self.clip_for(rect);
        if clip.is_empty() {
            return Ok(());
        }
        let shaders = self.resources.shaders;
        let shader = shaders.solid().ok_or(FrameError::ShaderUnavailable("solid"))?;
        let current = self.current();
        let device_clip = self.device_clip(&clip);

        let (left, top) = (rect.x as f32, rect.y as f32);
        let (right, bottom) = (rect.right() as f32, rect.bottom() as f32);
        let vertices = [
            PlainVertex { position: [left, top] },
            PlainVertex { position: [left, bottom] },
            PlainVertex { position: [right, top] },
            PlainVertex { position: [right, bottom] },
        ];

        shader.bind();
        shader.set_mvp(&projection(current.size));
        shader.set_uniform("color", Uniform::Vec4(color));
        let vbo = self.resources.buffers.streaming_buffer();
        vbo.set_attrib_layout(&PlainVertex::layout(), PlainVertex::STRIDE);
        let result = vbo
            .set_vertices(&vertices)
            .and_then(|_| vbo.render_clipped(Topology::TriangleStrip, &device_clip));
        shader.unbind();
        result?;
        self.mark();
        Ok(())
    }

    /// Submits ad-hoc textured quads (four vertices each, target pixels and
    /// normalized texture coordinates) through the streaming buffer.
    pub fn draw_quads(
        &mut self,
        texture: &mut GpuTexture,
        vertices: &[TexturedVertex],
        opacity: f32,
    ) -> Result<(), FrameError> {
        if vertices.len() < 4 {
            return Ok(());
        }
        let current = self.current();
        let clip = self.clip_for(Rect::from_size(current.size));
        if clip.is_empty() {
            return Ok(());
        }
        let shaders = self.resources.shaders;
        let shader = shaders.textured().ok_or(FrameError::ShaderUnavailable("textured"))?;
        let device_clip = self.device_clip(&clip);

        shader.bind();
        shader.set_mvp(&projection(current.size));
        shader.set_texture_matrix(&Mat4::IDENTITY);
        shader.set_uniform("sampler", Uniform::Int(0));
        shader.set_uniform("opacity", Uniform::Float(opacity));
        texture.bind(0);
        let vbo = self.resources.buffers.streaming_buffer();
        vbo.set_attrib_layout(&TexturedVertex::layout(), TexturedVertex::STRIDE);
        let result = vbo
            .set_vertices(vertices)
            .and_then(|_| vbo.render_clipped(Topology::Quads, &device_clip));
        texture.unbind(0);
        shader.unbind();
        result?;
        self.mark();
        Ok(())
    }

    /// Redirects drawing into `target` until [`pop_offscreen`](Self::pop_offscreen).
    pub fn push_offscreen(&mut self, target: &RenderTarget) {
        let binding = target.binding();
        self.resources.stack.push(binding);
        self.offscreen.push(binding);
    }

    pub fn pop_offscreen(&mut self) -> bool {
        if self.offscreen.pop().is_none() {
            return false;
        }
        self.resources.stack.pop();
        true
    }

    /// Copies `source` of the current target into `destination` of `target`.
    pub fn blit_to(&mut self, target: &mut RenderTarget, source: Rect, destination: Rect) -> Result<(), FrameError> {
        self.resources
            .stack
            .blit_from_current(target, source, destination, crate::device::Filter::Linear)
            .map_err(|e| FrameError::Draw(e.into()))?;
        self.gpu_work = true;
        Ok(())
    }

    /// Unwinds leftover offscreen targets; returns `(drawn, gpu_work)`.
    pub(crate) fn finish(mut self) -> (bool, bool) {
        if !self.offscreen.is_empty() {
            warn!(target: "frame", "{} offscreen targets left pushed at the end of a frame", self.offscreen.len());
            while self.pop_offscreen() {}
        }
        (self.drawn, self.gpu_work)
    }
}
