//! CPU implementation of [`GpuDevice`].
//!
//! Textures are premultiplied RGBA8 images per mip level, framebuffers are
//! texture attachments, buffers are plain byte vectors whose storage never
//! moves while mapped. Triangle draws are rasterized into the bound
//! framebuffer with the current program's uniforms (see [`super::raster`]) and
//! also recorded, with the vertex positions they consumed, for inspection.
//! Clears, blits, pixel copies and uploads are exact.
//!
//! Besides serving as the raster fallback backend, the device can simulate the
//! driver behaviour the render core has to survive: missing features, refused
//! allocations, incomplete framebuffers, failing shader links and fences that
//! only signal when told to.

use super::raster::{self, Fill, RasterSetup};
use super::{
    BufferId, BufferTarget, BufferUsageHint, DeviceFeatures, DeviceInfo, Filter, FenceId,
    FramebufferId, FramebufferTarget, GpuDevice, IndexType, InternalFormat, MapAccess,
    PrimitiveMode, ProgramId, StorageFlags, TextureId, TextureTarget, Uniform, UnpackLayout,
    UploadFormat, VertexAttrib, WaitStatus, WrapMode,
};
use crate::error::DeviceError;
use crate::geometry::{Point, Rect, Size};
use glam::Mat4;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ptr::NonNull;
use std::time::Duration;
use tracing::{debug, trace, warn};

const GL_INVALID_ENUM: u32 = 0x0500;
const GL_INVALID_VALUE: u32 = 0x0501;
const GL_INVALID_OPERATION: u32 = 0x0502;
const GL_OUT_OF_MEMORY: u32 = 0x0505;
const GL_FRAMEBUFFER_UNSUPPORTED: u32 = 0x8CDD;
const GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT: u32 = 0x8CD6;

/// How fences created by the device become signaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceMode {
    /// Work completes synchronously; fences are born signaled.
    Immediate,
    /// Fences signal only through [`SoftwareDevice::signal_fences_through`].
    Manual,
    /// Unsignaled until a client wait, which completes everything up to the fence.
    CompleteOnWait,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub textures_created: u32,
    pub textures_deleted: u32,
    pub tex_image_calls: u32,
    pub tex_sub_image_calls: u32,
    /// Sub-image uploads that used row-length/skip unpacking.
    pub unpack_uploads: u32,
    pub mipmap_generations: u32,
    pub clears: u32,
    pub blits: u32,
    pub pixel_copies: u32,
    pub framebuffers_created: u32,
    pub framebuffers_deleted: u32,
    pub buffers_created: u32,
    pub buffers_deleted: u32,
    pub buffer_copies: u32,
    pub maps: u32,
    pub fences_created: u32,
    pub fence_waits: u32,
    pub draws: u32,
    /// Triangles rasterized into a framebuffer.
    pub triangles: u32,
    pub flushes: u32,
}

/// A draw call as seen by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub mode: PrimitiveMode,
    pub vertex_count: u32,
    pub indexed: bool,
    pub program: Option<ProgramId>,
    pub texture: Option<TextureId>,
    pub framebuffer: Option<FramebufferId>,
    pub scissor: Option<Rect>,
    /// Attribute 0 of every consumed vertex, in submission order.
    pub positions: Vec<[f32; 2]>,
    /// Attribute 1 of every consumed vertex, when enabled.
    pub texcoords: Vec<[f32; 2]>,
}

#[derive(Debug, Clone, Default)]
struct SoftImage {
    size: Size,
    data: Vec<u8>,
}

impl SoftImage {
    fn new(size: Size) -> Self {
        let len = size.area() as usize * 4;
        Self {
            size,
            data: vec![0; len],
        }
    }

    fn bounds(&self) -> Rect {
        Rect::from_size(self.size)
    }

    fn pixel_offset(&self, x: i32, y: i32) -> usize {
        (y as usize * self.size.width as usize + x as usize) * 4
    }

    fn read_rect(&self, rect: Rect) -> Vec<u8> {
        let mut out = Vec::with_capacity(rect.area() as usize * 4);
        for y in rect.y..rect.bottom() {
            let start = self.pixel_offset(rect.x, y);
            out.extend_from_slice(&self.data[start..start + rect.width as usize * 4]);
        }
        out
    }

    /// Writes tightly packed RGBA rows into `rect`, which must lie inside the image.
    fn write_rect(&mut self, rect: Rect, pixels: &[u8]) {
        let row_bytes = rect.width as usize * 4;
        for (row, y) in (rect.y..rect.bottom()).enumerate() {
            let dst = self.pixel_offset(rect.x, y);
            let src = row * row_bytes;
            self.data[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
        }
    }

    fn fill(&mut self, rect: Rect, rgba: [u8; 4]) {
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                let o = self.pixel_offset(x, y);
                self.data[o..o + 4].copy_from_slice(&rgba);
            }
        }
    }

    /// 2x2 box filter producing the next mip level.
    fn downsample(&self) -> SoftImage {
        let size = Size::new((self.size.width / 2).max(1), (self.size.height / 2).max(1));
        let mut out = SoftImage::new(size);
        for y in 0..size.height {
            for x in 0..size.width {
                let mut acc = [0u32; 4];
                for (sx, sy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let px = (2 * x + sx).min(self.size.width - 1);
                    let py = (2 * y + sy).min(self.size.height - 1);
                    let o = self.pixel_offset(px, py);
                    for (c, a) in acc.iter_mut().enumerate() {
                        *a += self.data[o + c] as u32;
                    }
                }
                let o = out.pixel_offset(x, y);
                for (c, a) in acc.iter().enumerate() {
                    out.data[o + c] = ((a + 2) / 4) as u8;
                }
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct SoftTexture {
    levels: Vec<SoftImage>,
    immutable: bool,
    filter: Filter,
    wrap: WrapMode,
}

#[derive(Debug, Default)]
struct SoftBuffer {
    data: Vec<u8>,
    immutable: bool,
    persistent: bool,
    mapped: bool,
}

#[derive(Debug, Default)]
struct SoftProgram {
    active_uniforms: HashSet<String>,
    uniforms: HashMap<String, Uniform>,
}

struct State {
    next_id: u32,
    next_fence: u64,
    textures: HashMap<TextureId, SoftTexture>,
    active_unit: u32,
    texture_bindings: HashMap<(u32, TextureTarget), TextureId>,
    framebuffers: HashMap<FramebufferId, Option<(TextureId, u32)>>,
    draw_framebuffer: Option<FramebufferId>,
    read_framebuffer: Option<FramebufferId>,
    default_framebuffer: SoftImage,
    viewport: Rect,
    scissor: Option<Rect>,
    buffers: HashMap<BufferId, SoftBuffer>,
    buffer_bindings: HashMap<BufferTarget, BufferId>,
    attribs: BTreeMap<u32, (BufferId, VertexAttrib)>,
    programs: HashMap<ProgramId, SoftProgram>,
    current_program: Option<ProgramId>,
    fences: BTreeMap<FenceId, bool>,
    fence_mode: FenceMode,
    errors: VecDeque<u32>,
    draws: Vec<DrawRecord>,
    stats: DeviceStats,
    fail_texture_allocation: bool,
    fail_buffer_storage: bool,
    fail_map: bool,
    fail_next_link: Option<String>,
    incomplete_framebuffers: bool,
    context_lost: bool,
}

impl State {
    fn new() -> Self {
        Self {
            next_id: 1,
            next_fence: 1,
            textures: HashMap::new(),
            active_unit: 0,
            texture_bindings: HashMap::new(),
            framebuffers: HashMap::new(),
            draw_framebuffer: None,
            read_framebuffer: None,
            default_framebuffer: SoftImage::default(),
            viewport: Rect::default(),
            scissor: None,
            buffers: HashMap::new(),
            buffer_bindings: HashMap::new(),
            attribs: BTreeMap::new(),
            programs: HashMap::new(),
            current_program: None,
            fences: BTreeMap::new(),
            fence_mode: FenceMode::Immediate,
            errors: VecDeque::new(),
            draws: Vec::new(),
            stats: DeviceStats::default(),
            fail_texture_allocation: false,
            fail_buffer_storage: false,
            fail_map: false,
            fail_next_link: None,
            incomplete_framebuffers: false,
            context_lost: false,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn error(&mut self, code: u32) {
        trace!(target: "gl", "software device error 0x{:x}", code);
        self.errors.push_back(code);
    }

    fn bound_texture(&self, target: TextureTarget) -> Option<TextureId> {
        self.texture_bindings.get(&(self.active_unit, target)).copied()
    }

    fn bound_texture_mut(&mut self, target: TextureTarget) -> Option<&mut SoftTexture> {
        let id = self.bound_texture(target)?;
        self.textures.get_mut(&id)
    }

    fn bound_buffer_mut(&mut self, target: BufferTarget) -> Option<&mut SoftBuffer> {
        let id = *self.buffer_bindings.get(&target)?;
        self.buffers.get_mut(&id)
    }

    fn framebuffer_image(&self, framebuffer: Option<FramebufferId>) -> Option<&SoftImage> {
        match framebuffer {
            None => Some(&self.default_framebuffer),
            Some(id) => {
                let (texture, level) = (*self.framebuffers.get(&id)?)?;
                self.textures.get(&texture)?.levels.get(level as usize)
            }
        }
    }

    fn framebuffer_image_mut(&mut self, framebuffer: Option<FramebufferId>) -> Option<&mut SoftImage> {
        match framebuffer {
            None => Some(&mut self.default_framebuffer),
            Some(id) => {
                let (texture, level) = (*self.framebuffers.get(&id)?)?;
                self.textures.get_mut(&texture)?.levels.get_mut(level as usize)
            }
        }
    }

    fn read_attrib(&self, index: u32, vertex: u32) -> Option<[f32; 2]> {
        let (buffer, attrib) = self.attribs.get(&index)?;
        let data = &self.buffers.get(buffer)?.data;
        let stride = if attrib.stride == 0 {
            attrib.components * 4
        } else {
            attrib.stride
        } as usize;
        let base = attrib.offset as usize + vertex as usize * stride;
        let mut out = [0.0f32; 2];
        for (c, slot) in out.iter_mut().enumerate().take(attrib.components.min(2) as usize) {
            let o = base + c * 4;
            let bytes: [u8; 4] = data.get(o..o + 4)?.try_into().ok()?;
            *slot = f32::from_ne_bytes(bytes);
        }
        Some(out)
    }

    fn record_draw(&mut self, mode: PrimitiveMode, vertices: &[u32], indexed: bool) {
        let mut positions = Vec::with_capacity(vertices.len());
        let mut texcoords = Vec::new();
        for &v in vertices {
            match self.read_attrib(0, v) {
                Some(p) => positions.push(p),
                None => {
                    self.error(GL_INVALID_OPERATION);
                    break;
                }
            }
            if let Some(t) = self.read_attrib(1, v) {
                texcoords.push(t);
            }
        }
        let texture = [TextureTarget::Texture2D, TextureTarget::Rectangle, TextureTarget::External]
            .iter()
            .find_map(|t| self.texture_bindings.get(&(0, *t)).map(|id| (*id, *t)));
        if positions.len() == vertices.len() {
            self.rasterize(mode, &positions, &texcoords, texture);
        }
        self.stats.draws += 1;
        self.draws.push(DrawRecord {
            mode,
            vertex_count: vertices.len() as u32,
            indexed,
            program: self.current_program,
            texture: texture.map(|(id, _)| id),
            framebuffer: self.draw_framebuffer,
            scissor: self.scissor,
            positions,
            texcoords,
        });
    }

    fn rasterize(
        &mut self,
        mode: PrimitiveMode,
        positions: &[[f32; 2]],
        texcoords: &[[f32; 2]],
        texture: Option<(TextureId, TextureTarget)>,
    ) {
        let triangles = raster::triangles(mode, positions.len());
        if triangles.is_empty() {
            return;
        }
        let Some(program) = self.current_program.and_then(|id| self.programs.get(&id)) else {
            trace!(target: "gl", "Draw without a program skipped by the rasterizer");
            return;
        };
        // Unset uniforms read as identity matrices and full opacity.
        let matrix = |name: &str| match program.uniforms.get(name) {
            Some(Uniform::Mat4(m)) => Mat4::from_cols_array(m),
            _ => Mat4::IDENTITY,
        };
        let (mvp, texture_matrix) = (matrix("mvp"), matrix("textureMatrix"));
        let textured = program.active_uniforms.contains("sampler");
        let opacity = match program.uniforms.get("opacity") {
            Some(Uniform::Float(opacity)) => *opacity,
            _ => 1.0,
        };
        let color = match program.uniforms.get("color") {
            Some(Uniform::Vec4(color)) => *color,
            _ => [0.0; 4],
        };

        let framebuffer = self.draw_framebuffer;
        let Some(slot) = self.framebuffer_image_mut(framebuffer) else {
            self.error(GL_INVALID_OPERATION);
            return;
        };
        // Out of the map while drawing so a texture can be sampled alongside.
        let mut image = std::mem::take(slot);
        let mut clip = self.viewport.intersection(&image.bounds());
        if let Some(scissor) = self.scissor {
            clip = clip.intersection(&scissor);
        }

        let fill = if textured {
            let source = texture.and_then(|(id, target)| {
                let texture = self.textures.get(&id)?;
                let level = texture.levels.first()?;
                Some(Fill::Texture {
                    pixels: &level.data,
                    size: level.size,
                    normalized: target.uses_normalized_coordinates(),
                    repeat: texture.wrap == WrapMode::Repeat,
                    opacity,
                })
            });
            match source {
                Some(fill) => Some(fill),
                None => {
                    trace!(target: "gl", "Textured draw without a complete texture skipped");
                    None
                }
            }
        } else {
            Some(Fill::Solid(color))
        };
        let drawn = match fill {
            Some(fill) => {
                let setup = RasterSetup {
                    mvp,
                    texture_matrix,
                    viewport: self.viewport,
                    clip,
                    fill,
                };
                raster::fill_triangles(&mut image.data, image.size, &setup, &triangles, positions, texcoords)
            }
            None => 0,
        };

        if let Some(slot) = self.framebuffer_image_mut(framebuffer) {
            *slot = image;
        }
        self.stats.triangles += drawn;
    }
}

/// A [`GpuDevice`] running entirely on the CPU.
pub struct SoftwareDevice {
    info: DeviceInfo,
    state: RefCell<State>,
}

impl std::fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("renderer", &self.info.renderer)
            .field("features", &self.info.features)
            .finish()
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub const RENDERER: &'static str = "NovaDE software rasterizer";

    /// A device advertising every optional feature.
    pub fn new() -> Self {
        Self::with_features(DeviceFeatures::all())
    }

    /// A device limited to `features`, for exercising fallback paths.
    pub fn with_features(features: DeviceFeatures) -> Self {
        let mut info = DeviceInfo::new(
            "NovaDE",
            Self::RENDERER,
            "OpenGL ES 3.2 NovaDE software",
            extensions_for(features),
        );
        info.features = features;
        info.origin_bottom_left = false;
        debug!(target: "gl", "Software device created with features {:?}", features);
        Self {
            info,
            state: RefCell::new(State::new()),
        }
    }

    pub fn set_fence_mode(&self, mode: FenceMode) {
        self.state.borrow_mut().fence_mode = mode;
    }

    /// Signals `fence` and every fence inserted before it.
    pub fn signal_fences_through(&self, fence: FenceId) {
        let mut state = self.state.borrow_mut();
        for (_, signaled) in state.fences.range_mut(..=fence) {
            *signaled = true;
        }
    }

    pub fn signal_all_fences(&self) {
        let mut state = self.state.borrow_mut();
        for signaled in state.fences.values_mut() {
            *signaled = true;
        }
    }

    /// Fences that exist and have not signaled yet, oldest first.
    pub fn pending_fences(&self) -> Vec<FenceId> {
        self.state
            .borrow()
            .fences
            .iter()
            .filter(|(_, signaled)| !**signaled)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn live_fence_count(&self) -> usize {
        self.state.borrow().fences.len()
    }

    pub fn set_fail_texture_allocation(&self, fail: bool) {
        self.state.borrow_mut().fail_texture_allocation = fail;
    }

    pub fn set_fail_buffer_storage(&self, fail: bool) {
        self.state.borrow_mut().fail_buffer_storage = fail;
    }

    pub fn set_fail_map(&self, fail: bool) {
        self.state.borrow_mut().fail_map = fail;
    }

    pub fn fail_next_program_link(&self, log: &str) {
        self.state.borrow_mut().fail_next_link = Some(log.to_string());
    }

    pub fn set_incomplete_framebuffers(&self, incomplete: bool) {
        self.state.borrow_mut().incomplete_framebuffers = incomplete;
    }

    pub fn set_context_lost(&self, lost: bool) {
        self.state.borrow_mut().context_lost = lost;
    }

    pub fn resize_default_framebuffer(&self, size: Size) {
        self.state.borrow_mut().default_framebuffer = SoftImage::new(size);
    }

    pub fn default_framebuffer_pixels(&self) -> Vec<u8> {
        self.state.borrow().default_framebuffer.data.clone()
    }

    /// RGBA8 contents of one mip level of `texture`.
    pub fn texture_pixels(&self, texture: TextureId, level: u32) -> Option<(Size, Vec<u8>)> {
        let state = self.state.borrow();
        let image = state.textures.get(&texture)?.levels.get(level as usize)?;
        Some((image.size, image.data.clone()))
    }

    pub fn texture_filter(&self, texture: TextureId) -> Option<(Filter, WrapMode)> {
        let state = self.state.borrow();
        state.textures.get(&texture).map(|t| (t.filter, t.wrap))
    }

    pub fn texture_exists(&self, texture: TextureId) -> bool {
        self.state.borrow().textures.contains_key(&texture)
    }

    pub fn live_texture_count(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn framebuffer_exists(&self, framebuffer: FramebufferId) -> bool {
        self.state.borrow().framebuffers.contains_key(&framebuffer)
    }

    pub fn live_framebuffer_count(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer).map(|b| b.data.clone())
    }

    pub fn buffer_exists(&self, buffer: BufferId) -> bool {
        self.state.borrow().buffers.contains_key(&buffer)
    }

    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<Uniform> {
        let state = self.state.borrow();
        state.programs.get(&program)?.uniforms.get(name).copied()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    pub fn take_draws(&self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.state.borrow_mut().draws)
    }

    pub fn stats(&self) -> DeviceStats {
        self.state.borrow().stats.clone()
    }

    pub fn current_viewport(&self) -> Rect {
        self.state.borrow().viewport
    }

    pub fn current_draw_framebuffer(&self) -> Option<FramebufferId> {
        self.state.borrow().draw_framebuffer
    }
}

fn extensions_for(features: DeviceFeatures) -> Vec<&'static str> {
    let mut ext = Vec::new();
    if features.contains(DeviceFeatures::BGRA_UPLOAD) {
        ext.push("GL_EXT_texture_format_BGRA8888");
    }
    if features.contains(DeviceFeatures::UNPACK_SUBIMAGE) {
        ext.push("GL_EXT_unpack_subimage");
    }
    if features.contains(DeviceFeatures::BUFFER_STORAGE) {
        ext.push("GL_EXT_buffer_storage");
    }
    if features.contains(DeviceFeatures::ROBUSTNESS) {
        ext.push("GL_KHR_robustness");
    }
    ext
}

fn to_rgba(data: &[u8], format: UploadFormat) -> Vec<u8> {
    match format {
        UploadFormat::Rgba => data.to_vec(),
        UploadFormat::Bgra => data
            .chunks_exact(4)
            .flat_map(|p| [p[2], p[1], p[0], p[3]])
            .collect(),
    }
}

fn color_to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn parse_uniform_names(sources: &[&str]) -> HashSet<String> {
    let mut names = HashSet::new();
    for source in sources {
        for line in source.lines() {
            let line = line.trim();
            if !line.starts_with("uniform ") {
                continue;
            }
            if let Some(name) = line.trim_end_matches(';').split_whitespace().last() {
                names.insert(name.to_string());
            }
        }
    }
    names
}

impl GpuDevice for SoftwareDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_texture(&self) -> Result<TextureId, DeviceError> {
        let mut state = self.state.borrow_mut();
        let id = TextureId(state.alloc_id());
        state.textures.insert(id, SoftTexture::default());
        state.stats.textures_created += 1;
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut state = self.state.borrow_mut();
        if state.textures.remove(&texture).is_some() {
            state.stats.textures_deleted += 1;
            state.texture_bindings.retain(|_, bound| *bound != texture);
        }
    }

    fn bind_texture(&self, unit: u32, target: TextureTarget, texture: Option<TextureId>) {
        let mut state = self.state.borrow_mut();
        state.active_unit = unit;
        match texture {
            Some(id) => {
                state.texture_bindings.insert((unit, target), id);
            }
            None => {
                state.texture_bindings.remove(&(unit, target));
            }
        }
    }

    fn tex_storage_2d(
        &self,
        target: TextureTarget,
        levels: u32,
        _format: InternalFormat,
        size: Size,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        if !self.info.supports(DeviceFeatures::TEXTURE_STORAGE) {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::Unsupported("immutable texture storage"));
        }
        if state.fail_texture_allocation {
            state.error(GL_OUT_OF_MEMORY);
            return Err(DeviceError::AllocationFailed("texture storage".to_string()));
        }
        let Some(texture) = state.bound_texture_mut(target) else {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::InvalidHandle("no texture bound".to_string()));
        };
        if texture.immutable {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::Platform {
                operation: "tex_storage_2d",
                code: GL_INVALID_OPERATION,
            });
        }
        let mut level_size = size;
        texture.levels.clear();
        for _ in 0..levels.max(1) {
            texture.levels.push(SoftImage::new(level_size));
            level_size = Size::new((level_size.width / 2).max(1), (level_size.height / 2).max(1));
        }
        texture.immutable = true;
        state.stats.tex_image_calls += 1;
        Ok(())
    }

    fn tex_image_2d(
        &self,
        target: TextureTarget,
        level: u32,
        _format: InternalFormat,
        size: Size,
        data: Option<(&[u8], UploadFormat)>,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        if state.fail_texture_allocation {
            state.error(GL_OUT_OF_MEMORY);
            return Err(DeviceError::AllocationFailed("texture image".to_string()));
        }
        let needed = size.area() as usize * 4;
        if let Some((bytes, _)) = data {
            if bytes.len() < needed {
                state.error(GL_INVALID_VALUE);
                return Err(DeviceError::Platform {
                    operation: "tex_image_2d",
                    code: GL_INVALID_VALUE,
                });
            }
        }
        let Some(texture) = state.bound_texture_mut(target) else {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::InvalidHandle("no texture bound".to_string()));
        };
        if texture.immutable {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::Platform {
                operation: "tex_image_2d",
                code: GL_INVALID_OPERATION,
            });
        }
        let level = level as usize;
        if texture.levels.len() <= level {
            texture.levels.resize_with(level + 1, SoftImage::default);
        }
        let mut image = SoftImage::new(size);
        if let Some((bytes, format)) = data {
            image.data = to_rgba(&bytes[..needed], format);
        }
        texture.levels[level] = image;
        state.stats.tex_image_calls += 1;
        Ok(())
    }

    fn tex_sub_image_2d(
        &self,
        target: TextureTarget,
        level: u32,
        rect: Rect,
        format: UploadFormat,
        unpack: UnpackLayout,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        if !unpack.is_tight() && !self.info.supports(DeviceFeatures::UNPACK_SUBIMAGE) {
            state.error(GL_INVALID_ENUM);
            return Err(DeviceError::Unsupported("unpack row length"));
        }
        if format == UploadFormat::Bgra && !self.info.supports(DeviceFeatures::BGRA_UPLOAD) {
            state.error(GL_INVALID_ENUM);
            return Err(DeviceError::Unsupported("BGRA uploads"));
        }
        let row_pixels = if unpack.row_length == 0 {
            rect.width as usize
        } else {
            unpack.row_length as usize
        };
        let mut packed = Vec::with_capacity(rect.area() as usize * 4);
        for row in 0..rect.height.max(0) as usize {
            let start = ((unpack.skip_rows as usize + row) * row_pixels
                + unpack.skip_pixels as usize)
                * 4;
            let end = start + rect.width as usize * 4;
            match data.get(start..end) {
                Some(bytes) => packed.extend_from_slice(bytes),
                None => {
                    state.error(GL_INVALID_VALUE);
                    return Err(DeviceError::Platform {
                        operation: "tex_sub_image_2d",
                        code: GL_INVALID_VALUE,
                    });
                }
            }
        }
        let packed = to_rgba(&packed, format);
        let Some(texture) = state.bound_texture_mut(target) else {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::InvalidHandle("no texture bound".to_string()));
        };
        let Some(image) = texture.levels.get_mut(level as usize) else {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::Platform {
                operation: "tex_sub_image_2d",
                code: GL_INVALID_OPERATION,
            });
        };
        if !image.bounds().contains_rect(&rect) {
            state.error(GL_INVALID_VALUE);
            return Err(DeviceError::Platform {
                operation: "tex_sub_image_2d",
                code: GL_INVALID_VALUE,
            });
        }
        image.write_rect(rect, &packed);
        state.stats.tex_sub_image_calls += 1;
        if !unpack.is_tight() {
            state.stats.unpack_uploads += 1;
        }
        Ok(())
    }

    fn set_texture_filter(&self, target: TextureTarget, filter: Filter) {
        let mut state = self.state.borrow_mut();
        if let Some(texture) = state.bound_texture_mut(target) {
            texture.filter = filter;
        }
    }

    fn set_texture_wrap(&self, target: TextureTarget, wrap: WrapMode) {
        let mut state = self.state.borrow_mut();
        if let Some(texture) = state.bound_texture_mut(target) {
            texture.wrap = wrap;
        }
    }

    fn generate_mipmap(&self, target: TextureTarget) {
        let mut state = self.state.borrow_mut();
        let Some(texture) = state.bound_texture_mut(target) else {
            state.error(GL_INVALID_OPERATION);
            return;
        };
        let Some(base) = texture.levels.first().cloned() else {
            return;
        };
        let mut previous = base;
        let mut level = 1usize;
        while previous.size.width > 1 || previous.size.height > 1 {
            if texture.immutable && level >= texture.levels.len() {
                break;
            }
            let next = previous.downsample();
            if level < texture.levels.len() {
                texture.levels[level] = next.clone();
            } else {
                texture.levels.push(next.clone());
            }
            previous = next;
            level += 1;
        }
        state.stats.mipmap_generations += 1;
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, DeviceError> {
        let mut state = self.state.borrow_mut();
        if !self.info.supports(DeviceFeatures::FRAMEBUFFER_OBJECTS) {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::Unsupported("framebuffer objects"));
        }
        let id = FramebufferId(state.alloc_id());
        state.framebuffers.insert(id, None);
        state.stats.framebuffers_created += 1;
        Ok(id)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        let mut state = self.state.borrow_mut();
        if state.framebuffers.remove(&framebuffer).is_some() {
            state.stats.framebuffers_deleted += 1;
        }
        if state.draw_framebuffer == Some(framebuffer) {
            state.draw_framebuffer = None;
        }
        if state.read_framebuffer == Some(framebuffer) {
            state.read_framebuffer = None;
        }
    }

    fn bind_framebuffer(&self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        let mut state = self.state.borrow_mut();
        if matches!(target, FramebufferTarget::Draw | FramebufferTarget::Both) {
            state.draw_framebuffer = framebuffer;
        }
        if matches!(target, FramebufferTarget::Read | FramebufferTarget::Both) {
            state.read_framebuffer = framebuffer;
        }
    }

    fn draw_framebuffer_binding(&self) -> Option<FramebufferId> {
        self.state.borrow().draw_framebuffer
    }

    fn attach_color_texture(
        &self,
        target: FramebufferTarget,
        texture: Option<TextureId>,
        level: u32,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        let bound = match target {
            FramebufferTarget::Read => state.read_framebuffer,
            _ => state.draw_framebuffer,
        };
        let Some(fb) = bound else {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::InvalidHandle("default framebuffer has no attachments".to_string()));
        };
        let attachment = texture.map(|t| (t, level));
        let complete = match attachment {
            Some((t, l)) => state
                .textures
                .get(&t)
                .and_then(|tex| tex.levels.get(l as usize))
                .is_some_and(|img| !img.size.is_empty()),
            None => false,
        };
        state.framebuffers.insert(fb, attachment);
        if state.incomplete_framebuffers {
            return Err(DeviceError::IncompleteFramebuffer(GL_FRAMEBUFFER_UNSUPPORTED));
        }
        if attachment.is_some() && !complete {
            return Err(DeviceError::IncompleteFramebuffer(GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT));
        }
        Ok(())
    }

    fn viewport(&self, rect: Rect) {
        self.state.borrow_mut().viewport = rect;
    }

    fn set_scissor(&self, rect: Option<Rect>) {
        self.state.borrow_mut().scissor = rect;
    }

    fn clear_color(&self, color: [f32; 4]) {
        let mut state = self.state.borrow_mut();
        let scissor = state.scissor;
        let target = state.draw_framebuffer;
        let Some(image) = state.framebuffer_image_mut(target) else {
            state.error(GL_INVALID_OPERATION);
            return;
        };
        let mut area = image.bounds();
        if let Some(scissor) = scissor {
            area = area.intersection(&scissor);
        }
        image.fill(area, color_to_rgba8(color));
        state.stats.clears += 1;
    }

    fn blit_framebuffer(&self, src: Rect, dst: Rect, _filter: Filter) {
        let mut state = self.state.borrow_mut();
        if src.is_empty() || dst.is_empty() {
            return;
        }
        let (read, draw, scissor) = (state.read_framebuffer, state.draw_framebuffer, state.scissor);
        let Some(source) = state.framebuffer_image(read) else {
            state.error(GL_INVALID_OPERATION);
            return;
        };
        let source_bounds = source.bounds();
        let source = source.clone();
        let Some(target) = state.framebuffer_image_mut(draw) else {
            state.error(GL_INVALID_OPERATION);
            return;
        };
        let mut clip = target.bounds().intersection(&dst);
        if let Some(scissor) = scissor {
            clip = clip.intersection(&scissor);
        }
        for y in clip.y..clip.bottom() {
            for x in clip.x..clip.right() {
                // Nearest sample at the destination pixel centre.
                let sx = src.x + ((2 * (x - dst.x) + 1) * src.width) / (2 * dst.width);
                let sy = src.y + ((2 * (y - dst.y) + 1) * src.height) / (2 * dst.height);
                if !source_bounds.contains_point(Point::new(sx, sy)) {
                    continue;
                }
                let so = source.pixel_offset(sx, sy);
                let to = target.pixel_offset(x, y);
                target.data[to..to + 4].copy_from_slice(&source.data[so..so + 4]);
            }
        }
        state.stats.blits += 1;
    }

    fn copy_tex_sub_image_2d(&self, target: TextureTarget, dst: Point, src: Rect) {
        let mut state = self.state.borrow_mut();
        let read = state.read_framebuffer;
        let pixels = match state.framebuffer_image(read) {
            Some(image) if image.bounds().contains_rect(&src) => image.read_rect(src),
            _ => {
                state.error(GL_INVALID_VALUE);
                return;
            }
        };
        let Some(texture) = state.bound_texture_mut(target) else {
            state.error(GL_INVALID_OPERATION);
            return;
        };
        let Some(image) = texture.levels.first_mut() else {
            state.error(GL_INVALID_OPERATION);
            return;
        };
        let dst_rect = Rect::from_origin_and_size(dst, src.size());
        if !image.bounds().contains_rect(&dst_rect) {
            state.error(GL_INVALID_VALUE);
            return;
        }
        image.write_rect(dst_rect, &pixels);
        state.stats.pixel_copies += 1;
    }

    fn read_pixels(&self, rect: Rect, out: &mut [u8]) -> Result<(), DeviceError> {
        let state = self.state.borrow();
        let image = state
            .framebuffer_image(state.read_framebuffer)
            .ok_or_else(|| DeviceError::InvalidHandle("read framebuffer".to_string()))?;
        if !image.bounds().contains_rect(&rect) || out.len() < rect.area() as usize * 4 {
            return Err(DeviceError::Platform {
                operation: "read_pixels",
                code: GL_INVALID_VALUE,
            });
        }
        let pixels = image.read_rect(rect);
        out[..pixels.len()].copy_from_slice(&pixels);
        Ok(())
    }

    fn create_buffer(&self) -> Result<BufferId, DeviceError> {
        let mut state = self.state.borrow_mut();
        let id = BufferId(state.alloc_id());
        state.buffers.insert(id, SoftBuffer::default());
        state.stats.buffers_created += 1;
        Ok(id)
    }

    fn delete_buffer(&self, buffer: BufferId) {
        let mut state = self.state.borrow_mut();
        if state.buffers.remove(&buffer).is_some() {
            state.stats.buffers_deleted += 1;
        }
        state.buffer_bindings.retain(|_, bound| *bound != buffer);
        state.attribs.retain(|_, (bound, _)| *bound != buffer);
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferId>) {
        let mut state = self.state.borrow_mut();
        match buffer {
            Some(id) => {
                state.buffer_bindings.insert(target, id);
            }
            None => {
                state.buffer_bindings.remove(&target);
            }
        }
    }

    fn buffer_data(
        &self,
        target: BufferTarget,
        size: usize,
        data: Option<&[u8]>,
        _usage: BufferUsageHint,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        let Some(buffer) = state.bound_buffer_mut(target) else {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::InvalidHandle("no buffer bound".to_string()));
        };
        if buffer.immutable || buffer.mapped {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::Platform {
                operation: "buffer_data",
                code: GL_INVALID_OPERATION,
            });
        }
        let mut storage = vec![0u8; size];
        if let Some(bytes) = data {
            let n = bytes.len().min(size);
            storage[..n].copy_from_slice(&bytes[..n]);
        }
        buffer.data = storage;
        Ok(())
    }

    fn buffer_storage(
        &self,
        target: BufferTarget,
        size: usize,
        flags: StorageFlags,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        if !self.info.supports(DeviceFeatures::BUFFER_STORAGE) {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::Unsupported("buffer storage"));
        }
        if state.fail_buffer_storage {
            state.error(GL_OUT_OF_MEMORY);
            return Err(DeviceError::AllocationFailed(format!("{size} bytes of buffer storage")));
        }
        let Some(buffer) = state.bound_buffer_mut(target) else {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::InvalidHandle("no buffer bound".to_string()));
        };
        if buffer.immutable {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::Platform {
                operation: "buffer_storage",
                code: GL_INVALID_OPERATION,
            });
        }
        buffer.data = vec![0u8; size];
        buffer.immutable = true;
        buffer.persistent = flags.contains(StorageFlags::PERSISTENT);
        Ok(())
    }

    fn buffer_sub_data(
        &self,
        target: BufferTarget,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        let ok = match state.bound_buffer_mut(target) {
            Some(buffer) if offset + data.len() <= buffer.data.len() => {
                buffer.data[offset..offset + data.len()].copy_from_slice(data);
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            state.error(GL_INVALID_VALUE);
            Err(DeviceError::Platform {
                operation: "buffer_sub_data",
                code: GL_INVALID_VALUE,
            })
        }
    }

    fn map_buffer_range(
        &self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        access: MapAccess,
    ) -> Option<NonNull<u8>> {
        let mut state = self.state.borrow_mut();
        if !self.info.supports(DeviceFeatures::MAP_BUFFER_RANGE) || state.fail_map {
            return None;
        }
        let buffer = state.bound_buffer_mut(target)?;
        let valid = !buffer.mapped
            && length > 0
            && offset + length <= buffer.data.len()
            && (!access.contains(MapAccess::PERSISTENT) || buffer.persistent);
        if !valid {
            state.error(GL_INVALID_OPERATION);
            return None;
        }
        buffer.mapped = true;
        let ptr = buffer.data[offset..].as_mut_ptr();
        state.stats.maps += 1;
        NonNull::new(ptr)
    }

    fn unmap_buffer(&self, target: BufferTarget) {
        let mut state = self.state.borrow_mut();
        match state.bound_buffer_mut(target) {
            Some(buffer) if buffer.mapped => buffer.mapped = false,
            _ => state.error(GL_INVALID_OPERATION),
        }
    }

    fn copy_buffer_sub_data(
        &self,
        src: BufferTarget,
        dst: BufferTarget,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        if !self.info.supports(DeviceFeatures::COPY_BUFFER) {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::Unsupported("buffer copies"));
        }
        let (Some(&src_id), Some(&dst_id)) =
            (state.buffer_bindings.get(&src), state.buffer_bindings.get(&dst))
        else {
            state.error(GL_INVALID_OPERATION);
            return Err(DeviceError::InvalidHandle("copy buffer bindings".to_string()));
        };
        let bytes = match state.buffers.get(&src_id) {
            Some(b) if src_offset + size <= b.data.len() => b.data[src_offset..src_offset + size].to_vec(),
            _ => {
                state.error(GL_INVALID_VALUE);
                return Err(DeviceError::Platform {
                    operation: "copy_buffer_sub_data",
                    code: GL_INVALID_VALUE,
                });
            }
        };
        match state.buffers.get_mut(&dst_id) {
            Some(b) if dst_offset + size <= b.data.len() => {
                b.data[dst_offset..dst_offset + size].copy_from_slice(&bytes);
            }
            _ => {
                state.error(GL_INVALID_VALUE);
                return Err(DeviceError::Platform {
                    operation: "copy_buffer_sub_data",
                    code: GL_INVALID_VALUE,
                });
            }
        }
        state.stats.buffer_copies += 1;
        Ok(())
    }

    fn set_vertex_attrib(&self, attrib: &VertexAttrib) {
        let mut state = self.state.borrow_mut();
        match state.buffer_bindings.get(&BufferTarget::Array).copied() {
            Some(buffer) => {
                state.attribs.insert(attrib.index, (buffer, *attrib));
            }
            None => state.error(GL_INVALID_OPERATION),
        }
    }

    fn disable_vertex_attrib(&self, index: u32) {
        self.state.borrow_mut().attribs.remove(&index);
    }

    fn draw_arrays(&self, mode: PrimitiveMode, first: u32, count: u32) {
        let vertices: Vec<u32> = (first..first + count).collect();
        self.state.borrow_mut().record_draw(mode, &vertices, false);
    }

    fn draw_elements(&self, mode: PrimitiveMode, count: u32, index_type: IndexType, offset: usize) {
        let mut state = self.state.borrow_mut();
        let indices = match state.buffer_bindings.get(&BufferTarget::ElementArray) {
            Some(id) => state.buffers.get(id).map(|b| {
                let size = index_type.size();
                (0..count as usize)
                    .map_while(|i| {
                        let o = offset + i * size;
                        let bytes = b.data.get(o..o + size)?;
                        Some(match index_type {
                            IndexType::U16 => u16::from_ne_bytes([bytes[0], bytes[1]]) as u32,
                            IndexType::U32 => {
                                u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                            }
                        })
                    })
                    .collect::<Vec<u32>>()
            }),
            None => None,
        };
        match indices {
            Some(indices) if indices.len() == count as usize => {
                state.record_draw(mode, &indices, true)
            }
            _ => state.error(GL_INVALID_OPERATION),
        }
    }

    fn create_program(
        &self,
        vertex_src: &str,
        fragment_src: &str,
        _attributes: &[(u32, &str)],
    ) -> Result<ProgramId, DeviceError> {
        let mut state = self.state.borrow_mut();
        if let Some(log) = state.fail_next_link.take() {
            return Err(DeviceError::ProgramLink(log));
        }
        let id = ProgramId(state.alloc_id());
        state.programs.insert(
            id,
            SoftProgram {
                active_uniforms: parse_uniform_names(&[vertex_src, fragment_src]),
                uniforms: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn delete_program(&self, program: ProgramId) {
        let mut state = self.state.borrow_mut();
        state.programs.remove(&program);
        if state.current_program == Some(program) {
            state.current_program = None;
        }
    }

    fn use_program(&self, program: Option<ProgramId>) {
        self.state.borrow_mut().current_program = program;
    }

    fn set_uniform(&self, program: ProgramId, name: &str, value: Uniform) -> bool {
        let mut state = self.state.borrow_mut();
        if state.current_program != Some(program) {
            state.error(GL_INVALID_OPERATION);
            return false;
        }
        match state.programs.get_mut(&program) {
            Some(p) if p.active_uniforms.contains(name) => {
                p.uniforms.insert(name.to_string(), value);
                true
            }
            _ => false,
        }
    }

    fn fence_sync(&self) -> Result<FenceId, DeviceError> {
        let mut state = self.state.borrow_mut();
        if !self.info.supports(DeviceFeatures::SYNC) {
            return Err(DeviceError::Unsupported("sync objects"));
        }
        let id = FenceId(state.next_fence);
        state.next_fence += 1;
        let signaled = state.fence_mode == FenceMode::Immediate;
        state.fences.insert(id, signaled);
        state.stats.fences_created += 1;
        Ok(id)
    }

    fn fence_signaled(&self, fence: FenceId) -> bool {
        self.state.borrow().fences.get(&fence).copied().unwrap_or(false)
    }

    fn client_wait(&self, fence: FenceId, timeout: Duration) -> WaitStatus {
        let mut state = self.state.borrow_mut();
        state.stats.fence_waits += 1;
        let Some(&signaled) = state.fences.get(&fence) else {
            return WaitStatus::Failed;
        };
        if signaled {
            return WaitStatus::AlreadySignaled;
        }
        match state.fence_mode {
            FenceMode::CompleteOnWait => {
                for (_, s) in state.fences.range_mut(..=fence) {
                    *s = true;
                }
                WaitStatus::ConditionSatisfied
            }
            FenceMode::Immediate | FenceMode::Manual => {
                warn!(target: "gl", "{} did not signal within {:?}", fence, timeout);
                WaitStatus::TimeoutExpired
            }
        }
    }

    fn delete_fence(&self, fence: FenceId) {
        self.state.borrow_mut().fences.remove(&fence);
    }

    fn flush(&self) {
        self.state.borrow_mut().stats.flushes += 1;
    }

    fn finish(&self) {
        let mut state = self.state.borrow_mut();
        state.stats.flushes += 1;
        if state.fence_mode != FenceMode::Manual {
            for signaled in state.fences.values_mut() {
                *signaled = true;
            }
        }
    }

    fn take_error(&self) -> Option<u32> {
        self.state.borrow_mut().errors.pop_front()
    }

    fn is_context_lost(&self) -> bool {
        self.state.borrow().context_lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound_texture(device: &SoftwareDevice, size: Size) -> TextureId {
        let id = device.create_texture().unwrap();
        device.bind_texture(0, TextureTarget::Texture2D, Some(id));
        device
            .tex_image_2d(TextureTarget::Texture2D, 0, InternalFormat::Rgba8, size, None)
            .unwrap();
        id
    }

    #[test]
    fn sub_image_honours_unpack_layout() {
        let device = SoftwareDevice::new();
        let id = bound_texture(&device, Size::new(2, 2));
        // 4x3 source, upload the 2x2 block starting at (1, 1).
        let source: Vec<u8> = (0..4 * 3).flat_map(|i| [i as u8, 0, 0, 255]).collect();
        device
            .tex_sub_image_2d(
                TextureTarget::Texture2D,
                0,
                Rect::new(0, 0, 2, 2),
                UploadFormat::Rgba,
                UnpackLayout {
                    row_length: 4,
                    skip_pixels: 1,
                    skip_rows: 1,
                },
                &source,
            )
            .unwrap();
        let (_, pixels) = device.texture_pixels(id, 0).unwrap();
        let reds: Vec<u8> = pixels.chunks(4).map(|p| p[0]).collect();
        assert_eq!(reds, vec![5, 6, 9, 10]);
        assert_eq!(device.stats().unpack_uploads, 1);
    }

    #[test]
    fn unpack_layout_requires_feature() {
        let device = SoftwareDevice::with_features(DeviceFeatures::FRAMEBUFFER_OBJECTS);
        let _ = bound_texture(&device, Size::new(2, 2));
        let result = device.tex_sub_image_2d(
            TextureTarget::Texture2D,
            0,
            Rect::new(0, 0, 1, 1),
            UploadFormat::Rgba,
            UnpackLayout {
                row_length: 2,
                ..UnpackLayout::TIGHT
            },
            &[0; 16],
        );
        assert!(matches!(result, Err(DeviceError::Unsupported(_))));
        assert_eq!(device.take_error(), Some(GL_INVALID_ENUM));
    }

    #[test]
    fn scissored_clear_only_touches_scissor() {
        let device = SoftwareDevice::new();
        let tex = bound_texture(&device, Size::new(4, 4));
        let fb = device.create_framebuffer().unwrap();
        device.bind_framebuffer(FramebufferTarget::Both, Some(fb));
        device
            .attach_color_texture(FramebufferTarget::Draw, Some(tex), 0)
            .unwrap();
        device.set_scissor(Some(Rect::new(1, 1, 2, 2)));
        device.clear_color([1.0, 0.0, 0.0, 1.0]);
        let (_, pixels) = device.texture_pixels(tex, 0).unwrap();
        let red: Vec<bool> = pixels.chunks(4).map(|p| p[0] == 255).collect();
        assert_eq!(red.iter().filter(|r| **r).count(), 4);
        assert!(red[5] && red[6] && red[9] && red[10]);
    }

    #[test]
    fn manual_fences_signal_in_order() {
        let device = SoftwareDevice::new();
        device.set_fence_mode(FenceMode::Manual);
        let a = device.fence_sync().unwrap();
        let b = device.fence_sync().unwrap();
        assert_eq!(device.client_wait(a, Duration::from_millis(1)), WaitStatus::TimeoutExpired);
        device.signal_fences_through(a);
        assert!(device.fence_signaled(a));
        assert!(!device.fence_signaled(b));
        assert_eq!(device.pending_fences(), vec![b]);
    }

    #[test]
    fn complete_on_wait_signals_older_fences() {
        let device = SoftwareDevice::new();
        device.set_fence_mode(FenceMode::CompleteOnWait);
        let a = device.fence_sync().unwrap();
        let b = device.fence_sync().unwrap();
        let c = device.fence_sync().unwrap();
        assert_eq!(device.client_wait(b, Duration::from_millis(1)), WaitStatus::ConditionSatisfied);
        assert!(device.fence_signaled(a));
        assert!(!device.fence_signaled(c));
    }

    #[test]
    fn persistent_map_requires_persistent_storage() {
        let device = SoftwareDevice::new();
        let buffer = device.create_buffer().unwrap();
        device.bind_buffer(BufferTarget::Array, Some(buffer));
        device
            .buffer_data(BufferTarget::Array, 64, None, BufferUsageHint::Stream)
            .unwrap();
        assert!(device
            .map_buffer_range(BufferTarget::Array, 0, 16, MapAccess::WRITE | MapAccess::PERSISTENT)
            .is_none());
        assert!(device
            .map_buffer_range(BufferTarget::Array, 0, 16, MapAccess::WRITE)
            .is_some());
    }
}
