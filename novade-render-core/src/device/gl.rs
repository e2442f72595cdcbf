//! [`GpuDevice`] over an OpenGL / OpenGL ES context through `glow`.
//!
//! The context must be current on the calling thread for every call; the
//! compositor makes it current through its backend before handing the device
//! to any resource.

use super::{
    BufferId, BufferTarget, BufferUsageHint, DeviceInfo, Filter, FenceId, FramebufferId,
    FramebufferTarget, GpuDevice, IndexType, InternalFormat, MapAccess, PrimitiveMode, ProgramId,
    StorageFlags, TextureId, TextureTarget, Uniform, UnpackLayout, UploadFormat, VertexAttrib,
    WaitStatus, WrapMode,
};
use crate::error::DeviceError;
use crate::geometry::{Point, Rect, Size};
use glow::HasContext;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const GL_TEXTURE_EXTERNAL_OES: u32 = 0x8D65;
const GL_TEXTURE_RECTANGLE: u32 = 0x84F5;
const GL_BGRA8_EXT: u32 = 0x93A1;
const GL_CONTEXT_LOST: u32 = 0x0507;
const GL_MAP_PERSISTENT_BIT: u32 = 0x0040;
const GL_MAP_COHERENT_BIT: u32 = 0x0080;
const GL_DYNAMIC_STORAGE_BIT: u32 = 0x0100;

/// Splits `timeout` into waits `glClientWaitSync` accepts; glow takes the
/// timeout as an `i32` of nanoseconds, a little over two seconds.
fn wait_slices(timeout: Duration) -> impl Iterator<Item = i32> {
    let mut remaining = Some(timeout.as_nanos());
    std::iter::from_fn(move || {
        let left = remaining?;
        let slice = left.min(i32::MAX as u128);
        remaining = (left > slice).then(|| left - slice);
        i32::try_from(slice).ok()
    })
}

pub struct GlowDevice {
    gl: Rc<glow::Context>,
    info: DeviceInfo,
    vertex_array: Option<glow::VertexArray>,
    fences: RefCell<HashMap<FenceId, glow::Fence>>,
    next_fence: Cell<u64>,
    uniform_locations: RefCell<HashMap<(ProgramId, String), Option<glow::UniformLocation>>>,
    context_lost: Cell<bool>,
}

impl std::fmt::Debug for GlowDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowDevice").field("info", &self.info).finish()
    }
}

impl GlowDevice {
    /// Wraps a context that is current on this thread and queries its capabilities.
    pub fn new(gl: Rc<glow::Context>) -> Self {
        let (vendor, renderer, version) = unsafe {
            (
                gl.get_parameter_string(glow::VENDOR),
                gl.get_parameter_string(glow::RENDERER),
                gl.get_parameter_string(glow::VERSION),
            )
        };
        let extensions: Vec<String> = gl.supported_extensions().iter().cloned().collect();
        let info = DeviceInfo::new(&vendor, &renderer, &version, extensions);
        info!(
            target: "gl",
            "OpenGL device: vendor={}, renderer={}, version={} ({:?})",
            vendor, renderer, version, info.features
        );

        // Core profiles refuse attribute setup without a bound vertex array.
        let vertex_array = if !info.gles && info.is_version_at_least(3, 0) {
            match unsafe { gl.create_vertex_array() } {
                Ok(vao) => {
                    unsafe { gl.bind_vertex_array(Some(vao)) };
                    Some(vao)
                }
                Err(e) => {
                    warn!(target: "gl", "Failed to create vertex array object: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            gl,
            info,
            vertex_array,
            fences: RefCell::new(HashMap::new()),
            next_fence: Cell::new(1),
            uniform_locations: RefCell::new(HashMap::new()),
            context_lost: Cell::new(false),
        }
    }

    pub fn context(&self) -> &Rc<glow::Context> {
        &self.gl
    }

    fn check_error(&self, operation: &'static str) -> Result<(), DeviceError> {
        let code = unsafe { self.gl.get_error() };
        if code == glow::NO_ERROR {
            return Ok(());
        }
        if code == GL_CONTEXT_LOST {
            self.context_lost.set(true);
        }
        warn!(target: "gl", "GL error 0x{:x} during {}", code, operation);
        Err(DeviceError::Platform { operation, code })
    }
}

impl Drop for GlowDevice {
    fn drop(&mut self) {
        unsafe {
            for (_, fence) in self.fences.borrow_mut().drain() {
                self.gl.delete_sync(fence);
            }
            if let Some(vao) = self.vertex_array.take() {
                self.gl.delete_vertex_array(vao);
            }
        }
    }
}

fn texture_target(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::Texture2D => glow::TEXTURE_2D,
        TextureTarget::Rectangle => GL_TEXTURE_RECTANGLE,
        TextureTarget::External => GL_TEXTURE_EXTERNAL_OES,
    }
}

fn framebuffer_target(target: FramebufferTarget) -> u32 {
    match target {
        FramebufferTarget::Draw => glow::DRAW_FRAMEBUFFER,
        FramebufferTarget::Read => glow::READ_FRAMEBUFFER,
        FramebufferTarget::Both => glow::FRAMEBUFFER,
    }
}

fn buffer_target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Array => glow::ARRAY_BUFFER,
        BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
        BufferTarget::CopyRead => glow::COPY_READ_BUFFER,
        BufferTarget::CopyWrite => glow::COPY_WRITE_BUFFER,
    }
}

fn upload_format(format: UploadFormat) -> u32 {
    match format {
        UploadFormat::Rgba => glow::RGBA,
        UploadFormat::Bgra => glow::BGRA,
    }
}

fn primitive(mode: PrimitiveMode) -> u32 {
    match mode {
        PrimitiveMode::Points => glow::POINTS,
        PrimitiveMode::Lines => glow::LINES,
        PrimitiveMode::LineStrip => glow::LINE_STRIP,
        PrimitiveMode::Triangles => glow::TRIANGLES,
        PrimitiveMode::TriangleStrip => glow::TRIANGLE_STRIP,
        PrimitiveMode::TriangleFan => glow::TRIANGLE_FAN,
    }
}

fn filter_params(filter: Filter) -> (u32, u32) {
    match filter {
        Filter::Nearest => (glow::NEAREST, glow::NEAREST),
        Filter::Linear => (glow::LINEAR, glow::LINEAR),
        Filter::LinearMipmapLinear => (glow::LINEAR_MIPMAP_LINEAR, glow::LINEAR),
    }
}

fn native_texture(id: TextureId) -> Option<glow::Texture> {
    NonZeroU32::new(id.0).map(glow::NativeTexture)
}

fn native_framebuffer(id: FramebufferId) -> Option<glow::Framebuffer> {
    NonZeroU32::new(id.0).map(glow::NativeFramebuffer)
}

fn native_buffer(id: BufferId) -> Option<glow::Buffer> {
    NonZeroU32::new(id.0).map(glow::NativeBuffer)
}

fn native_program(id: ProgramId) -> Option<glow::Program> {
    NonZeroU32::new(id.0).map(glow::NativeProgram)
}

fn to_i32(value: usize, operation: &'static str) -> Result<i32, DeviceError> {
    i32::try_from(value).map_err(|_| DeviceError::Platform {
        operation,
        code: glow::INVALID_VALUE,
    })
}

impl GpuDevice for GlowDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_texture(&self) -> Result<TextureId, DeviceError> {
        let texture = unsafe { self.gl.create_texture() }.map_err(DeviceError::AllocationFailed)?;
        Ok(TextureId(texture.0.get()))
    }

    fn delete_texture(&self, texture: TextureId) {
        if let Some(native) = native_texture(texture) {
            unsafe { self.gl.delete_texture(native) };
        }
    }

    fn bind_texture(&self, unit: u32, target: TextureTarget, texture: Option<TextureId>) {
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl
                .bind_texture(texture_target(target), texture.and_then(native_texture));
        }
    }

    fn tex_storage_2d(
        &self,
        target: TextureTarget,
        levels: u32,
        format: InternalFormat,
        size: Size,
    ) -> Result<(), DeviceError> {
        let internal = match (format, self.info.gles) {
            (InternalFormat::Bgra8, true) => GL_BGRA8_EXT,
            _ => glow::RGBA8,
        };
        unsafe {
            self.gl.tex_storage_2d(
                texture_target(target),
                levels.max(1) as i32,
                internal,
                size.width,
                size.height,
            );
        }
        self.check_error("tex_storage_2d")
    }

    fn tex_image_2d(
        &self,
        target: TextureTarget,
        level: u32,
        format: InternalFormat,
        size: Size,
        data: Option<(&[u8], UploadFormat)>,
    ) -> Result<(), DeviceError> {
        let internal = match (format, self.info.gles) {
            (InternalFormat::Bgra8, true) => glow::BGRA as i32,
            _ => glow::RGBA8 as i32,
        };
        let (pixels, pixel_format) = match data {
            Some((bytes, upload)) => (Some(bytes), upload_format(upload)),
            None if format == InternalFormat::Bgra8 => (None, glow::BGRA),
            None => (None, glow::RGBA),
        };
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 4);
            self.gl.tex_image_2d(
                texture_target(target),
                level as i32,
                internal,
                size.width,
                size.height,
                0,
                pixel_format,
                glow::UNSIGNED_BYTE,
                pixels,
            );
        }
        self.check_error("tex_image_2d")
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
        let custom = !unpack.is_tight();
        unsafe {
            if custom {
                self.gl
                    .pixel_store_i32(glow::UNPACK_ROW_LENGTH, unpack.row_length as i32);
                self.gl
                    .pixel_store_i32(glow::UNPACK_SKIP_PIXELS, unpack.skip_pixels as i32);
                self.gl
                    .pixel_store_i32(glow::UNPACK_SKIP_ROWS, unpack.skip_rows as i32);
            }
            self.gl.tex_sub_image_2d(
                texture_target(target),
                level as i32,
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                upload_format(format),
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(data),
            );
            if custom {
                self.gl.pixel_store_i32(glow::UNPACK_ROW_LENGTH, 0);
                self.gl.pixel_store_i32(glow::UNPACK_SKIP_PIXELS, 0);
                self.gl.pixel_store_i32(glow::UNPACK_SKIP_ROWS, 0);
            }
        }
        self.check_error("tex_sub_image_2d")
    }

    fn set_texture_filter(&self, target: TextureTarget, filter: Filter) {
        let (min, mag) = filter_params(filter);
        let target = texture_target(target);
        unsafe {
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, min as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, mag as i32);
        }
    }

    fn set_texture_wrap(&self, target: TextureTarget, wrap: WrapMode) {
        let mode = match wrap {
            WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
            WrapMode::Repeat => glow::REPEAT,
        } as i32;
        let target = texture_target(target);
        unsafe {
            self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, mode);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, mode);
        }
    }

    fn generate_mipmap(&self, target: TextureTarget) {
        unsafe { self.gl.generate_mipmap(texture_target(target)) };
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, DeviceError> {
        let fbo = unsafe { self.gl.create_framebuffer() }.map_err(DeviceError::AllocationFailed)?;
        Ok(FramebufferId(fbo.0.get()))
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        if let Some(native) = native_framebuffer(framebuffer) {
            unsafe { self.gl.delete_framebuffer(native) };
        }
    }

    fn bind_framebuffer(&self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        unsafe {
            self.gl.bind_framebuffer(
                framebuffer_target(target),
                framebuffer.and_then(native_framebuffer),
            );
        }
    }

    fn draw_framebuffer_binding(&self) -> Option<FramebufferId> {
        let binding = unsafe { self.gl.get_parameter_i32(glow::DRAW_FRAMEBUFFER_BINDING) };
        NonZeroU32::new(binding as u32).map(|id| FramebufferId(id.get()))
    }

    fn attach_color_texture(
        &self,
        target: FramebufferTarget,
        texture: Option<TextureId>,
        level: u32,
    ) -> Result<(), DeviceError> {
        let target = framebuffer_target(target);
        let status = unsafe {
            self.gl.framebuffer_texture_2d(
                target,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                texture.and_then(native_texture),
                level as i32,
            );
            self.gl.check_framebuffer_status(target)
        };
        if texture.is_some() && status != glow::FRAMEBUFFER_COMPLETE {
            return Err(DeviceError::IncompleteFramebuffer(status));
        }
        Ok(())
    }

    fn viewport(&self, rect: Rect) {
        unsafe { self.gl.viewport(rect.x, rect.y, rect.width, rect.height) };
    }

    fn set_scissor(&self, rect: Option<Rect>) {
        unsafe {
            match rect {
                Some(r) => {
                    self.gl.enable(glow::SCISSOR_TEST);
                    self.gl.scissor(r.x, r.y, r.width, r.height);
                }
                None => self.gl.disable(glow::SCISSOR_TEST),
            }
        }
    }

    fn clear_color(&self, color: [f32; 4]) {
        unsafe {
            self.gl.clear_color(color[0], color[1], color[2], color[3]);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    fn blit_framebuffer(&self, src: Rect, dst: Rect, filter: Filter) {
        let filter = match filter {
            Filter::Nearest => glow::NEAREST,
            _ => glow::LINEAR,
        };
        unsafe {
            self.gl.blit_framebuffer(
                src.x,
                src.y,
                src.right(),
                src.bottom(),
                dst.x,
                dst.y,
                dst.right(),
                dst.bottom(),
                glow::COLOR_BUFFER_BIT,
                filter,
            );
        }
    }

    fn copy_tex_sub_image_2d(&self, target: TextureTarget, dst: Point, src: Rect) {
        unsafe {
            self.gl.copy_tex_sub_image_2d(
                texture_target(target),
                0,
                dst.x,
                dst.y,
                src.x,
                src.y,
                src.width,
                src.height,
            );
        }
    }

    fn read_pixels(&self, rect: Rect, out: &mut [u8]) -> Result<(), DeviceError> {
        let row = rect.width.max(0) as usize * 4;
        if out.len() < row * rect.height.max(0) as usize {
            return Err(DeviceError::Platform {
                operation: "read_pixels",
                code: glow::INVALID_VALUE,
            });
        }
        unsafe {
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 4);
            self.gl.read_pixels(
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(out),
            );
        }
        self.check_error("read_pixels")?;
        // GL returns rows bottom to top.
        let height = rect.height.max(0) as usize;
        for y in 0..height / 2 {
            let (top, bottom) = out.split_at_mut((height - 1 - y) * row);
            top[y * row..(y + 1) * row].swap_with_slice(&mut bottom[..row]);
        }
        Ok(())
    }

    fn create_buffer(&self) -> Result<BufferId, DeviceError> {
        let buffer = unsafe { self.gl.create_buffer() }.map_err(DeviceError::AllocationFailed)?;
        Ok(BufferId(buffer.0.get()))
    }

    fn delete_buffer(&self, buffer: BufferId) {
        if let Some(native) = native_buffer(buffer) {
            unsafe { self.gl.delete_buffer(native) };
        }
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferId>) {
        unsafe {
            self.gl
                .bind_buffer(buffer_target(target), buffer.and_then(native_buffer));
        }
    }

    fn buffer_data(
        &self,
        target: BufferTarget,
        size: usize,
        data: Option<&[u8]>,
        usage: BufferUsageHint,
    ) -> Result<(), DeviceError> {
        let usage = match usage {
            BufferUsageHint::Static => glow::STATIC_DRAW,
            BufferUsageHint::Dynamic => glow::DYNAMIC_DRAW,
            BufferUsageHint::Stream => glow::STREAM_DRAW,
        };
        let target = buffer_target(target);
        unsafe {
            match data {
                Some(bytes) if bytes.len() == size => {
                    self.gl.buffer_data_u8_slice(target, bytes, usage)
                }
                Some(bytes) => {
                    self.gl
                        .buffer_data_size(target, to_i32(size, "buffer_data")?, usage);
                    let n = bytes.len().min(size);
                    self.gl.buffer_sub_data_u8_slice(target, 0, &bytes[..n]);
                }
                None => self
                    .gl
                    .buffer_data_size(target, to_i32(size, "buffer_data")?, usage),
            }
        }
        self.check_error("buffer_data")
    }

    fn buffer_storage(
        &self,
        target: BufferTarget,
        size: usize,
        flags: StorageFlags,
    ) -> Result<(), DeviceError> {
        let mut bits = GL_DYNAMIC_STORAGE_BIT;
        if flags.contains(StorageFlags::MAP_WRITE) {
            bits |= glow::MAP_WRITE_BIT;
        }
        if flags.contains(StorageFlags::PERSISTENT) {
            bits |= GL_MAP_PERSISTENT_BIT;
        }
        if flags.contains(StorageFlags::COHERENT) {
            bits |= GL_MAP_COHERENT_BIT;
        }
        unsafe {
            self.gl.buffer_storage(
                buffer_target(target),
                to_i32(size, "buffer_storage")?,
                None,
                bits,
            );
        }
        self.check_error("buffer_storage").map_err(|e| match e {
            DeviceError::Platform { code, .. } if code == glow::OUT_OF_MEMORY => {
                DeviceError::AllocationFailed(format!("{size} bytes of buffer storage"))
            }
            other => other,
        })
    }

    fn buffer_sub_data(
        &self,
        target: BufferTarget,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        unsafe {
            self.gl.buffer_sub_data_u8_slice(
                buffer_target(target),
                to_i32(offset, "buffer_sub_data")?,
                data,
            );
        }
        self.check_error("buffer_sub_data")
    }

    fn map_buffer_range(
        &self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        access: MapAccess,
    ) -> Option<NonNull<u8>> {
        let mut bits = 0;
        if access.contains(MapAccess::WRITE) {
            bits |= glow::MAP_WRITE_BIT;
        }
        if access.contains(MapAccess::INVALIDATE_RANGE) {
            bits |= glow::MAP_INVALIDATE_RANGE_BIT;
        }
        if access.contains(MapAccess::INVALIDATE_BUFFER) {
            bits |= glow::MAP_INVALIDATE_BUFFER_BIT;
        }
        if access.contains(MapAccess::UNSYNCHRONIZED) {
            bits |= glow::MAP_UNSYNCHRONIZED_BIT;
        }
        if access.contains(MapAccess::PERSISTENT) {
            bits |= GL_MAP_PERSISTENT_BIT;
        }
        if access.contains(MapAccess::COHERENT) {
            bits |= GL_MAP_COHERENT_BIT;
        }
        let (offset, length) = (i32::try_from(offset).ok()?, i32::try_from(length).ok()?);
        let ptr = unsafe {
            self.gl
                .map_buffer_range(buffer_target(target), offset, length, bits)
        };
        if ptr.is_null() {
            let _ = self.check_error("map_buffer_range");
        }
        NonNull::new(ptr)
    }

    fn unmap_buffer(&self, target: BufferTarget) {
        unsafe {
            self.gl.unmap_buffer(buffer_target(target));
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
        unsafe {
            self.gl.copy_buffer_sub_data(
                buffer_target(src),
                buffer_target(dst),
                to_i32(src_offset, "copy_buffer_sub_data")?,
                to_i32(dst_offset, "copy_buffer_sub_data")?,
                to_i32(size, "copy_buffer_sub_data")?,
            );
        }
        self.check_error("copy_buffer_sub_data")
    }

    fn set_vertex_attrib(&self, attrib: &VertexAttrib) {
        unsafe {
            self.gl.enable_vertex_attrib_array(attrib.index);
            self.gl.vertex_attrib_pointer_f32(
                attrib.index,
                attrib.components as i32,
                glow::FLOAT,
                false,
                attrib.stride as i32,
                attrib.offset as i32,
            );
        }
    }

    fn disable_vertex_attrib(&self, index: u32) {
        unsafe { self.gl.disable_vertex_attrib_array(index) };
    }

    fn draw_arrays(&self, mode: PrimitiveMode, first: u32, count: u32) {
        unsafe { self.gl.draw_arrays(primitive(mode), first as i32, count as i32) };
    }

    fn draw_elements(&self, mode: PrimitiveMode, count: u32, index_type: IndexType, offset: usize) {
        let element_type = match index_type {
            IndexType::U16 => glow::UNSIGNED_SHORT,
            IndexType::U32 => glow::UNSIGNED_INT,
        };
        unsafe {
            self.gl
                .draw_elements(primitive(mode), count as i32, element_type, offset as i32);
        }
    }

    fn create_program(
        &self,
        vertex_src: &str,
        fragment_src: &str,
        attributes: &[(u32, &str)],
    ) -> Result<ProgramId, DeviceError> {
        unsafe {
            let compile = |stage: u32, name: &'static str, src: &str| {
                let shader = self
                    .gl
                    .create_shader(stage)
                    .map_err(DeviceError::AllocationFailed)?;
                self.gl.shader_source(shader, src);
                self.gl.compile_shader(shader);
                if !self.gl.get_shader_compile_status(shader) {
                    let log = self.gl.get_shader_info_log(shader);
                    self.gl.delete_shader(shader);
                    error!(target: "gl", "Failed to compile {} shader: {}", name, log);
                    return Err(DeviceError::ShaderCompile { stage: name, log });
                }
                Ok(shader)
            };
            let vs = compile(glow::VERTEX_SHADER, "vertex", vertex_src)?;
            let fs = match compile(glow::FRAGMENT_SHADER, "fragment", fragment_src) {
                Ok(fs) => fs,
                Err(e) => {
                    self.gl.delete_shader(vs);
                    return Err(e);
                }
            };
            let program = match self.gl.create_program() {
                Ok(p) => p,
                Err(e) => {
                    self.gl.delete_shader(vs);
                    self.gl.delete_shader(fs);
                    return Err(DeviceError::AllocationFailed(e));
                }
            };
            self.gl.attach_shader(program, vs);
            self.gl.attach_shader(program, fs);
            for (index, name) in attributes {
                self.gl.bind_attrib_location(program, *index, name);
            }
            self.gl.link_program(program);
            self.gl.detach_shader(program, vs);
            self.gl.detach_shader(program, fs);
            self.gl.delete_shader(vs);
            self.gl.delete_shader(fs);
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                error!(target: "gl", "Failed to link shader program: {}", log);
                return Err(DeviceError::ProgramLink(log));
            }
            debug!(target: "gl", "Linked shader program {}", program.0.get());
            Ok(ProgramId(program.0.get()))
        }
    }

    fn delete_program(&self, program: ProgramId) {
        self.uniform_locations
            .borrow_mut()
            .retain(|(p, _), _| *p != program);
        if let Some(native) = native_program(program) {
            unsafe { self.gl.delete_program(native) };
        }
    }

    fn use_program(&self, program: Option<ProgramId>) {
        unsafe { self.gl.use_program(program.and_then(native_program)) };
    }

    fn set_uniform(&self, program: ProgramId, name: &str, value: Uniform) -> bool {
        let Some(native) = native_program(program) else {
            return false;
        };
        let mut cache = self.uniform_locations.borrow_mut();
        let location = cache
            .entry((program, name.to_string()))
            .or_insert_with(|| unsafe { self.gl.get_uniform_location(native, name) });
        let Some(location) = location.as_ref() else {
            return false;
        };
        unsafe {
            match value {
                Uniform::Int(v) => self.gl.uniform_1_i32(Some(location), v),
                Uniform::Float(v) => self.gl.uniform_1_f32(Some(location), v),
                Uniform::Vec4(v) => self.gl.uniform_4_f32(Some(location), v[0], v[1], v[2], v[3]),
                Uniform::Mat4(m) => self.gl.uniform_matrix_4_f32_slice(Some(location), false, &m),
            }
        }
        true
    }

    fn fence_sync(&self) -> Result<FenceId, DeviceError> {
        let fence = unsafe { self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
            .map_err(DeviceError::AllocationFailed)?;
        let id = FenceId(self.next_fence.get());
        self.next_fence.set(id.0 + 1);
        self.fences.borrow_mut().insert(id, fence);
        Ok(id)
    }

    fn fence_signaled(&self, fence: FenceId) -> bool {
        match self.fences.borrow().get(&fence) {
            Some(sync) => unsafe { self.gl.get_sync_status(*sync) == glow::SIGNALED },
            None => false,
        }
    }

    fn client_wait(&self, fence: FenceId, timeout: Duration) -> WaitStatus {
        let Some(sync) = self.fences.borrow().get(&fence).copied() else {
            return WaitStatus::Failed;
        };
        let mut status = WaitStatus::TimeoutExpired;
        for (slice, nanos) in wait_slices(timeout).enumerate() {
            let flags = if slice == 0 { glow::SYNC_FLUSH_COMMANDS_BIT } else { 0 };
            status = match unsafe { self.gl.client_wait_sync(sync, flags, nanos) } {
                glow::ALREADY_SIGNALED => WaitStatus::AlreadySignaled,
                glow::CONDITION_SATISFIED => WaitStatus::ConditionSatisfied,
                glow::TIMEOUT_EXPIRED => WaitStatus::TimeoutExpired,
                _ => {
                    let _ = self.check_error("client_wait_sync");
                    WaitStatus::Failed
                }
            };
            if status != WaitStatus::TimeoutExpired {
                break;
            }
        }
        status
    }

    fn delete_fence(&self, fence: FenceId) {
        if let Some(sync) = self.fences.borrow_mut().remove(&fence) {
            unsafe { self.gl.delete_sync(sync) };
        }
    }

    fn flush(&self) {
        unsafe { self.gl.flush() };
    }

    fn finish(&self) {
        unsafe { self.gl.finish() };
    }

    fn take_error(&self) -> Option<u32> {
        let code = unsafe { self.gl.get_error() };
        if code == GL_CONTEXT_LOST {
            self.context_lost.set(true);
        }
        (code != glow::NO_ERROR).then_some(code)
    }

    fn is_context_lost(&self) -> bool {
        self.context_lost.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn long_fence_waits_are_split_not_capped() {
        let slices: Vec<i32> = wait_slices(Duration::from_secs(5)).collect();
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[..2], [i32::MAX, i32::MAX]);
        let total: i64 = slices.iter().map(|n| i64::from(*n)).sum();
        assert_eq!(total, 5_000_000_000);
    }

    #[test]
    fn short_and_zero_waits_are_a_single_call() {
        assert_eq!(wait_slices(Duration::from_millis(1)).collect::<Vec<_>>(), vec![1_000_000]);
        assert_eq!(wait_slices(Duration::ZERO).collect::<Vec<_>>(), vec![0]);
    }
}
