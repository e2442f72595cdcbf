//! The GL-like command surface used by every GPU resource in this crate.
//!
//! Resources never talk to a driver directly; they hold an `Rc<dyn GpuDevice>`
//! and issue the small set of commands defined here. Two implementations exist:
//!
//! - [`software::SoftwareDevice`]: a CPU rasterizer used as the raster fallback
//!   backend and by the test suite.
//! - `gl::GlowDevice` (feature `renderer_gl`): OpenGL / OpenGL ES through `glow`.
//!
//! The device is bound to the compositor thread, hence `Rc` and `&self` methods
//! with interior state; nothing here is `Send`.

mod raster;
pub mod software;

#[cfg(feature = "renderer_gl")]
pub mod gl;

use crate::error::DeviceError;
use crate::geometry::{Point, Rect, Size};
use bitflags::bitflags;
use std::collections::HashSet;
use std::fmt;
use std::ptr::NonNull;
use std::time::Duration;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle_type!(
    /// Device-side texture object.
    TextureId, u32
);
handle_type!(BufferId, u32);
handle_type!(FramebufferId, u32);
handle_type!(ProgramId, u32);
handle_type!(
    /// A GPU sync object inserted into the command stream.
    FenceId, u64
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2D,
    /// Rectangle textures address texels in pixels instead of `[0, 1]`.
    Rectangle,
    /// Externally imported image (EGLImage and friends); sampled, never written.
    External,
}

impl TextureTarget {
    /// Whether sampling coordinates for this target are normalized.
    pub fn uses_normalized_coordinates(self) -> bool {
        !matches!(self, TextureTarget::Rectangle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalFormat {
    Rgba8,
    Bgra8,
}

/// Byte order of pixel data handed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadFormat {
    Rgba,
    Bgra,
}

impl UploadFormat {
    pub const BYTES_PER_PIXEL: usize = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
    LinearMipmapLinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
}

/// Row-length/skip parameters for sub-image uploads, in pixels.
///
/// `row_length == 0` means rows are tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnpackLayout {
    pub row_length: u32,
    pub skip_pixels: u32,
    pub skip_rows: u32,
}

impl UnpackLayout {
    pub const TIGHT: UnpackLayout = UnpackLayout {
        row_length: 0,
        skip_pixels: 0,
        skip_rows: 0,
    };

    pub fn is_tight(&self) -> bool {
        *self == Self::TIGHT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferTarget {
    Draw,
    Read,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
    CopyRead,
    CopyWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsageHint {
    Static,
    Dynamic,
    Stream,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapAccess: u32 {
        const WRITE = 1 << 0;
        const INVALIDATE_RANGE = 1 << 1;
        const INVALIDATE_BUFFER = 1 << 2;
        const UNSYNCHRONIZED = 1 << 3;
        const PERSISTENT = 1 << 4;
        const COHERENT = 1 << 5;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StorageFlags: u32 {
        const MAP_WRITE = 1 << 0;
        const PERSISTENT = 1 << 1;
        const COHERENT = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size(self) -> usize {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Result of a CPU-side wait on a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    AlreadySignaled,
    ConditionSatisfied,
    TimeoutExpired,
    Failed,
}

impl WaitStatus {
    pub fn is_signaled(self) -> bool {
        matches!(self, WaitStatus::AlreadySignaled | WaitStatus::ConditionSatisfied)
    }
}

/// One float vertex attribute sourced from the currently bound array buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttrib {
    pub index: u32,
    pub components: u32,
    pub stride: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uniform {
    Int(i32),
    Float(f32),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceFeatures: u32 {
        const FRAMEBUFFER_OBJECTS = 1 << 0;
        const UNPACK_SUBIMAGE = 1 << 1;
        const BGRA_UPLOAD = 1 << 2;
        const TEXTURE_STORAGE = 1 << 3;
        const BUFFER_STORAGE = 1 << 4;
        const MAP_BUFFER_RANGE = 1 << 5;
        const COPY_BUFFER = 1 << 6;
        const SYNC = 1 << 7;
        const BLIT_FRAMEBUFFER = 1 << 8;
        const ROBUSTNESS = 1 << 9;
        const NPOT = 1 << 10;
    }
}

/// Identification and capabilities of a rendering device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub vendor: String,
    pub renderer: String,
    pub version_string: String,
    pub version: (u32, u32),
    pub gles: bool,
    pub extensions: HashSet<String>,
    pub features: DeviceFeatures,
    /// Whether framebuffer row 0 is the bottom row (GL) instead of the top row.
    pub origin_bottom_left: bool,
}

impl DeviceInfo {
    /// Builds the info from driver strings and derives the feature set.
    pub fn new<I, S>(vendor: &str, renderer: &str, version_string: &str, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gles = version_string.contains("OpenGL ES");
        let version = parse_gl_version(version_string);
        let extensions: HashSet<String> = extensions.into_iter().map(Into::into).collect();
        let features = derive_features(gles, version, &extensions);
        Self {
            vendor: vendor.to_string(),
            renderer: renderer.to_string(),
            version_string: version_string.to_string(),
            version,
            gles,
            extensions,
            features,
            origin_bottom_left: true,
        }
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub fn supports(&self, features: DeviceFeatures) -> bool {
        self.features.contains(features)
    }

    pub fn is_version_at_least(&self, major: u32, minor: u32) -> bool {
        self.version >= (major, minor)
    }

    /// Converts a top-left based rectangle on a framebuffer of `height` rows
    /// into the device's native framebuffer coordinates.
    pub fn to_device_rect(&self, rect: Rect, height: i32) -> Rect {
        if self.origin_bottom_left {
            Rect::new(rect.x, height - rect.bottom(), rect.width, rect.height)
        } else {
            rect
        }
    }

    pub fn is_software_rasterizer(&self) -> bool {
        ["llvmpipe", "softpipe", "swrast", "software rasterizer"]
            .iter()
            .any(|name| self.renderer.contains(name))
    }
}

/// Extracts `(major, minor)` from a `GL_VERSION` string.
///
/// Handles both `"4.6 (Core Profile) Mesa 23.1"` and `"OpenGL ES 3.2 Mesa"`.
pub fn parse_gl_version(version: &str) -> (u32, u32) {
    let numeric = version
        .split_whitespace()
        .find(|token| token.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .unwrap_or("0.0");
    let mut parts = numeric.split('.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts
        .next()
        .map(|p| p.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    (major, minor)
}

fn derive_features(gles: bool, version: (u32, u32), ext: &HashSet<String>) -> DeviceFeatures {
    let has = |name: &str| ext.contains(name);
    let at_least = |major: u32, minor: u32| version >= (major, minor);
    let mut features = DeviceFeatures::empty();

    if gles {
        features.set(DeviceFeatures::FRAMEBUFFER_OBJECTS, at_least(2, 0));
        features.set(
            DeviceFeatures::UNPACK_SUBIMAGE,
            at_least(3, 0) || has("GL_EXT_unpack_subimage"),
        );
        features.set(DeviceFeatures::BGRA_UPLOAD, has("GL_EXT_texture_format_BGRA8888"));
        features.set(
            DeviceFeatures::TEXTURE_STORAGE,
            at_least(3, 0) || has("GL_EXT_texture_storage"),
        );
        features.set(DeviceFeatures::BUFFER_STORAGE, has("GL_EXT_buffer_storage"));
        features.set(
            DeviceFeatures::MAP_BUFFER_RANGE,
            at_least(3, 0) || has("GL_EXT_map_buffer_range"),
        );
        features.set(DeviceFeatures::COPY_BUFFER, at_least(3, 0));
        features.set(DeviceFeatures::SYNC, at_least(3, 0) || has("GL_APPLE_sync"));
        features.set(
            DeviceFeatures::BLIT_FRAMEBUFFER,
            at_least(3, 0) || has("GL_ANGLE_framebuffer_blit") || has("GL_NV_framebuffer_blit"),
        );
        features.set(
            DeviceFeatures::NPOT,
            at_least(3, 0) || has("GL_OES_texture_npot"),
        );
    } else {
        features.set(
            DeviceFeatures::FRAMEBUFFER_OBJECTS,
            at_least(3, 0) || has("GL_ARB_framebuffer_object") || has("GL_EXT_framebuffer_object"),
        );
        features.insert(DeviceFeatures::UNPACK_SUBIMAGE | DeviceFeatures::BGRA_UPLOAD);
        features.set(
            DeviceFeatures::TEXTURE_STORAGE,
            at_least(4, 2) || has("GL_ARB_texture_storage"),
        );
        features.set(
            DeviceFeatures::BUFFER_STORAGE,
            at_least(4, 4) || has("GL_ARB_buffer_storage"),
        );
        features.set(
            DeviceFeatures::MAP_BUFFER_RANGE,
            at_least(3, 0) || has("GL_ARB_map_buffer_range"),
        );
        features.set(
            DeviceFeatures::COPY_BUFFER,
            at_least(3, 1) || has("GL_ARB_copy_buffer"),
        );
        features.set(DeviceFeatures::SYNC, at_least(3, 2) || has("GL_ARB_sync"));
        features.set(
            DeviceFeatures::BLIT_FRAMEBUFFER,
            at_least(3, 0) || has("GL_EXT_framebuffer_blit"),
        );
        features.set(DeviceFeatures::NPOT, at_least(2, 0));
    }
    features.set(
        DeviceFeatures::ROBUSTNESS,
        has("GL_KHR_robustness") || has("GL_EXT_robustness") || has("GL_ARB_robustness"),
    );
    features
}

/// The command surface a rendering device exposes to the render core.
///
/// Commands operate on the currently bound object for their target, like GL:
/// texture commands use the texture bound on the last unit passed to
/// [`bind_texture`](GpuDevice::bind_texture), buffer commands the buffer bound
/// to the given [`BufferTarget`], framebuffer commands the bound draw/read
/// framebuffer (`None` is the window-system framebuffer).
pub trait GpuDevice {
    fn info(&self) -> &DeviceInfo;

    // Textures
    fn create_texture(&self) -> Result<TextureId, DeviceError>;
    fn delete_texture(&self, texture: TextureId);
    fn bind_texture(&self, unit: u32, target: TextureTarget, texture: Option<TextureId>);
    /// Allocates immutable storage for all `levels` at once.
    fn tex_storage_2d(
        &self,
        target: TextureTarget,
        levels: u32,
        format: InternalFormat,
        size: Size,
    ) -> Result<(), DeviceError>;
    /// (Re)allocates one mip level, optionally with tightly packed content.
    fn tex_image_2d(
        &self,
        target: TextureTarget,
        level: u32,
        format: InternalFormat,
        size: Size,
        data: Option<(&[u8], UploadFormat)>,
    ) -> Result<(), DeviceError>;
    /// Uploads `rect` of level `level` from `data`, honouring `unpack`.
    fn tex_sub_image_2d(
        &self,
        target: TextureTarget,
        level: u32,
        rect: Rect,
        format: UploadFormat,
        unpack: UnpackLayout,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    fn set_texture_filter(&self, target: TextureTarget, filter: Filter);
    fn set_texture_wrap(&self, target: TextureTarget, wrap: WrapMode);
    fn generate_mipmap(&self, target: TextureTarget);

    // Framebuffers
    fn create_framebuffer(&self) -> Result<FramebufferId, DeviceError>;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);
    fn bind_framebuffer(&self, target: FramebufferTarget, framebuffer: Option<FramebufferId>);
    fn draw_framebuffer_binding(&self) -> Option<FramebufferId>;
    /// Attaches level `level` of `texture` as colour attachment 0 and checks completeness.
    fn attach_color_texture(
        &self,
        target: FramebufferTarget,
        texture: Option<TextureId>,
        level: u32,
    ) -> Result<(), DeviceError>;
    fn viewport(&self, rect: Rect);
    fn set_scissor(&self, rect: Option<Rect>);
    fn clear_color(&self, color: [f32; 4]);
    fn blit_framebuffer(&self, src: Rect, dst: Rect, filter: Filter);
    /// Copies `src` of the read framebuffer into the bound texture at `dst`.
    fn copy_tex_sub_image_2d(&self, target: TextureTarget, dst: Point, src: Rect);
    /// Reads RGBA8 pixels of the read framebuffer, rows top to bottom.
    fn read_pixels(&self, rect: Rect, out: &mut [u8]) -> Result<(), DeviceError>;

    // Buffers
    fn create_buffer(&self) -> Result<BufferId, DeviceError>;
    fn delete_buffer(&self, buffer: BufferId);
    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferId>);
    fn buffer_data(
        &self,
        target: BufferTarget,
        size: usize,
        data: Option<&[u8]>,
        usage: BufferUsageHint,
    ) -> Result<(), DeviceError>;
    /// Allocates immutable storage, the prerequisite for persistent mapping.
    fn buffer_storage(
        &self,
        target: BufferTarget,
        size: usize,
        flags: StorageFlags,
    ) -> Result<(), DeviceError>;
    fn buffer_sub_data(
        &self,
        target: BufferTarget,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    /// Maps a byte range; `None` when the driver refuses.
    ///
    /// The returned pointer stays valid until [`unmap_buffer`](GpuDevice::unmap_buffer)
    /// or, for persistent mappings, until the buffer is deleted.
    fn map_buffer_range(
        &self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        access: MapAccess,
    ) -> Option<NonNull<u8>>;
    fn unmap_buffer(&self, target: BufferTarget);
    fn copy_buffer_sub_data(
        &self,
        src: BufferTarget,
        dst: BufferTarget,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    ) -> Result<(), DeviceError>;

    // Vertex input and draws
    fn set_vertex_attrib(&self, attrib: &VertexAttrib);
    fn disable_vertex_attrib(&self, index: u32);
    fn draw_arrays(&self, mode: PrimitiveMode, first: u32, count: u32);
    fn draw_elements(&self, mode: PrimitiveMode, count: u32, index_type: IndexType, offset: usize);

    // Programs
    fn create_program(
        &self,
        vertex_src: &str,
        fragment_src: &str,
        attributes: &[(u32, &str)],
    ) -> Result<ProgramId, DeviceError>;
    fn delete_program(&self, program: ProgramId);
    fn use_program(&self, program: Option<ProgramId>);
    /// Sets a uniform on `program`, which must be current. Returns `false` when
    /// the uniform is not active in the program.
    fn set_uniform(&self, program: ProgramId, name: &str, value: Uniform) -> bool;

    // Synchronization
    fn fence_sync(&self) -> Result<FenceId, DeviceError>;
    fn fence_signaled(&self, fence: FenceId) -> bool;
    fn client_wait(&self, fence: FenceId, timeout: Duration) -> WaitStatus;
    fn delete_fence(&self, fence: FenceId);
    fn flush(&self);
    fn finish(&self);

    /// Pops the oldest pending platform error code, if any.
    fn take_error(&self) -> Option<u32>;

    /// Whether the context was reset behind our back (robustness).
    fn is_context_lost(&self) -> bool {
        false
    }
}
