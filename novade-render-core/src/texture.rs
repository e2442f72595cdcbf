//! GPU textures backing surfaces, effects and render targets.

use crate::device::{
    DeviceFeatures, Filter, FramebufferTarget, GpuDevice, InternalFormat, TextureId,
    TextureTarget, UnpackLayout, UploadFormat, WrapMode,
};
use crate::error::TextureError;
use crate::geometry::{OutputTransform, Point, Rect, Region, Size};
use crate::image::PixelBuffer;
use crate::texture_pool::TexturePool;
use crate::vertex::{BufferUsage, TexturedVertex, Topology, VertexBuffer};
use glam::{Mat4, Vec3, Vec4};
use std::rc::Rc;
use tracing::{debug, error, trace, warn};

/// Coordinate convention of a texture matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateType {
    /// `[0, 1]` on both axes.
    Normalized,
    /// Pixels.
    Unnormalized,
}

/// Which upload path [`GpuTexture::update`] took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    /// Uploaded straight from the client buffer with unpack parameters.
    Direct,
    /// Converted into a tightly packed scratch buffer first.
    Converted,
    /// Nothing to upload.
    Skipped,
}

pub struct GpuTexture {
    pool: TexturePool,
    id: TextureId,
    target: TextureTarget,
    size: Size,
    internal_format: InternalFormat,
    filter: Filter,
    wrap: WrapMode,
    parameters_dirty: bool,
    mip_levels: u32,
    immutable: bool,
    foreign: bool,
    external_handle: Option<u64>,
    content_transform: OutputTransform,
    y_inverted: bool,
    normalized_matrix: Mat4,
    pixel_matrix: Mat4,
    geometry: Option<VertexBuffer>,
    cached_geometry: Option<(Rect, Size)>,
    geometry_rebuilds: u32,
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTexture")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("size", &self.size)
            .field("format", &self.internal_format)
            .field("mip_levels", &self.mip_levels)
            .field("foreign", &self.foreign)
            .field("content_transform", &self.content_transform)
            .finish()
    }
}

impl GpuTexture {
    /// Allocates an empty 2D texture in the format uploads prefer on this device.
    pub fn allocate(pool: &TexturePool, size: Size, levels: u32) -> Result<Self, TextureError> {
        let format = if pool.device().info().supports(DeviceFeatures::BGRA_UPLOAD) {
            InternalFormat::Bgra8
        } else {
            InternalFormat::Rgba8
        };
        Self::allocate_with_format(pool, size, levels, format)
    }

    pub fn allocate_with_format(
        pool: &TexturePool,
        size: Size,
        levels: u32,
        format: InternalFormat,
    ) -> Result<Self, TextureError> {
        if size.is_empty() {
            return Err(TextureError::InvalidSize {
                width: size.width,
                height: size.height,
            });
        }
        let levels = levels.max(1);
        let device = pool.device().clone();
        let target = TextureTarget::Texture2D;
        let id = device.create_texture().map_err(|e| {
            error!(target: "gl", "Failed to create texture object: {}", e);
            TextureError::AllocationFailed(e)
        })?;
        device.bind_texture(0, target, Some(id));

        let mut immutable = false;
        let mut result = Err(crate::error::DeviceError::Unsupported("immutable texture storage"));
        if device.info().supports(DeviceFeatures::TEXTURE_STORAGE) {
            result = device.tex_storage_2d(target, levels, format, size);
            immutable = result.is_ok();
            if let Err(e) = &result {
                warn!(target: "gl", "Immutable storage for {} texture failed ({}); retrying once", size, e);
            }
        }
        if result.is_err() {
            result = allocate_mutable_levels(device.as_ref(), target, levels, format, size);
        }
        if let Err(e) = result {
            error!(target: "gl", "Failed to allocate {} texture: {}", size, e);
            device.bind_texture(0, target, None);
            device.delete_texture(id);
            return Err(TextureError::AllocationFailed(e));
        }
        device.bind_texture(0, target, None);
        trace!(target: "gl", "Allocated {} ({}, {} levels, {:?})", id, size, levels, format);

        pool.acquire();
        let mut texture = Self {
            pool: pool.clone(),
            id,
            target,
            size,
            internal_format: format,
            filter: if levels > 1 {
                Filter::LinearMipmapLinear
            } else {
                Filter::Linear
            },
            wrap: WrapMode::ClampToEdge,
            parameters_dirty: true,
            mip_levels: levels,
            immutable,
            foreign: false,
            external_handle: None,
            content_transform: OutputTransform::Normal,
            y_inverted: false,
            normalized_matrix: Mat4::IDENTITY,
            pixel_matrix: Mat4::IDENTITY,
            geometry: None,
            cached_geometry: None,
            geometry_rebuilds: 0,
        };
        texture.update_matrix();
        Ok(texture)
    }

    /// Creates a texture holding `image`.
    pub fn from_image(pool: &TexturePool, image: &PixelBuffer, levels: u32) -> Result<Self, TextureError> {
        let mut texture = Self::allocate(pool, image.size(), levels)?;
        texture.update(image, Point::new(0, 0), image.bounds())?;
        texture.generate_mipmaps();
        Ok(texture)
    }

    /// Wraps a texture created outside the render core. It is sampled but never
    /// written or deleted by this crate.
    pub fn import_foreign(
        pool: &TexturePool,
        id: TextureId,
        target: TextureTarget,
        size: Size,
        external_handle: Option<u64>,
    ) -> Self {
        pool.acquire();
        let mut texture = Self {
            pool: pool.clone(),
            id,
            target,
            size,
            internal_format: InternalFormat::Rgba8,
            filter: Filter::Linear,
            wrap: WrapMode::ClampToEdge,
            parameters_dirty: true,
            mip_levels: 1,
            immutable: true,
            foreign: true,
            external_handle,
            content_transform: OutputTransform::Normal,
            y_inverted: false,
            normalized_matrix: Mat4::IDENTITY,
            pixel_matrix: Mat4::IDENTITY,
            geometry: None,
            cached_geometry: None,
            geometry_rebuilds: 0,
        };
        texture.update_matrix();
        texture
    }

    fn device(&self) -> &Rc<dyn GpuDevice> {
        self.pool.device()
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    /// Size of the backing buffer.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Size of the image after applying the content transform.
    pub fn logical_size(&self) -> Size {
        self.content_transform.map_size(self.size)
    }

    pub fn internal_format(&self) -> InternalFormat {
        self.internal_format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn is_foreign(&self) -> bool {
        self.foreign
    }

    pub fn external_handle(&self) -> Option<u64> {
        self.external_handle
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn wrap_mode(&self) -> WrapMode {
        self.wrap
    }

    pub fn set_filter(&mut self, filter: Filter) {
        if self.filter != filter {
            self.filter = filter;
            self.parameters_dirty = true;
        }
    }

    pub fn set_wrap_mode(&mut self, wrap: WrapMode) {
        if self.wrap != wrap {
            self.wrap = wrap;
            self.parameters_dirty = true;
        }
    }

    pub fn content_transform(&self) -> OutputTransform {
        self.content_transform
    }

    /// Records how the buffer is oriented relative to the logical image.
    pub fn set_content_transform(&mut self, transform: OutputTransform) {
        if self.content_transform == transform {
            return;
        }
        self.content_transform = transform;
        self.cached_geometry = None;
        self.update_matrix();
    }

    pub fn is_y_inverted(&self) -> bool {
        self.y_inverted
    }

    /// Marks the buffer as stored bottom row first, as framebuffer
    /// attachments are on GL.
    pub fn set_y_inverted(&mut self, inverted: bool) {
        if self.y_inverted == inverted {
            return;
        }
        self.y_inverted = inverted;
        self.cached_geometry = None;
        self.update_matrix();
    }

    /// Number of times the quad geometry was rebuilt.
    pub fn geometry_rebuilds(&self) -> u32 {
        self.geometry_rebuilds
    }

    /// Maps logical image coordinates to texture coordinates.
    pub fn matrix(&self, coordinates: CoordinateType) -> Mat4 {
        match coordinates {
            CoordinateType::Normalized => self.normalized_matrix,
            CoordinateType::Unnormalized => self.pixel_matrix,
        }
    }

    fn update_matrix(&mut self) {
        let logical = self.logical_size();
        let flip = if self.y_inverted {
            Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
        } else {
            Mat4::IDENTITY
        };
        self.normalized_matrix = Mat4::from_translation(Vec3::new(0.5, 0.5, 0.0))
            * flip
            * self.content_transform.inverted().to_mat4()
            * Mat4::from_translation(Vec3::new(-0.5, -0.5, 0.0));
        self.pixel_matrix = Mat4::from_scale(Vec3::new(self.size.width as f32, self.size.height as f32, 1.0))
            * self.normalized_matrix
            * Mat4::from_scale(Vec3::new(
                1.0 / logical.width.max(1) as f32,
                1.0 / logical.height.max(1) as f32,
                1.0,
            ));
    }

    /// Texture coordinate of a point given in logical image pixels.
    pub fn map_to_texture(&self, x: f32, y: f32) -> [f32; 2] {
        let p = self.pixel_matrix * Vec4::new(x, y, 0.0, 1.0);
        if self.target.uses_normalized_coordinates() {
            [p.x / self.size.width as f32, p.y / self.size.height as f32]
        } else {
            [p.x, p.y]
        }
    }

    /// Binds the texture to `unit`, applying pending sampler parameters.
    pub fn bind(&mut self, unit: u32) {
        let device = self.pool.device();
        device.bind_texture(unit, self.target, Some(self.id));
        if self.parameters_dirty {
            device.set_texture_filter(self.target, self.filter);
            device.set_texture_wrap(self.target, self.wrap);
            self.parameters_dirty = false;
        }
    }

    pub fn unbind(&self, unit: u32) {
        self.device().bind_texture(unit, self.target, None);
    }

    fn preferred_upload_format(&self) -> UploadFormat {
        match self.internal_format {
            InternalFormat::Bgra8 => UploadFormat::Bgra,
            InternalFormat::Rgba8 => UploadFormat::Rgba,
        }
    }

    /// Uploads `src` of `image` to `offset` in the texture.
    ///
    /// Images already in the preferred upload order go straight from the
    /// client buffer when the device can unpack sub-images; everything else is
    /// converted into a packed scratch buffer first. Both give the same pixels.
    pub fn update(&mut self, image: &PixelBuffer, offset: Point, src: Rect) -> Result<UploadPath, TextureError> {
        if self.foreign {
            return Err(TextureError::ForeignTexture);
        }
        if src.is_empty() {
            return Ok(UploadPath::Skipped);
        }
        let dst = Rect::from_origin_and_size(offset, src.size());
        if !image.bounds().contains_rect(&src) || !Rect::from_size(self.size).contains_rect(&dst) {
            return Err(TextureError::SourceOutOfBounds);
        }

        let preferred = self.preferred_upload_format();
        let device = self.pool.device().clone();
        let direct = device.info().supports(DeviceFeatures::UNPACK_SUBIMAGE)
            && image.format().has_alpha()
            && image.format().native_upload_format() == preferred
            && image.stride_is_pixel_aligned();

        self.bind(0);
        let result = if direct {
            let row_length = (image.stride() / crate::image::PixelFormat::BYTES_PER_PIXEL) as u32;
            let unpack = if row_length == src.width as u32 && src.x == 0 && src.y == 0 {
                UnpackLayout::TIGHT
            } else {
                UnpackLayout {
                    row_length,
                    skip_pixels: src.x as u32,
                    skip_rows: src.y as u32,
                }
            };
            device
                .tex_sub_image_2d(self.target, 0, dst, preferred, unpack, image.data())
                .map(|_| UploadPath::Direct)
        } else {
            let converted = image.convert_rect_to(src, preferred)?;
            device
                .tex_sub_image_2d(self.target, 0, dst, preferred, UnpackLayout::TIGHT, &converted)
                .map(|_| UploadPath::Converted)
        };
        self.unbind(0);

        result.map_err(|e| {
            warn!(target: "gl", "Uploading {} to {} failed: {}", src, self.id, e);
            TextureError::Device(e)
        })
    }

    /// Regenerates mip levels 1.. from level 0.
    ///
    /// Does nothing for single-level textures or without framebuffer support.
    pub fn generate_mipmaps(&mut self) -> bool {
        if self.mip_levels <= 1 || !self.device().info().supports(DeviceFeatures::FRAMEBUFFER_OBJECTS) {
            return false;
        }
        self.set_filter(Filter::LinearMipmapLinear);
        self.bind(0);
        self.device().generate_mipmap(self.target);
        self.unbind(0);
        true
    }

    /// Resets every pixel of level 0 to transparent black.
    pub fn clear(&mut self) -> Result<(), TextureError> {
        if self.foreign {
            return Err(TextureError::ForeignTexture);
        }
        let device = self.pool.device().clone();
        if self.pool.clear_fast_path_available() {
            match self.pool.scratch_framebuffer() {
                Ok(fbo) => {
                    let previous = device.draw_framebuffer_binding();
                    device.bind_framebuffer(FramebufferTarget::Draw, Some(fbo));
                    let attached = device.attach_color_texture(FramebufferTarget::Draw, Some(self.id), 0);
                    if attached.is_ok() {
                        device.set_scissor(None);
                        device.clear_color([0.0; 4]);
                    }
                    let _ = device.attach_color_texture(FramebufferTarget::Draw, None, 0);
                    device.bind_framebuffer(FramebufferTarget::Draw, previous);
                    match attached {
                        Ok(()) => return Ok(()),
                        Err(e) => warn!(target: "gl", "Cannot clear {} through a framebuffer: {}", self.id, e),
                    }
                }
                Err(e) => warn!(target: "gl", "Scratch framebuffer unavailable: {}", e),
            }
        }

        debug!(target: "gl", "Clearing {} by uploading zeroes", self.id);
        let zeroes = vec![0u8; self.size.area() as usize * UploadFormat::BYTES_PER_PIXEL];
        let format = self.preferred_upload_format();
        self.bind(0);
        let result = device.tex_sub_image_2d(
            self.target,
            0,
            Rect::from_size(self.size),
            format,
            UnpackLayout::TIGHT,
            &zeroes,
        );
        self.unbind(0);
        result.map_err(TextureError::Device)
    }

    fn rebuild_geometry(&mut self, src: Rect, target_size: Size) -> Result<(), TextureError> {
        let (w, h) = (target_size.width as f32, target_size.height as f32);
        let (left, top) = (src.x as f32, src.y as f32);
        let (right, bottom) = (src.right() as f32, src.bottom() as f32);
        let vertices = [
            TexturedVertex {
                position: [0.0, 0.0],
                texcoord: self.map_to_texture(left, top),
            },
            TexturedVertex {
                position: [0.0, h],
                texcoord: self.map_to_texture(left, bottom),
            },
            TexturedVertex {
                position: [w, 0.0],
                texcoord: self.map_to_texture(right, top),
            },
            TexturedVertex {
                position: [w, h],
                texcoord: self.map_to_texture(right, bottom),
            },
        ];
        let geometry = match &mut self.geometry {
            Some(geometry) => geometry,
            None => {
                let mut vbo = VertexBuffer::new(self.pool.device().clone(), BufferUsage::Dynamic)?;
                vbo.set_attrib_layout(&TexturedVertex::layout(), TexturedVertex::STRIDE);
                self.geometry.insert(vbo)
            }
        };
        geometry.set_vertices(&vertices)?;
        self.cached_geometry = Some((src, target_size));
        self.geometry_rebuilds += 1;
        Ok(())
    }

    /// Draws the whole logical image as a quad of `target_size`.
    pub fn render(&mut self, target_size: Size) -> Result<(), TextureError> {
        let src = Rect::from_size(self.logical_size());
        self.render_region(src, None, target_size)
    }

    /// Draws `src` (logical image pixels) as a quad of `target_size`, clipped
    /// to `clip` in device framebuffer coordinates when given.
    pub fn render_region(
        &mut self,
        src: Rect,
        clip: Option<&Region>,
        target_size: Size,
    ) -> Result<(), TextureError> {
        if target_size.is_empty() || src.is_empty() {
            return Ok(());
        }
        if self.cached_geometry != Some((src, target_size)) {
            self.rebuild_geometry(src, target_size)?;
        }
        self.bind(0);
        let result = match (self.geometry.as_mut(), clip) {
            (Some(geometry), None) => geometry.render(Topology::TriangleStrip),
            (Some(geometry), Some(clip)) => geometry.render_clipped(Topology::TriangleStrip, clip),
            (None, _) => Ok(()),
        };
        self.unbind(0);
        result.map_err(TextureError::from)
    }
}

fn allocate_mutable_levels(
    device: &dyn GpuDevice,
    target: TextureTarget,
    levels: u32,
    format: InternalFormat,
    size: Size,
) -> Result<(), crate::error::DeviceError> {
    let mut level_size = size;
    for level in 0..levels {
        device.tex_image_2d(target, level, format, level_size, None)?;
        level_size = Size::new((level_size.width / 2).max(1), (level_size.height / 2).max(1));
    }
    Ok(())
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        if !self.foreign {
            self.pool.device().delete_texture(self.id);
        }
        self.pool.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::device::software::SoftwareDevice;
    use crate::image::PixelFormat;

    fn pool_with(device: &Rc<SoftwareDevice>) -> TexturePool {
        TexturePool::new(device.clone(), &RenderConfig::default())
    }

    fn approx(a: [f32; 2], b: [f32; 2]) -> bool {
        (a[0] - b[0]).abs() < 1e-5 && (a[1] - b[1]).abs() < 1e-5
    }

    #[test]
    fn rejects_empty_sizes_and_reports_allocation_failure() {
        let device = Rc::new(SoftwareDevice::new());
        let pool = pool_with(&device);
        assert!(matches!(
            GpuTexture::allocate(&pool, Size::new(0, 4), 1),
            Err(TextureError::InvalidSize { .. })
        ));
        device.set_fail_texture_allocation(true);
        assert!(matches!(
            GpuTexture::allocate(&pool, Size::new(4, 4), 1),
            Err(TextureError::AllocationFailed(_))
        ));
        assert_eq!(device.live_texture_count(), 0);
        assert_eq!(pool.live_textures(), 0);
    }

    #[test]
    fn falls_back_to_mutable_storage() {
        let device = Rc::new(SoftwareDevice::with_features(
            DeviceFeatures::all() - DeviceFeatures::TEXTURE_STORAGE,
        ));
        let pool = pool_with(&device);
        let texture = GpuTexture::allocate(&pool, Size::new(8, 4), 3).unwrap();
        assert!(!texture.is_immutable());
        assert_eq!(device.texture_pixels(texture.id(), 2).unwrap().0, Size::new(2, 1));
    }

    #[test]
    fn geometry_is_rebuilt_only_when_inputs_change() {
        let device = Rc::new(SoftwareDevice::new());
        let pool = pool_with(&device);
        let mut texture = GpuTexture::allocate(&pool, Size::new(16, 8), 1).unwrap();

        texture.render(Size::new(16, 8)).unwrap();
        texture.render(Size::new(16, 8)).unwrap();
        assert_eq!(texture.geometry_rebuilds(), 1);

        texture
            .update(
                &PixelBuffer::new(Size::new(4, 4), PixelFormat::Argb8888).unwrap(),
                Point::new(0, 0),
                Rect::new(0, 0, 4, 4),
            )
            .unwrap();
        texture.set_content_transform(OutputTransform::Normal);
        texture.render(Size::new(16, 8)).unwrap();
        assert_eq!(texture.geometry_rebuilds(), 1);

        texture.render(Size::new(32, 16)).unwrap();
        assert_eq!(texture.geometry_rebuilds(), 2);

        texture.set_content_transform(OutputTransform::Rotated180);
        texture.render(Size::new(32, 16)).unwrap();
        assert_eq!(texture.geometry_rebuilds(), 3);
        assert_eq!(device.draws().len(), 5);
    }

    #[test]
    fn matrices_follow_content_transform() {
        let device = Rc::new(SoftwareDevice::new());
        let pool = pool_with(&device);
        let mut texture = GpuTexture::allocate(&pool, Size::new(4, 2), 1).unwrap();
        assert!(approx(texture.map_to_texture(4.0, 2.0), [1.0, 1.0]));

        for transform in [
            OutputTransform::Rotated90,
            OutputTransform::Rotated270,
            OutputTransform::Flipped90,
            OutputTransform::Flipped180,
        ] {
            texture.set_content_transform(transform);
            let logical = texture.logical_size();
            let cell = Rect::new(0, 0, 1, 1);
            let buffer_cell = transform.inverted().map_rect(cell, logical);
            let uv = texture.map_to_texture(0.5, 0.5);
            let expected = [
                (buffer_cell.x as f32 + 0.5) / 4.0,
                (buffer_cell.y as f32 + 0.5) / 2.0,
            ];
            assert!(approx(uv, expected), "{:?}: {:?} != {:?}", transform, uv, expected);
        }
    }

    #[test]
    fn y_inversion_flips_vertical_axis() {
        let device = Rc::new(SoftwareDevice::new());
        let pool = pool_with(&device);
        let mut texture = GpuTexture::allocate(&pool, Size::new(4, 4), 1).unwrap();
        texture.set_y_inverted(true);
        assert!(approx(texture.map_to_texture(0.0, 0.0), [0.0, 1.0]));
        let m = texture.matrix(CoordinateType::Unnormalized);
        let p = m * Vec4::new(1.0, 1.0, 0.0, 1.0);
        assert!(approx([p.x, p.y], [1.0, 3.0]));
    }

    #[test]
    fn mipmaps_need_levels_and_framebuffers() {
        let device = Rc::new(SoftwareDevice::new());
        let pool = pool_with(&device);
        let mut single = GpuTexture::allocate(&pool, Size::new(4, 4), 1).unwrap();
        assert!(!single.generate_mipmaps());

        let mut mipmapped = GpuTexture::allocate(&pool, Size::new(4, 4), 3).unwrap();
        assert!(mipmapped.generate_mipmaps());
        assert_eq!(mipmapped.filter(), Filter::LinearMipmapLinear);
        assert_eq!(device.stats().mipmap_generations, 1);

        let no_fbo = Rc::new(SoftwareDevice::with_features(
            DeviceFeatures::all() - DeviceFeatures::FRAMEBUFFER_OBJECTS,
        ));
        let pool = pool_with(&no_fbo);
        let mut texture = GpuTexture::allocate(&pool, Size::new(4, 4), 3).unwrap();
        assert!(!texture.generate_mipmaps());
    }

    #[test]
    fn clear_uses_framebuffer_then_falls_back() {
        let device = Rc::new(SoftwareDevice::new());
        let pool = pool_with(&device);
        let mut image = PixelBuffer::new(Size::new(4, 4), PixelFormat::Argb8888).unwrap();
        image.fill_rgba(image.bounds(), [9, 9, 9, 9]);
        let mut texture = GpuTexture::from_image(&pool, &image, 1).unwrap();

        texture.clear().unwrap();
        assert_eq!(device.stats().clears, 1);
        assert!(pool.has_scratch_framebuffer());
        assert!(device.texture_pixels(texture.id(), 0).unwrap().1.iter().all(|b| *b == 0));

        texture.update(&image, Point::new(0, 0), image.bounds()).unwrap();
        device.set_incomplete_framebuffers(true);
        texture.clear().unwrap();
        assert_eq!(device.stats().clears, 1);
        assert!(device.texture_pixels(texture.id(), 0).unwrap().1.iter().all(|b| *b == 0));

        drop(texture);
        assert!(!pool.has_scratch_framebuffer());
    }

    #[test]
    fn foreign_textures_are_never_deleted_or_written() {
        let device = Rc::new(SoftwareDevice::new());
        let pool = pool_with(&device);
        let external = device.create_texture().unwrap();
        let mut texture =
            GpuTexture::import_foreign(&pool, external, TextureTarget::External, Size::new(8, 8), Some(42));
        assert_eq!(texture.external_handle(), Some(42));
        assert_eq!(texture.clear(), Err(TextureError::ForeignTexture));
        drop(texture);
        assert!(device.texture_exists(external));
        assert_eq!(pool.live_textures(), 0);
    }
}
