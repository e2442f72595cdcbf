//! CPU-side pixel buffers handed to the render core by clients.

use crate::device::UploadFormat;
use crate::error::TextureError;
use crate::geometry::{Rect, Size};
use std::fmt;

/// Memory layout of a 32-bit pixel, named after the little-endian packed
/// value like `wl_shm` formats: `Argb8888` is stored as B, G, R, A bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Argb8888,
    Xrgb8888,
    Abgr8888,
    Xbgr8888,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Argb8888 | PixelFormat::Abgr8888)
    }

    /// Device upload order matching the byte order in memory.
    pub fn native_upload_format(self) -> UploadFormat {
        match self {
            PixelFormat::Argb8888 | PixelFormat::Xrgb8888 => UploadFormat::Bgra,
            PixelFormat::Abgr8888 | PixelFormat::Xbgr8888 => UploadFormat::Rgba,
        }
    }

    /// Reads one pixel as `[r, g, b, a]`; formats without alpha read as opaque.
    fn to_rgba(self, px: &[u8]) -> [u8; 4] {
        let alpha = |a: u8| if self.has_alpha() { a } else { 0xff };
        match self.native_upload_format() {
            UploadFormat::Bgra => [px[2], px[1], px[0], alpha(px[3])],
            UploadFormat::Rgba => [px[0], px[1], px[2], alpha(px[3])],
        }
    }

    fn from_rgba(self, rgba: [u8; 4]) -> [u8; 4] {
        match self.native_upload_format() {
            UploadFormat::Bgra => [rgba[2], rgba[1], rgba[0], rgba[3]],
            UploadFormat::Rgba => rgba,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Argb8888 => "ARGB8888",
            PixelFormat::Xrgb8888 => "XRGB8888",
            PixelFormat::Abgr8888 => "ABGR8888",
            PixelFormat::Xbgr8888 => "XBGR8888",
        };
        f.write_str(name)
    }
}

/// A client pixel buffer with an arbitrary row stride.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: i32,
    height: i32,
    stride: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .finish()
    }
}

impl PixelBuffer {
    /// A zero-filled, tightly packed buffer.
    pub fn new(size: Size, format: PixelFormat) -> Result<Self, TextureError> {
        let stride = size.width.max(0) as usize * PixelFormat::BYTES_PER_PIXEL;
        let len = stride * size.height.max(0) as usize;
        Self::from_raw(size, stride, format, vec![0; len])
    }

    pub fn from_raw(
        size: Size,
        stride: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, TextureError> {
        if size.is_empty() {
            return Err(TextureError::InvalidSize {
                width: size.width,
                height: size.height,
            });
        }
        let row = size.width as usize * PixelFormat::BYTES_PER_PIXEL;
        if stride < row {
            return Err(TextureError::ShortData {
                needed: row,
                got: stride,
            });
        }
        let needed = stride * (size.height as usize - 1) + row;
        if data.len() < needed {
            return Err(TextureError::ShortData {
                needed,
                got: data.len(),
            });
        }
        Ok(Self {
            width: size.width,
            height: size.height,
            stride,
            format,
            data,
        })
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.size())
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the stride is a whole number of pixels, which unpack
    /// row-length uploads require.
    pub fn stride_is_pixel_aligned(&self) -> bool {
        self.stride % PixelFormat::BYTES_PER_PIXEL == 0
    }

    fn offset(&self, x: i32, y: i32) -> usize {
        y as usize * self.stride + x as usize * PixelFormat::BYTES_PER_PIXEL
    }

    pub fn pixel_rgba(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        if !self.bounds().contains_point(crate::geometry::Point::new(x, y)) {
            return None;
        }
        let o = self.offset(x, y);
        Some(self.format.to_rgba(&self.data[o..o + 4]))
    }

    pub fn set_pixel_rgba(&mut self, x: i32, y: i32, rgba: [u8; 4]) {
        if !self.bounds().contains_point(crate::geometry::Point::new(x, y)) {
            return;
        }
        let o = self.offset(x, y);
        let px = self.format.from_rgba(rgba);
        self.data[o..o + 4].copy_from_slice(&px);
    }

    pub fn fill_rgba(&mut self, rect: Rect, rgba: [u8; 4]) {
        let rect = rect.intersection(&self.bounds());
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                self.set_pixel_rgba(x, y, rgba);
            }
        }
    }

    /// Copies `rect` into a tightly packed buffer in `target` byte order.
    ///
    /// Formats without alpha get an opaque alpha channel.
    pub fn convert_rect_to(&self, rect: Rect, target: UploadFormat) -> Result<Vec<u8>, TextureError> {
        if rect.is_empty() || !self.bounds().contains_rect(&rect) {
            return Err(TextureError::SourceOutOfBounds);
        }
        let mut out = Vec::with_capacity(rect.area() as usize * PixelFormat::BYTES_PER_PIXEL);
        for y in rect.y..rect.bottom() {
            let start = self.offset(rect.x, y);
            let row = &self.data[start..start + rect.width as usize * PixelFormat::BYTES_PER_PIXEL];
            for px in row.chunks_exact(PixelFormat::BYTES_PER_PIXEL) {
                let [r, g, b, a] = self.format.to_rgba(px);
                match target {
                    UploadFormat::Rgba => out.extend_from_slice(&[r, g, b, a]),
                    UploadFormat::Bgra => out.extend_from_slice(&[b, g, r, a]),
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_between_byte_orders() {
        let mut image = PixelBuffer::new(Size::new(2, 1), PixelFormat::Argb8888).unwrap();
        image.set_pixel_rgba(0, 0, [10, 20, 30, 40]);
        image.set_pixel_rgba(1, 0, [50, 60, 70, 80]);
        assert_eq!(&image.data()[..4], &[30, 20, 10, 40]);

        let rgba = image.convert_rect_to(image.bounds(), UploadFormat::Rgba).unwrap();
        assert_eq!(rgba, vec![10, 20, 30, 40, 50, 60, 70, 80]);
        let bgra = image.convert_rect_to(Rect::new(1, 0, 1, 1), UploadFormat::Bgra).unwrap();
        assert_eq!(bgra, vec![70, 60, 50, 80]);
    }

    #[test]
    fn opaque_formats_force_alpha() {
        let data = vec![1, 2, 3, 0, 0, 0, 0, 0];
        let image = PixelBuffer::from_raw(Size::new(1, 1), 8, PixelFormat::Xbgr8888, data).unwrap();
        assert_eq!(image.pixel_rgba(0, 0), Some([1, 2, 3, 255]));
    }

    #[test]
    fn rejects_short_data_and_bad_rects() {
        assert!(matches!(
            PixelBuffer::from_raw(Size::new(2, 2), 8, PixelFormat::Argb8888, vec![0; 12]),
            Err(TextureError::ShortData { needed: 16, got: 12 })
        ));
        let image = PixelBuffer::new(Size::new(2, 2), PixelFormat::Argb8888).unwrap();
        assert_eq!(
            image.convert_rect_to(Rect::new(1, 1, 2, 2), UploadFormat::Rgba),
            Err(TextureError::SourceOutOfBounds)
        );
    }
}
