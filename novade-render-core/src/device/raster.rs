//! Triangle rasterization for the [`SoftwareDevice`](super::software::SoftwareDevice).
//!
//! Vertices go through the bound program's `mvp` into the viewport, texture
//! coordinates through its `textureMatrix`. Fragments replace the target
//! pixels the way GL does with blending disabled. Textures are sampled
//! nearest, whatever their filter says.

use super::PrimitiveMode;
use crate::geometry::{Rect, Size};
use glam::{Mat2, Mat4, Vec2, Vec4};
use tiny_skia::{
    BlendMode, Color, FillRule, FilterQuality, Mask, Paint, PathBuilder, Pattern, PixmapMut, PixmapRef,
    Shader, SpreadMode, Transform,
};

/// Where fragment colours come from.
pub(crate) enum Fill<'a> {
    /// Premultiplied RGBA written as is.
    Solid([f32; 4]),
    /// Premultiplied RGBA8 texels of level 0, scaled by `opacity`.
    Texture {
        pixels: &'a [u8],
        size: Size,
        normalized: bool,
        repeat: bool,
        opacity: f32,
    },
}

pub(crate) struct RasterSetup<'a> {
    pub mvp: Mat4,
    pub texture_matrix: Mat4,
    pub viewport: Rect,
    /// Scissor and viewport combined, top-left based.
    pub clip: Rect,
    pub fill: Fill<'a>,
}

impl RasterSetup<'_> {
    fn to_window(&self, position: [f32; 2]) -> Option<Vec2> {
        let clip = self.mvp * Vec4::new(position[0], position[1], 0.0, 1.0);
        if clip.w.abs() <= f32::EPSILON {
            return None;
        }
        let (x, y) = (clip.x / clip.w, clip.y / clip.w);
        let vp = self.viewport;
        Some(Vec2::new(
            vp.x as f32 + (x + 1.0) * 0.5 * vp.width as f32,
            vp.y as f32 + (1.0 - y) * 0.5 * vp.height as f32,
        ))
    }

    fn to_texels(&self, texcoord: [f32; 2], size: Size, normalized: bool) -> Vec2 {
        let t = self.texture_matrix * Vec4::new(texcoord[0], texcoord[1], 0.0, 1.0);
        if normalized {
            Vec2::new(t.x * size.width as f32, t.y * size.height as f32)
        } else {
            Vec2::new(t.x, t.y)
        }
    }
}

/// Vertex triples making up the triangles of a `count`-vertex draw.
pub(crate) fn triangles(mode: PrimitiveMode, count: usize) -> Vec<[usize; 3]> {
    match mode {
        PrimitiveMode::Triangles => (0..count / 3).map(|t| [3 * t, 3 * t + 1, 3 * t + 2]).collect(),
        PrimitiveMode::TriangleStrip => (0..count.saturating_sub(2)).map(|i| [i, i + 1, i + 2]).collect(),
        PrimitiveMode::TriangleFan => (1..count.saturating_sub(1)).map(|i| [0, i, i + 1]).collect(),
        PrimitiveMode::Points | PrimitiveMode::Lines | PrimitiveMode::LineStrip => Vec::new(),
    }
}

/// The affine map taking the texel triangle `uv` onto the window triangle.
fn texel_to_window(uv: [Vec2; 3], window: [Vec2; 3]) -> Option<Transform> {
    let texel = Mat2::from_cols(uv[1] - uv[0], uv[2] - uv[0]);
    if texel.determinant().abs() <= f32::EPSILON {
        return None;
    }
    let linear = Mat2::from_cols(window[1] - window[0], window[2] - window[0]) * texel.inverse();
    let offset = window[0] - linear * uv[0];
    Some(Transform::from_row(
        linear.x_axis.x,
        linear.x_axis.y,
        linear.y_axis.x,
        linear.y_axis.y,
        offset.x,
        offset.y,
    ))
}

fn solid_color(color: [f32; 4]) -> Color {
    let alpha = color[3].clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return Color::TRANSPARENT;
    }
    let straight = |c: f32| (c / alpha).clamp(0.0, 1.0);
    Color::from_rgba(straight(color[0]), straight(color[1]), straight(color[2]), alpha)
        .unwrap_or(Color::TRANSPARENT)
}

fn clip_mask(size: Size, clip: Rect) -> Option<Mask> {
    let mut mask = Mask::new(size.width as u32, size.height as u32)?;
    let rect = tiny_skia::Rect::from_xywh(clip.x as f32, clip.y as f32, clip.width as f32, clip.height as f32)?;
    mask.fill_path(&PathBuilder::from_rect(rect), FillRule::Winding, false, Transform::identity());
    Some(mask)
}

/// Fills `triangles` into the RGBA8 image `target` of `size`; returns how
/// many were drawn.
pub(crate) fn fill_triangles(
    target: &mut [u8],
    size: Size,
    setup: &RasterSetup<'_>,
    triangles: &[[usize; 3]],
    positions: &[[f32; 2]],
    texcoords: &[[f32; 2]],
) -> u32 {
    let bounds = Rect::from_size(size);
    let clip = setup.clip.intersection(&bounds);
    if clip.is_empty() || triangles.is_empty() {
        return 0;
    }
    let mask = if clip == bounds {
        None
    } else {
        match clip_mask(size, clip) {
            Some(mask) => Some(mask),
            None => return 0,
        }
    };
    let Some(mut pixmap) = PixmapMut::from_bytes(target, size.width as u32, size.height as u32) else {
        return 0;
    };
    let source = match &setup.fill {
        Fill::Texture { pixels, size, .. } => PixmapRef::from_bytes(pixels, size.width as u32, size.height as u32),
        Fill::Solid(_) => None,
    };

    let mut drawn = 0;
    for triangle in triangles {
        let corners = triangle.map(|i| positions.get(i).and_then(|p| setup.to_window(*p)));
        let [Some(a), Some(b), Some(c)] = corners else {
            continue;
        };
        let shader = match &setup.fill {
            Fill::Solid(color) => Shader::SolidColor(solid_color(*color)),
            Fill::Texture {
                size,
                normalized,
                repeat,
                opacity,
                ..
            } => {
                let Some(source) = source else {
                    continue;
                };
                let uv = triangle.map(|i| {
                    setup.to_texels(texcoords.get(i).copied().unwrap_or_default(), *size, *normalized)
                });
                let Some(transform) = texel_to_window(uv, [a, b, c]) else {
                    continue;
                };
                let spread = if *repeat { SpreadMode::Repeat } else { SpreadMode::Pad };
                Pattern::new(source, spread, FilterQuality::Nearest, opacity.clamp(0.0, 1.0), transform)
            }
        };

        let mut path = PathBuilder::new();
        path.move_to(a.x, a.y);
        path.line_to(b.x, b.y);
        path.line_to(c.x, c.y);
        path.close();
        let Some(path) = path.finish() else {
            continue;
        };
        let paint = Paint {
            shader,
            blend_mode: BlendMode::Source,
            anti_alias: false,
            ..Paint::default()
        };
        pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), mask.as_ref());
        drawn += 1;
    }
    drawn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::projection;
    use pretty_assertions::assert_eq;

    const SIZE: Size = Size { width: 8, height: 8 };

    fn setup(fill: Fill<'_>, clip: Rect) -> RasterSetup<'_> {
        RasterSetup {
            mvp: projection(SIZE),
            texture_matrix: Mat4::IDENTITY,
            viewport: Rect::from_size(SIZE),
            clip,
            fill,
        }
    }

    fn strip(rect: Rect) -> Vec<[f32; 2]> {
        let (l, t, r, b) = (rect.x as f32, rect.y as f32, rect.right() as f32, rect.bottom() as f32);
        vec![[l, t], [l, b], [r, t], [r, b]]
    }

    fn covered(pixels: &[u8]) -> Vec<(i32, i32)> {
        pixels
            .chunks_exact(4)
            .enumerate()
            .filter(|(_, p)| p[3] != 0)
            .map(|(i, _)| (i as i32 % SIZE.width, i as i32 / SIZE.width))
            .collect()
    }

    #[test]
    fn strip_covers_exactly_the_quad() {
        let mut pixels = vec![0u8; 8 * 8 * 4];
        let quad = Rect::new(2, 1, 3, 4);
        let tris = triangles(PrimitiveMode::TriangleStrip, 4);
        let setup = setup(Fill::Solid([1.0, 0.0, 0.0, 1.0]), Rect::from_size(SIZE));
        assert_eq!(fill_triangles(&mut pixels, SIZE, &setup, &tris, &strip(quad), &[]), 2);

        let expected: Vec<(i32, i32)> = (1..5).flat_map(|y| (2..5).map(move |x| (x, y))).collect();
        assert_eq!(covered(&pixels), expected);
        assert_eq!(pixels[(8 + 2) * 4..(8 + 2) * 4 + 4].to_vec(), vec![255, 0, 0, 255]);
    }

    #[test]
    fn clip_limits_fragments() {
        let mut pixels = vec![0u8; 8 * 8 * 4];
        let tris = triangles(PrimitiveMode::TriangleStrip, 4);
        let setup = setup(Fill::Solid([0.0, 1.0, 0.0, 1.0]), Rect::new(6, 6, 5, 5));
        fill_triangles(&mut pixels, SIZE, &setup, &tris, &strip(Rect::from_size(SIZE)), &[]);
        assert_eq!(covered(&pixels), vec![(6, 6), (7, 6), (6, 7), (7, 7)]);
    }

    #[test]
    fn texture_is_mapped_through_texcoords() {
        // 2x1 texture: red then blue, stretched across the whole target.
        let texels = [255, 0, 0, 255, 0, 0, 255, 255];
        let fill = Fill::Texture {
            pixels: &texels,
            size: Size::new(2, 1),
            normalized: true,
            repeat: false,
            opacity: 1.0,
        };
        let mut pixels = vec![0u8; 8 * 8 * 4];
        let tris = triangles(PrimitiveMode::TriangleStrip, 4);
        // Swapped horizontally: the right half of the target shows texel 0.
        let texcoords = [[1.0, 0.0], [1.0, 1.0], [0.0, 0.0], [0.0, 1.0]];
        let setup = setup(fill, Rect::from_size(SIZE));
        fill_triangles(&mut pixels, SIZE, &setup, &tris, &strip(Rect::from_size(SIZE)), &texcoords);

        let at = |x: usize, y: usize| pixels[(y * 8 + x) * 4..(y * 8 + x) * 4 + 4].to_vec();
        assert_eq!(at(0, 0), vec![0, 0, 255, 255]);
        assert_eq!(at(3, 7), vec![0, 0, 255, 255]);
        assert_eq!(at(4, 0), vec![255, 0, 0, 255]);
        assert_eq!(at(7, 7), vec![255, 0, 0, 255]);
    }

    #[test]
    fn fans_and_lists_split_into_triangles() {
        assert_eq!(triangles(PrimitiveMode::Triangles, 7), vec![[0, 1, 2], [3, 4, 5]]);
        assert_eq!(triangles(PrimitiveMode::TriangleFan, 5), vec![[0, 1, 2], [0, 2, 3], [0, 3, 4]]);
        assert!(triangles(PrimitiveMode::LineStrip, 5).is_empty());
        assert!(triangles(PrimitiveMode::TriangleStrip, 2).is_empty());
    }
}
