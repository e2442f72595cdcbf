//! Frames composited by the software backend, checked pixel by pixel.

use novade_render_core::backend::{OutputId, SoftwareBackend};
use novade_render_core::{
    FrameOutcome, GpuTexture, OutputTransform, PixelBuffer, PixelFormat, Rect, Region, RenderConfig, Renderer,
    Size,
};
use pretty_assertions::assert_eq;

const OUTPUT: OutputId = 1;
const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GRAY: [f32; 4] = [0.5, 0.5, 0.5, 1.0];
const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

fn renderer(size: Size, buffers: usize) -> anyhow::Result<Renderer<SoftwareBackend>> {
    let config = RenderConfig::default();
    let mut backend = SoftwareBackend::new(&config);
    backend.set_buffer_count(buffers);
    backend.add_output(OUTPUT, size)?;
    Ok(Renderer::new(backend, config)?)
}

/// The buffer on screen as `(size, rows of RGBA pixels)`.
fn screen(renderer: &Renderer<SoftwareBackend>) -> anyhow::Result<(Size, Vec<[u8; 4]>)> {
    let (size, pixels) = renderer
        .backend()
        .presented_pixels(OUTPUT)
        .ok_or_else(|| anyhow::anyhow!("nothing presented on output {}", OUTPUT))?;
    Ok((size, pixels.chunks_exact(4).map(|p| [p[0], p[1], p[2], p[3]]).collect()))
}

fn red_pixels(size: Size, pixels: &[[u8; 4]]) -> Vec<(i32, i32)> {
    pixels
        .iter()
        .enumerate()
        .filter(|(_, p)| **p == [255, 0, 0, 255])
        .map(|(i, _)| (i as i32 % size.width, i as i32 / size.width))
        .collect()
}

#[test]
fn full_output_fill_reaches_the_screen() -> anyhow::Result<()> {
    let size = Size::new(8, 8);
    let mut renderer = renderer(size, 2)?;
    let full = Rect::from_size(size);

    let outcome = renderer.render_output(OUTPUT, &Region::from_rect(full), |pass| pass.fill_rect(full, RED))?;
    assert_eq!(outcome, FrameOutcome::Presented);

    let (shown, pixels) = screen(&renderer)?;
    assert_eq!(shown, size);
    assert_eq!(red_pixels(size, &pixels).len(), 64);
    Ok(())
}

#[test]
fn partial_repaints_match_a_full_redraw() -> anyhow::Result<()> {
    let size = Size::new(8, 8);
    let mut renderer = renderer(size, 2)?;
    let mut previous = Rect::from_size(size);

    for step in 0..6 {
        let square = Rect::new(step, step / 2, 2, 2);
        let mut damage = Region::from_rect(previous);
        damage.union_with(&Region::from_rect(square));
        renderer.render_output(OUTPUT, &damage, |pass| {
            pass.clear(GRAY);
            pass.fill_rect(square, RED)
        })?;
        previous = square;

        let (_, pixels) = screen(&renderer)?;
        let expected: Vec<(i32, i32)> = (square.y..square.bottom())
            .flat_map(|y| (square.x..square.right()).map(move |x| (x, y)))
            .collect();
        assert_eq!(red_pixels(size, &pixels), expected, "frame {}", step);
        assert!(pixels.iter().all(|p| p[3] == 255), "frame {} left unpainted pixels", step);
    }
    assert!(renderer.pipeline(OUTPUT).and_then(|p| p.last_plan()).is_some_and(|plan| !plan.is_full_repaint()));
    Ok(())
}

#[test]
fn textures_land_at_their_destination() -> anyhow::Result<()> {
    let size = Size::new(8, 8);
    let mut renderer = renderer(size, 2)?;
    let mut image = PixelBuffer::new(Size::new(4, 4), PixelFormat::Argb8888)?;
    for y in 0..4 {
        for x in 0..4 {
            image.set_pixel_rgba(x, y, [x as u8 * 60, y as u8 * 60, 200, 255]);
        }
    }
    let mut texture = GpuTexture::from_image(renderer.texture_pool(), &image, 1)?;
    let dst = Rect::new(3, 2, 4, 4);
    let full = Rect::from_size(size);

    renderer.render_output(OUTPUT, &Region::from_rect(full), |pass| {
        pass.clear(BLACK);
        pass.draw_texture(&mut texture, None, dst, 1.0)
    })?;

    let (_, pixels) = screen(&renderer)?;
    for y in 0..size.height {
        for x in 0..size.width {
            let expected = if dst.contains_point(novade_render_core::Point::new(x, y)) {
                image.pixel_rgba(x - dst.x, y - dst.y).unwrap_or_default()
            } else {
                [0, 0, 0, 255]
            };
            assert_eq!(pixels[(y * size.width + x) as usize], expected, "pixel ({}, {})", x, y);
        }
    }
    Ok(())
}

#[test]
fn opacity_scales_premultiplied_texels() -> anyhow::Result<()> {
    let size = Size::new(4, 4);
    let mut renderer = renderer(size, 1)?;
    let mut image = PixelBuffer::new(size, PixelFormat::Abgr8888)?;
    image.fill_rgba(Rect::from_size(size), [200, 100, 0, 255]);
    let mut texture = GpuTexture::from_image(renderer.texture_pool(), &image, 1)?;
    let full = Rect::from_size(size);

    renderer.render_output(OUTPUT, &Region::from_rect(full), |pass| {
        pass.draw_texture(&mut texture, None, full, 0.5)
    })?;

    let (_, pixels) = screen(&renderer)?;
    for pixel in pixels {
        for (got, want) in pixel.iter().zip([100u8, 50, 0, 128]) {
            assert!((*got as i32 - want as i32).abs() <= 1, "{:?} is not half of the texel", pixel);
        }
    }
    Ok(())
}

#[test]
fn rotated_outputs_show_the_scene_turned() -> anyhow::Result<()> {
    let physical = Size::new(8, 4);
    let mut renderer = renderer(physical, 2)?;
    if let Some(output) = renderer.backend_mut().virtual_output_mut(OUTPUT) {
        output.set_transform(OutputTransform::Rotated90, true);
    }
    let logical = Rect::new(0, 0, 4, 8);
    let square = Rect::new(0, 0, 2, 3);

    renderer.render_output(OUTPUT, &Region::from_rect(logical), |pass| {
        pass.clear(BLACK);
        pass.fill_rect(square, RED)
    })?;

    let (shown, pixels) = screen(&renderer)?;
    assert_eq!(shown, physical);
    let red = red_pixels(physical, &pixels);
    assert_eq!(red.len(), 6);
    let width = red.iter().map(|p| p.0).max().unwrap_or(0) - red.iter().map(|p| p.0).min().unwrap_or(0) + 1;
    let height = red.iter().map(|p| p.1).max().unwrap_or(0) - red.iter().map(|p| p.1).min().unwrap_or(0) + 1;
    assert_eq!((width, height), (3, 2));
    assert!(pixels.iter().all(|p| p[3] == 255));
    Ok(())
}
