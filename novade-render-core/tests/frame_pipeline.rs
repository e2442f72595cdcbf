//! End-to-end frame pipeline behaviour against a backend with scripted buffer ages.

use novade_render_core::backend::{DamageTrackable, FrameTarget, OutputId, OutputSurface, Presentable, RenderBackend};
use novade_render_core::device::software::SoftwareDevice;
use novade_render_core::device::GpuDevice;
use novade_render_core::error::BackendError;
use novade_render_core::logging::init_test_logging;
use novade_render_core::output::DamageHistory;
use novade_render_core::{
    FrameError, FrameOutcome, Rect, Region, RenderConfig, RenderPass, RenderTarget, Renderer, RepaintReason,
    Size, TexturePool,
};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::rc::Rc;

const OUTPUT: OutputId = 4;
const GRAY: [f32; 4] = [0.5, 0.5, 0.5, 1.0];

struct ScriptedOutput {
    target: RenderTarget,
    ages: VecDeque<u32>,
    age: u32,
    presented: Vec<Region>,
    rollbacks: usize,
}

impl DamageTrackable for ScriptedOutput {
    fn supports_buffer_age(&self) -> bool {
        true
    }

    fn buffer_age(&self) -> u32 {
        self.age
    }
}

impl Presentable for ScriptedOutput {
    fn begin_frame(&mut self) -> Result<FrameTarget, BackendError> {
        self.age = self.ages.pop_front().unwrap_or(0);
        Ok(FrameTarget {
            binding: self.target.binding(),
            buffer_age: self.age,
        })
    }

    fn present(&mut self, damage: &Region) -> Result<(), BackendError> {
        self.presented.push(damage.clone());
        Ok(())
    }

    fn rollback(&mut self) {
        self.rollbacks += 1;
    }
}

impl OutputSurface for ScriptedOutput {
    fn id(&self) -> OutputId {
        OUTPUT
    }

    fn size(&self) -> Size {
        self.target.size()
    }
}

/// One output whose buffers report the ages queued in `ages`.
struct ScriptedBackend {
    output: ScriptedOutput,
    pool: TexturePool,
    device: Rc<SoftwareDevice>,
}

impl ScriptedBackend {
    fn new(size: Size, ages: &[u32]) -> anyhow::Result<Self> {
        init_test_logging();
        let device = Rc::new(SoftwareDevice::new());
        let pool = TexturePool::new(device.clone(), &RenderConfig::default());
        let target = RenderTarget::with_texture(&pool, size)?;
        Ok(Self {
            output: ScriptedOutput {
                target,
                ages: ages.iter().copied().collect(),
                age: 0,
                presented: Vec::new(),
                rollbacks: 0,
            },
            pool,
            device,
        })
    }
}

impl RenderBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn device(&self) -> Rc<dyn GpuDevice> {
        self.device.clone()
    }

    fn texture_pool(&self) -> TexturePool {
        self.pool.clone()
    }

    fn outputs(&self) -> Vec<OutputId> {
        vec![OUTPUT]
    }

    fn output_mut(&mut self, id: OutputId) -> Option<&mut dyn OutputSurface> {
        (id == OUTPUT).then_some(&mut self.output as &mut dyn OutputSurface)
    }

    fn supports_buffer_age(&self) -> bool {
        true
    }
}

fn renderer(ages: &[u32]) -> anyhow::Result<(Renderer<ScriptedBackend>, Rc<SoftwareDevice>)> {
    let backend = ScriptedBackend::new(Size::new(64, 64), ages)?;
    let device = backend.device.clone();
    Ok((Renderer::new(backend, RenderConfig::default())?, device))
}

fn fill(pass: &mut RenderPass<'_, '_>) -> Result<(), FrameError> {
    pass.fill_rect(Rect::new(0, 0, 64, 64), GRAY)
}

fn last_reason(renderer: &Renderer<ScriptedBackend>) -> Option<RepaintReason> {
    renderer
        .pipeline(OUTPUT)
        .and_then(|pipeline| pipeline.last_plan())
        .map(|plan| plan.reason)
}

#[test]
fn buffer_age_ladder_across_frames() -> anyhow::Result<()> {
    let (mut renderer, device) = renderer(&[0, 1, 5])?;
    let damage = Region::from_rect(Rect::new(10, 10, 10, 10));

    // Undefined buffer contents.
    assert_eq!(renderer.render_output(OUTPUT, &damage, fill)?, FrameOutcome::Presented);
    let plan = renderer.pipeline(OUTPUT).and_then(|p| p.last_plan()).cloned();
    let plan = plan.ok_or_else(|| anyhow::anyhow!("no plan after the first frame"))?;
    assert_eq!(plan.reason, RepaintReason::UndefinedBuffer);
    assert!(plan.is_full_repaint());
    assert_eq!(plan.region.area(), 64 * 64);

    // The buffer shown last frame: only the new damage needs repainting.
    device.take_draws();
    assert_eq!(renderer.render_output(OUTPUT, &damage, fill)?, FrameOutcome::Presented);
    let plan = renderer.pipeline(OUTPUT).and_then(|p| p.last_plan()).cloned();
    let plan = plan.ok_or_else(|| anyhow::anyhow!("no plan after the second frame"))?;
    assert_eq!(plan.reason, RepaintReason::BufferAge);
    assert_eq!(plan.region, damage);
    let draws = device.take_draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].scissor.map(|rect| rect.area()), Some(100));

    // Older than the recorded history.
    assert_eq!(renderer.render_output(OUTPUT, &damage, fill)?, FrameOutcome::Presented);
    assert_eq!(last_reason(&renderer), Some(RepaintReason::HistoryTooShort));
    assert_eq!(
        renderer.pipeline(OUTPUT).and_then(|p| p.last_plan()).map(|p| p.region.area()),
        Some(64 * 64)
    );

    let presented = &renderer.backend().output.presented;
    assert_eq!(presented.len(), 3);
    assert!(presented.iter().all(|region| *region == damage));
    Ok(())
}

#[test]
fn accumulated_damage_covers_every_frame_since_the_buffer_was_shown() -> anyhow::Result<()> {
    let (mut renderer, _device) = renderer(&[0, 0, 0, 3])?;
    let frames = [
        Rect::new(40, 0, 8, 8),
        Rect::new(20, 0, 8, 8),
        Rect::new(0, 0, 8, 8),
    ];
    for rect in frames {
        renderer.render_output(OUTPUT, &Region::from_rect(rect), |_| Ok(()))?;
    }

    // Age 3: the two newest frames happened after this buffer was on screen.
    let damage = Region::from_rect(Rect::new(0, 32, 4, 4));
    renderer.render_output(OUTPUT, &damage, |_| Ok(()))?;
    let plan = renderer.pipeline(OUTPUT).and_then(|p| p.last_plan()).cloned();
    let plan = plan.ok_or_else(|| anyhow::anyhow!("no plan"))?;
    assert_eq!(plan.reason, RepaintReason::BufferAge);

    let mut expected = Region::from_rect(frames[2]);
    expected.union_with(&Region::from_rect(frames[1]));
    expected.union_with(&damage);
    assert_eq!(plan.region, expected);
    assert!(!plan.region.intersects_rect(&frames[0]));
    Ok(())
}

#[test]
fn damage_history_unions_the_newest_entries() {
    let d1 = Region::from_rect(Rect::new(0, 0, 5, 5));
    let d2 = Region::from_rect(Rect::new(10, 0, 5, 5));
    let d3 = Region::from_rect(Rect::new(20, 0, 5, 5));
    let mut history = DamageHistory::new();
    for damage in [&d3, &d2, &d1] {
        history.push(damage.clone());
    }

    assert_eq!(history.accumulate(3), Some(d1.union(&d2)));
    assert_eq!(history.accumulate(1), Some(Region::new()));
    assert_eq!(history.accumulate(4), None);
    assert_eq!(history.accumulate(0), None);
}

#[test]
fn invisible_frame_with_offscreen_work_rolls_back() -> anyhow::Result<()> {
    let (mut renderer, device) = renderer(&[0, 1])?;
    let first = Region::from_rect(Rect::new(0, 0, 16, 16));
    renderer.render_output(OUTPUT, &first, |pass| pass.fill_rect(Rect::new(0, 0, 16, 16), GRAY))?;

    let flushes = device.stats().flushes;
    let outside = Region::from_rect(Rect::new(100, 100, 10, 10));
    let outcome = renderer.render_output(OUTPUT, &outside, |pass| {
        let scratch = RenderTarget::with_texture(pass.texture_pool(), Size::new(8, 8))?;
        pass.push_offscreen(&scratch);
        let result = pass.fill_rect(Rect::new(0, 0, 8, 8), GRAY);
        pass.pop_offscreen();
        result
    })?;

    assert_eq!(outcome, FrameOutcome::RolledBack);
    assert_eq!(device.stats().flushes, flushes + 1);
    let backend = renderer.backend();
    assert_eq!(backend.output.presented.len(), 1);
    assert_eq!(backend.output.rollbacks, 1);

    let pipeline = renderer
        .pipeline(OUTPUT)
        .ok_or_else(|| anyhow::anyhow!("output pipeline missing"))?;
    assert_eq!(pipeline.history().len(), 1);
    assert_eq!(pipeline.history().get(0), Some(&first));
    assert_eq!(pipeline.rolled_back_frames(), 1);
    Ok(())
}

#[test]
fn disabling_buffer_age_always_repaints_fully() -> anyhow::Result<()> {
    let backend = ScriptedBackend::new(Size::new(32, 32), &[0, 1, 1])?;
    let config = RenderConfig {
        use_buffer_age: false,
        ..RenderConfig::default()
    };
    let mut renderer = Renderer::new(backend, config)?;
    let damage = Region::from_rect(Rect::new(0, 0, 2, 2));
    for _ in 0..3 {
        renderer.render_output(OUTPUT, &damage, |pass| pass.fill_rect(Rect::new(0, 0, 2, 2), GRAY))?;
        assert_eq!(last_reason(&renderer), Some(RepaintReason::BufferAgeUnsupported));
    }
    Ok(())
}
