//! Per-output frame lifecycle.
//!
//! A frame goes `Idle -> Preparing -> Rendering -> Presenting -> Idle`.
//! [`OutputFramePipeline::begin_frame`] acquires a buffer and decides how much
//! of it must be repainted, [`render`](OutputFramePipeline::render) runs the
//! scene's draw calls and [`finish_frame`](OutputFramePipeline::finish_frame)
//! either presents the buffer or rolls it back when nothing visible changed.

use super::damage::DamageHistory;
use super::pass::{RenderPass, RenderResources};
use crate::backend::{FrameTarget, OutputId, RenderBackend};
use crate::config::RenderConfig;
use crate::error::FrameError;
use crate::geometry::{OutputTransform, Rect, Region, Size};
use crate::render_target::{RenderTarget, TargetBinding};
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Preparing,
    Rendering,
    Presenting,
}

impl FrameState {
    fn name(self) -> &'static str {
        match self {
            FrameState::Idle => "idle",
            FrameState::Preparing => "preparing",
            FrameState::Rendering => "rendering",
            FrameState::Presenting => "presenting",
        }
    }
}

/// Why a frame repaints what it repaints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepaintReason {
    /// Backend, surface or configuration cannot report buffer ages.
    BufferAgeUnsupported,
    /// Rendering goes through an intermediate target that is redrawn whole.
    IntermediateTarget,
    /// A previous failure left the buffer contents in doubt.
    Forced,
    /// The acquired buffer has undefined contents.
    UndefinedBuffer,
    /// The buffer is older than the damage history reaches back.
    HistoryTooShort,
    /// Partial repaint of the current damage plus what the buffer missed.
    BufferAge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepaintPlan {
    /// Output-local region to redraw, within `geometry`.
    pub region: Region,
    pub reason: RepaintReason,
    pub buffer_age: u32,
    /// The logical output rectangle the scene draws into.
    pub geometry: Rect,
}

impl RepaintPlan {
    pub fn is_full_repaint(&self) -> bool {
        self.reason != RepaintReason::BufferAge
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Nothing visible changed; the buffer went back unshown.
    RolledBack,
}

struct PendingFrame {
    target: FrameTarget,
    plan: RepaintPlan,
    /// Scene damage given to `begin_frame`.
    damage: Region,
    drawn: bool,
    gpu_work: bool,
    rendered: bool,
    failed: bool,
}

pub struct OutputFramePipeline {
    output: OutputId,
    state: FrameState,
    history: DamageHistory,
    use_buffer_age: bool,
    transform: OutputTransform,
    needs_correction: bool,
    intermediate: Option<RenderTarget>,
    force_full_repaint: bool,
    /// Damage of frames that never reached the screen.
    missed_damage: Region,
    /// History was cleared; the next presented frame changed everything.
    history_reset: bool,
    last_size: Option<Size>,
    frame: Option<PendingFrame>,
    last_plan: Option<RepaintPlan>,
    presented: u64,
    rolled_back: u64,
}

impl std::fmt::Debug for OutputFramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputFramePipeline")
            .field("output", &self.output)
            .field("state", &self.state)
            .field("history", &self.history.len())
            .field("transform", &self.transform)
            .field("force_full_repaint", &self.force_full_repaint)
            .field("missed_damage", &self.missed_damage.area())
            .finish()
    }
}

impl OutputFramePipeline {
    pub fn new(output: OutputId, config: &RenderConfig) -> Self {
        Self {
            output,
            state: FrameState::Idle,
            history: DamageHistory::new(),
            use_buffer_age: config.use_buffer_age,
            transform: OutputTransform::Normal,
            needs_correction: false,
            intermediate: None,
            force_full_repaint: false,
            missed_damage: Region::new(),
            history_reset: false,
            last_size: None,
            frame: None,
            last_plan: None,
            presented: 0,
            rolled_back: 0,
        }
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn history(&self) -> &DamageHistory {
        &self.history
    }

    /// Plan of the most recently begun frame.
    pub fn last_plan(&self) -> Option<&RepaintPlan> {
        self.last_plan.as_ref()
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    pub fn rolled_back_frames(&self) -> u64 {
        self.rolled_back
    }

    pub fn uses_intermediate_target(&self) -> bool {
        self.needs_correction && self.transform != OutputTransform::Normal
    }

    /// Forgets all damage history; the next frame repaints everything.
    pub fn invalidate_history(&mut self) {
        self.history.clear();
        self.history_reset = true;
        self.force_full_repaint = true;
    }

    /// Keeps the damage of a frame that was dropped so the next presented
    /// frame reports it.
    fn drop_damage(&mut self, damage: &Region) {
        self.missed_damage.union_with(damage);
        self.force_full_repaint = true;
    }

    /// What the screen shows differently once this frame is presented.
    fn visible_damage(&self, damage: &Region, geometry: &Rect) -> Region {
        let mut changed = damage.clone();
        changed.union_with(&self.missed_damage);
        changed.intersected_with_rect(geometry)
    }

    /// Drops GPU objects owned by the pipeline. Needed before the device they
    /// were created on goes away.
    pub fn release_resources(&mut self) {
        self.intermediate = None;
        self.invalidate_history();
    }

    fn apply_transform(&mut self, transform: OutputTransform, needs_correction: bool) {
        if transform == self.transform && needs_correction == self.needs_correction {
            return;
        }
        debug!(
            target: "frame",
            "Output {} transform {:?} -> {:?} (corrected in renderer: {})",
            self.output, self.transform, transform, needs_correction
        );
        self.transform = transform;
        self.needs_correction = needs_correction;
        self.intermediate = None;
        self.invalidate_history();
    }

    fn logical_size(&self, physical: Size) -> Size {
        if self.uses_intermediate_target() {
            self.transform.map_size(physical)
        } else {
            physical
        }
    }

    fn select_repaint(
        &self,
        age_supported: bool,
        age: u32,
        damage: &Region,
        geometry: Rect,
    ) -> (Region, RepaintReason) {
        let full = Region::from_rect(geometry);
        if !age_supported {
            return (full, RepaintReason::BufferAgeUnsupported);
        }
        if self.uses_intermediate_target() {
            return (full, RepaintReason::IntermediateTarget);
        }
        if self.force_full_repaint {
            return (full, RepaintReason::Forced);
        }
        if age == 0 {
            return (full, RepaintReason::UndefinedBuffer);
        }
        match self.history.accumulate(age) {
            None => (full, RepaintReason::HistoryTooShort),
            Some(mut region) => {
                region.union_with(damage);
                (region.intersected_with_rect(&geometry), RepaintReason::BufferAge)
            }
        }
    }

    /// Acquires the output's next buffer and plans its repaint.
    ///
    /// `damage` is what changed in the scene since the previous frame, in
    /// logical output coordinates.
    pub fn begin_frame(
        &mut self,
        backend: &mut dyn RenderBackend,
        damage: &Region,
    ) -> Result<RepaintPlan, FrameError> {
        if self.state != FrameState::Idle {
            return Err(FrameError::InvalidState(self.state.name()));
        }
        if backend.device().is_context_lost() {
            self.invalidate_history();
            return Err(FrameError::ContextLost);
        }
        self.state = FrameState::Preparing;

        let backend_age = backend.supports_buffer_age();
        let Some(surface) = backend.output_mut(self.output) else {
            self.state = FrameState::Idle;
            return Err(FrameError::UnknownOutput(self.output));
        };
        let (transform, needs_correction) = (surface.transform(), surface.needs_transform_correction());
        let surface_age = surface.supports_buffer_age();
        let target = match surface.begin_frame() {
            Ok(target) => target,
            Err(e) => {
                self.state = FrameState::Idle;
                self.drop_damage(damage);
                return Err(e.into());
            }
        };
        self.apply_transform(transform, needs_correction);

        let physical = target.size();
        if self.last_size != Some(physical) {
            if let Some(previous) = self.last_size {
                debug!(target: "frame", "Output {} resized {} -> {}", self.output, previous, physical);
                self.invalidate_history();
            }
            self.last_size = Some(physical);
            self.intermediate = None;
        }

        let geometry = Rect::from_size(self.logical_size(physical));
        let age_supported = self.use_buffer_age && backend_age && surface_age;
        let (region, reason) = self.select_repaint(age_supported, target.buffer_age, damage, geometry);
        trace!(
            target: "frame",
            "Output {} repaint {:?} ({} px, age {})",
            self.output, reason, region.area(), target.buffer_age
        );

        let plan = RepaintPlan {
            region,
            reason,
            buffer_age: target.buffer_age,
            geometry,
        };
        self.frame = Some(PendingFrame {
            target,
            plan: plan.clone(),
            damage: damage.clone(),
            drawn: false,
            gpu_work: false,
            rendered: false,
            failed: false,
        });
        self.last_plan = Some(plan.clone());
        self.state = FrameState::Rendering;
        Ok(plan)
    }

    /// Runs `draw` against the acquired buffer, or the intermediate target
    /// when the output needs transform correction.
    ///
    /// On error the frame must be given up with [`abort_frame`](Self::abort_frame).
    pub fn render<F>(&mut self, resources: &mut RenderResources<'_>, draw: F) -> Result<(), FrameError>
    where
        F: FnOnce(&mut RenderPass<'_, '_>) -> Result<(), FrameError>,
    {
        let (output_binding, region, geometry, changed) = match self.frame.as_ref() {
            Some(frame) if self.state == FrameState::Rendering && !frame.rendered => (
                frame.target.binding,
                frame.plan.region.clone(),
                frame.plan.geometry,
                !self.visible_damage(&frame.damage, &frame.plan.geometry).is_empty(),
            ),
            _ => return Err(FrameError::InvalidState(self.state.name())),
        };

        let result = self.render_inner(resources, output_binding, region, geometry.size(), changed, draw);
        let result = if resources.device.is_context_lost() {
            Err(FrameError::ContextLost)
        } else {
            result.map_err(FrameError::normalized)
        };

        match result {
            Ok((drawn, gpu_work)) => {
                if let Some(frame) = self.frame.as_mut() {
                    frame.drawn = drawn;
                    frame.gpu_work = gpu_work;
                    frame.rendered = true;
                }
                Ok(())
            }
            Err(e) => {
                if let Some(frame) = self.frame.as_mut() {
                    frame.rendered = true;
                    frame.failed = true;
                }
                if e == FrameError::ContextLost {
                    self.invalidate_history();
                }
                error!(target: "frame", "Rendering output {} failed: {}", self.output, e);
                Err(e)
            }
        }
    }

    fn render_inner<F>(
        &mut self,
        resources: &mut RenderResources<'_>,
        output_binding: TargetBinding,
        region: Region,
        logical: Size,
        changed: bool,
        draw: F,
    ) -> Result<(bool, bool), FrameError>
    where
        F: FnOnce(&mut RenderPass<'_, '_>) -> Result<(), FrameError>,
    {
        if self.uses_intermediate_target() && self.intermediate.is_none() {
            let target = RenderTarget::with_texture(resources.pool, logical).map_err(FrameError::RenderTarget)?;
            debug!(target: "frame", "Output {} renders through a {} intermediate target", self.output, logical);
            self.intermediate = Some(target);
        }
        let binding = self
            .intermediate
            .as_ref()
            .map_or(output_binding, RenderTarget::binding);

        resources.buffers.begin_frame();
        resources.stack.push(binding);
        let mut pass = RenderPass::new(resources, binding, region);
        let drawn = draw(&mut pass);
        let (mut visible, mut gpu_work) = pass.finish();
        resources.stack.pop();
        drawn?;

        // The output buffer only needs the intermediate copy if it is going
        // to be presented.
        if let Some(intermediate) = self.intermediate.as_mut().filter(|_| visible || changed) {
            let shader = resources
                .shaders
                .textured()
                .ok_or(FrameError::ShaderUnavailable("textured"))?;
            resources.stack.push(output_binding);
            let result = intermediate.draw_transformed(shader, self.transform, output_binding.size, None);
            resources.stack.pop();
            result?;
            visible = true;
            gpu_work = true;
        }

        resources.buffers.end_of_frame()?;
        Ok((visible, gpu_work))
    }

    /// Presents the frame, or rolls it back when nothing visible changed.
    ///
    /// `damage` must be the same region passed to [`begin_frame`](Self::begin_frame).
    pub fn finish_frame(
        &mut self,
        backend: &mut dyn RenderBackend,
        damage: &Region,
    ) -> Result<FrameOutcome, FrameError> {
        let ready = matches!(&self.frame, Some(frame) if frame.rendered && !frame.failed);
        if self.state != FrameState::Rendering || !ready {
            return Err(FrameError::InvalidState(self.state.name()));
        }
        let Some(frame) = self.frame.take() else {
            return Err(FrameError::InvalidState(self.state.name()));
        };
        self.state = FrameState::Presenting;

        let device = backend.device();
        let Some(surface) = backend.output_mut(self.output) else {
            self.state = FrameState::Idle;
            self.drop_damage(&frame.damage);
            return Err(FrameError::UnknownOutput(self.output));
        };

        let visible = self.visible_damage(damage, &frame.plan.geometry);
        if visible.is_empty() && !frame.drawn {
            if frame.gpu_work {
                device.flush();
            }
            surface.rollback();
            self.state = FrameState::Idle;
            self.rolled_back += 1;
            trace!(target: "frame", "Output {} frame rolled back", self.output);
            return Ok(FrameOutcome::RolledBack);
        }

        let changed = if self.history_reset {
            Region::from_rect(frame.plan.geometry)
        } else {
            visible
        };
        let present_damage = if self.uses_intermediate_target() {
            Region::from_rect(Rect::from_size(frame.target.size()))
        } else {
            changed.clone()
        };
        let result = surface.present(&present_damage);
        self.state = FrameState::Idle;
        match result {
            Ok(()) => {
                self.history.push(changed);
                self.missed_damage = Region::new();
                self.history_reset = false;
                self.force_full_repaint = false;
                self.presented += 1;
                Ok(FrameOutcome::Presented)
            }
            Err(e) => {
                let e = FrameError::from(e);
                warn!(target: "frame", "Output {} failed to present: {}", self.output, e);
                if e == FrameError::ContextLost {
                    self.invalidate_history();
                }
                self.drop_damage(damage);
                Err(e)
            }
        }
    }

    /// Gives up the frame in progress, returning its buffer unshown.
    pub fn abort_frame(&mut self, backend: &mut dyn RenderBackend) {
        let Some(frame) = self.frame.take() else {
            self.state = FrameState::Idle;
            return;
        };
        if let Some(surface) = backend.output_mut(self.output) {
            surface.rollback();
        }
        self.drop_damage(&frame.damage);
        self.state = FrameState::Idle;
        debug!(target: "frame", "Output {} frame aborted", self.output);
    }

    /// One complete frame: begin, render, then present or roll back.
    pub fn render_frame<F>(
        &mut self,
        backend: &mut dyn RenderBackend,
        resources: &mut RenderResources<'_>,
        damage: &Region,
        draw: F,
    ) -> Result<FrameOutcome, FrameError>
    where
        F: FnOnce(&mut RenderPass<'_, '_>) -> Result<(), FrameError>,
    {
        self.begin_frame(backend, damage)?;
        if let Err(e) = self.render(resources, draw) {
            self.abort_frame(backend);
            return Err(e);
        }
        self.finish_frame(backend, damage)
    }
}
