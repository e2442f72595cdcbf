//! Per-output frame pipeline: damage history, repaint planning and the draw pass.

pub mod damage;
pub mod pass;
pub mod pipeline;

pub use damage::{DamageHistory, DAMAGE_HISTORY_CAPACITY};
pub use pass::{RenderPass, RenderResources};
pub use pipeline::{FrameOutcome, FrameState, OutputFramePipeline, RepaintPlan, RepaintReason};
