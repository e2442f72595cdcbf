//! Offscreen N-buffer swapchain used by backends without a native one.

use super::listener::{emit, NativeCallback, NativeListener};
use super::{DamageTrackable, FrameTarget, OutputId, OutputSurface, Presentable};
use crate::error::{BackendError, FrameError, TextureError};
use crate::geometry::{OutputTransform, Region, Size};
use crate::render_target::RenderTarget;
use crate::texture_pool::TexturePool;
use std::ffi::c_void;
use tracing::{debug, warn};

/// Delivered to page-flip listeners after every successful presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlip {
    pub output: OutputId,
    pub sequence: u64,
    pub buffer: usize,
}

struct Slot {
    target: RenderTarget,
    /// Presentation sequence number at which the slot was last shown.
    presented_at: Option<u64>,
}

/// An output whose buffers are offscreen render targets.
///
/// Buffer ages are exact: a slot reports how many presentations happened
/// since it was last shown, or zero if it never was or its last frame was
/// rejected.
pub struct VirtualOutput {
    id: OutputId,
    size: Size,
    pool: TexturePool,
    slots: Vec<Slot>,
    acquired: Option<usize>,
    front: Option<usize>,
    sequence: u64,
    transform: OutputTransform,
    needs_transform_correction: bool,
    buffer_age_supported: bool,
    reject_next: Option<String>,
    last_damage: Region,
    listeners: Vec<NativeListener<PageFlip>>,
    registrations: Vec<(NativeCallback, *mut c_void)>,
}

impl std::fmt::Debug for VirtualOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualOutput")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("buffers", &self.slots.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

fn allocate_slots(pool: &TexturePool, size: Size, buffers: usize) -> Result<Vec<Slot>, TextureError> {
    (0..buffers.max(1))
        .map(|_| {
            RenderTarget::with_texture(pool, size).map(|target| Slot {
                target,
                presented_at: None,
            })
        })
        .collect()
}

impl VirtualOutput {
    pub fn new(pool: &TexturePool, id: OutputId, size: Size, buffers: usize) -> Result<Self, TextureError> {
        let slots = allocate_slots(pool, size, buffers)?;
        debug!(target: "frame", "Output {} swapchain: {} buffers of {}", id, slots.len(), size);
        Ok(Self {
            id,
            size,
            pool: pool.clone(),
            slots,
            acquired: None,
            front: None,
            sequence: 0,
            transform: OutputTransform::Normal,
            needs_transform_correction: false,
            buffer_age_supported: true,
            reject_next: None,
            last_damage: Region::new(),
            listeners: Vec::new(),
            registrations: Vec::new(),
        })
    }

    /// Reallocates every buffer; all contents become undefined.
    pub fn resize(&mut self, size: Size) -> Result<(), TextureError> {
        let buffers = self.slots.len();
        self.slots = allocate_slots(&self.pool, size, buffers)?;
        self.size = size;
        self.acquired = None;
        self.front = None;
        Ok(())
    }

    pub fn set_transform(&mut self, transform: OutputTransform, needs_correction: bool) {
        self.transform = transform;
        self.needs_transform_correction = needs_correction;
    }

    pub fn set_buffer_age_supported(&mut self, supported: bool) {
        self.buffer_age_supported = supported;
    }

    /// Makes the next [`present`](Presentable::present) fail with `reason`.
    pub fn reject_next_present(&mut self, reason: impl Into<String>) {
        self.reject_next = Some(reason.into());
    }

    pub fn on_page_flip<F>(&mut self, callback: F)
    where
        F: FnMut(&PageFlip) + 'static,
    {
        // The output moves freely, so listeners carry its id rather than its address.
        let handle = self.id as usize as *mut c_void;
        self.listeners.push(NativeListener::new(handle, callback));
        if let Some(listener) = self.listeners.last_mut() {
            self.registrations.push(listener.as_raw());
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.slots.len()
    }

    pub fn presented_frames(&self) -> u64 {
        self.sequence
    }

    /// Damage passed with the last successful presentation.
    pub fn last_damage(&self) -> &Region {
        &self.last_damage
    }

    pub fn front_buffer(&self) -> Option<&RenderTarget> {
        self.front.map(|index| &self.slots[index].target)
    }

    pub fn is_frame_pending(&self) -> bool {
        self.acquired.is_some()
    }

    fn age_of(&self, index: usize) -> u32 {
        match self.slots[index].presented_at {
            Some(shown) => (self.sequence - shown + 1).min(u32::MAX as u64) as u32,
            None => 0,
        }
    }

    fn next_slot(&self) -> usize {
        let candidates = (0..self.slots.len()).filter(|i| self.slots.len() == 1 || Some(*i) != self.front);
        candidates
            .min_by_key(|i| self.slots[*i].presented_at)
            .unwrap_or(0)
    }
}

impl DamageTrackable for VirtualOutput {
    fn supports_buffer_age(&self) -> bool {
        self.buffer_age_supported
    }

    fn buffer_age(&self) -> u32 {
        match self.acquired {
            Some(index) if self.buffer_age_supported => self.age_of(index),
            _ => 0,
        }
    }
}

impl Presentable for VirtualOutput {
    fn begin_frame(&mut self) -> Result<FrameTarget, BackendError> {
        if self.acquired.is_some() {
            return Err(FrameError::InvalidState("a buffer is already acquired").into());
        }
        let index = self.next_slot();
        self.acquired = Some(index);
        Ok(FrameTarget {
            binding: self.slots[index].target.binding(),
            buffer_age: self.buffer_age(),
        })
    }

    fn present(&mut self, damage: &Region) -> Result<(), BackendError> {
        let Some(index) = self.acquired.take() else {
            return Err(FrameError::InvalidState("no buffer acquired").into());
        };
        if let Some(reason) = self.reject_next.take() {
            warn!(target: "frame", "Output {} rejected buffer {}: {}", self.id, index, reason);
            self.slots[index].presented_at = None;
            return Err(FrameError::PresentRejected(reason).into());
        }
        self.sequence += 1;
        self.slots[index].presented_at = Some(self.sequence);
        self.front = Some(index);
        self.last_damage = damage.clone();

        let flip = PageFlip {
            output: self.id,
            sequence: self.sequence,
            buffer: index,
        };
        for (callback, user_data) in &self.registrations {
            // SAFETY: every registration belongs to a listener in
            // `self.listeners`, which lives as long as `self`.
            unsafe { emit(*callback, *user_data, &flip) };
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.acquired = None;
    }
}

impl OutputSurface for VirtualOutput {
    fn id(&self) -> OutputId {
        self.id
    }

    fn size(&self) -> Size {
        self.size
    }

    fn transform(&self) -> OutputTransform {
        self.transform
    }

    fn needs_transform_correction(&self) -> bool {
        self.needs_transform_correction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::device::software::SoftwareDevice;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn output(buffers: usize) -> VirtualOutput {
        let device = Rc::new(SoftwareDevice::new());
        let pool = TexturePool::new(device, &RenderConfig::default());
        VirtualOutput::new(&pool, 1, Size::new(16, 16), buffers).unwrap()
    }

    fn cycle(output: &mut VirtualOutput) -> u32 {
        let age = output.begin_frame().unwrap().buffer_age;
        output.present(&Region::new()).unwrap();
        age
    }

    #[test]
    fn reports_true_buffer_ages() {
        let mut double = output(2);
        let ages: Vec<u32> = (0..5).map(|_| cycle(&mut double)).collect();
        assert_eq!(ages, vec![0, 0, 2, 2, 2]);

        let mut triple = output(3);
        let ages: Vec<u32> = (0..5).map(|_| cycle(&mut triple)).collect();
        assert_eq!(ages, vec![0, 0, 0, 3, 3]);

        let mut single = output(1);
        let ages: Vec<u32> = (0..3).map(|_| cycle(&mut single)).collect();
        assert_eq!(ages, vec![0, 1, 1]);
    }

    #[test]
    fn rejected_buffer_becomes_undefined() {
        let mut out = output(1);
        cycle(&mut out);
        out.reject_next_present("mode change");
        out.begin_frame().unwrap();
        assert!(matches!(
            out.present(&Region::new()),
            Err(BackendError::Frame(FrameError::PresentRejected(_)))
        ));
        assert_eq!(out.begin_frame().unwrap().buffer_age, 0);
    }

    #[test]
    fn page_flip_listeners_see_each_presentation() {
        let mut out = output(2);
        let flips = Rc::new(RefCell::new(Vec::new()));
        let sink = flips.clone();
        out.on_page_flip(move |flip| sink.borrow_mut().push(flip.sequence));
        cycle(&mut out);
        out.begin_frame().unwrap();
        out.rollback();
        cycle(&mut out);
        assert_eq!(*flips.borrow(), vec![1, 2]);
    }

    #[test]
    fn page_flip_listeners_survive_moving_the_output() {
        let mut out = output(2);
        let flips = Rc::new(RefCell::new(Vec::new()));
        for tag in 0..3u64 {
            let sink = flips.clone();
            out.on_page_flip(move |flip| sink.borrow_mut().push((tag, flip.output)));
        }
        assert!(out.listeners.iter().all(|l| l.handle() as usize == out.id as usize));

        let mut outputs = vec![out];
        let mut boxed = Box::new(outputs.remove(0));
        cycle(&mut boxed);
        assert_eq!(*flips.borrow(), vec![(0, 1), (1, 1), (2, 1)]);
    }
}
