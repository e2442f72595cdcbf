//! Persistently mapped streaming ring guarded by GPU fences.
//!
//! Positions are tracked as absolute stream offsets `lap * capacity + cursor`.
//! A wrap skips the unused tail and starts the next lap at offset zero, so the
//! bytes a new reservation overwrites were written exactly one lap earlier.
//! Each fence records the absolute offset of everything written before it; a
//! reservation may only proceed once a fence covering the overwritten range
//! has signaled.

use crate::device::{
    BufferId, BufferTarget, FenceId, GpuDevice, MapAccess, StorageFlags, WaitStatus,
};
use crate::error::BufferError;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error, trace};

const ALIGNMENT: usize = 16;
const FRAME_HISTORY: usize = 4;

#[derive(Debug, Clone, Copy)]
struct RingFence {
    fence: FenceId,
    end: u64,
}

pub(crate) struct PersistentRing {
    device: Rc<dyn GpuDevice>,
    buffer: BufferId,
    ptr: NonNull<u8>,
    capacity: usize,
    cursor: usize,
    lap: u64,
    consumed: u64,
    fences: VecDeque<RingFence>,
    frame_bytes: usize,
    frame_history: VecDeque<usize>,
    timeout: Duration,
}

fn align_up(value: usize) -> usize {
    (value + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

fn allocate(device: &dyn GpuDevice, capacity: usize) -> Result<(BufferId, NonNull<u8>), BufferError> {
    let buffer = device.create_buffer()?;
    device.bind_buffer(BufferTarget::Array, Some(buffer));
    if let Err(e) = device.buffer_storage(
        BufferTarget::Array,
        capacity,
        StorageFlags::MAP_WRITE | StorageFlags::PERSISTENT | StorageFlags::COHERENT,
    ) {
        device.delete_buffer(buffer);
        return Err(BufferError::AllocationFailed(e));
    }
    let access = MapAccess::WRITE | MapAccess::PERSISTENT | MapAccess::COHERENT;
    match device.map_buffer_range(BufferTarget::Array, 0, capacity, access) {
        Some(ptr) => Ok((buffer, ptr)),
        None => {
            device.delete_buffer(buffer);
            Err(BufferError::MapFailed)
        }
    }
}

impl PersistentRing {
    pub fn new(
        device: Rc<dyn GpuDevice>,
        capacity: usize,
        timeout: Duration,
    ) -> Result<Self, BufferError> {
        let capacity = align_up(capacity.max(ALIGNMENT));
        let (buffer, ptr) = allocate(device.as_ref(), capacity)?;
        debug!(target: "gl", "Persistent streaming ring of {} bytes mapped", capacity);
        Ok(Self {
            device,
            buffer,
            ptr,
            capacity,
            cursor: 0,
            lap: 0,
            consumed: 0,
            fences: VecDeque::new(),
            frame_bytes: 0,
            frame_history: VecDeque::with_capacity(FRAME_HISTORY),
            timeout,
        })
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pending_fences(&self) -> usize {
        self.fences.len()
    }

    fn position(&self) -> u64 {
        self.lap * self.capacity as u64 + self.cursor as u64
    }

    fn insert_fence(&mut self) -> Result<(), BufferError> {
        let end = self.position();
        if self.fences.back().is_some_and(|f| f.end == end) {
            return Ok(());
        }
        let fence = self.device.fence_sync()?;
        trace!(target: "gl", "Ring fence {} covers stream offset {}", fence, end);
        self.fences.push_back(RingFence { fence, end });
        Ok(())
    }

    fn retire(&mut self, fence: RingFence) {
        self.device.delete_fence(fence.fence);
        self.fences.pop_front();
        self.consumed = self.consumed.max(fence.end);
    }

    /// Drops fences the GPU already passed without blocking.
    fn retire_signaled(&mut self) {
        while let Some(front) = self.fences.front().copied() {
            if !self.device.fence_signaled(front.fence) {
                break;
            }
            self.retire(front);
        }
    }

    /// Blocks until everything before absolute offset `needed` was consumed.
    fn wait_until_consumed(&mut self, needed: u64) -> Result<(), BufferError> {
        self.retire_signaled();
        while needed > self.consumed {
            let Some(front) = self.fences.front().copied() else {
                self.insert_fence()?;
                continue;
            };
            match self.device.client_wait(front.fence, self.timeout) {
                WaitStatus::AlreadySignaled | WaitStatus::ConditionSatisfied => self.retire(front),
                WaitStatus::TimeoutExpired => {
                    error!(
                        target: "gl",
                        "GPU did not release streaming ring space within {:?}; assuming a GPU hang",
                        self.timeout
                    );
                    return Err(BufferError::FenceTimeout(self.timeout));
                }
                WaitStatus::Failed => {
                    error!(target: "gl", "Waiting on streaming ring fence {} failed", front.fence);
                    return Err(BufferError::FenceWaitFailed);
                }
            }
        }
        Ok(())
    }

    /// Reserves `size` writable bytes and returns their offset and address.
    ///
    /// The region stays reserved until [`commit`](Self::commit).
    pub fn reserve(&mut self, size: usize) -> Result<(usize, NonNull<u8>), BufferError> {
        if size > self.capacity {
            return Err(BufferError::Overflow { requested: size });
        }
        if self.cursor + size > self.capacity {
            self.insert_fence()?;
            self.lap += 1;
            self.cursor = 0;
        }
        let end = self.position() + size as u64;
        let needed = end.saturating_sub(self.capacity as u64);
        self.wait_until_consumed(needed)?;

        // SAFETY: cursor + size <= capacity and the mapping spans the whole
        // buffer for as long as `self` lives.
        let ptr = unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(self.cursor)) };
        Ok((self.cursor, ptr))
    }

    /// Marks `size` bytes at the cursor as written.
    pub fn commit(&mut self, size: usize) {
        let advance = align_up(size).min(self.capacity - self.cursor);
        self.cursor += advance;
        self.frame_bytes += size;
    }

    pub fn begin_frame(&mut self) {
        self.frame_bytes = 0;
        self.retire_signaled();
    }

    /// Fences the frame's writes and returns a new capacity when the recent
    /// working set outgrew half the ring.
    pub fn end_of_frame(&mut self) -> Result<Option<usize>, BufferError> {
        if self.frame_bytes > 0 {
            self.insert_fence()?;
        }
        if self.frame_history.len() == FRAME_HISTORY {
            self.frame_history.pop_front();
        }
        self.frame_history.push_back(self.frame_bytes);
        self.frame_bytes = 0;

        let average = self.frame_history.iter().sum::<usize>() / self.frame_history.len();
        if average * 2 > self.capacity {
            return Ok(Some((average * 4).next_power_of_two()));
        }
        Ok(None)
    }

    /// Replaces the ring with a fresh allocation of `capacity` bytes.
    ///
    /// On failure the current ring is left untouched.
    pub fn reallocate(&mut self, capacity: usize) -> Result<(), BufferError> {
        let capacity = align_up(capacity.max(ALIGNMENT));
        let (buffer, ptr) = allocate(self.device.as_ref(), capacity)?;
        self.release();
        debug!(
            target: "gl",
            "Streaming ring reallocated from {} to {} bytes",
            self.capacity, capacity
        );
        self.buffer = buffer;
        self.ptr = ptr;
        self.capacity = capacity;
        self.cursor = 0;
        self.lap = 0;
        self.consumed = 0;
        self.frame_history.clear();
        Ok(())
    }

    fn release(&mut self) {
        for fence in self.fences.drain(..) {
            self.device.delete_fence(fence.fence);
        }
        self.device.bind_buffer(BufferTarget::Array, Some(self.buffer));
        self.device.unmap_buffer(BufferTarget::Array);
        self.device.bind_buffer(BufferTarget::Array, None);
        self.device.delete_buffer(self.buffer);
    }
}

impl Drop for PersistentRing {
    fn drop(&mut self) {
        self.release();
    }
}
