//! Shared index buffer expanding quads into indexed triangles.

use crate::device::{BufferId, BufferTarget, BufferUsageHint, DeviceFeatures, GpuDevice};
use crate::error::BufferError;
use std::rc::Rc;
use tracing::debug;

const MIN_QUADS: usize = 1024;
const INDICES_PER_QUAD: usize = 6;
const INDEX_SIZE: usize = std::mem::size_of::<u32>();

/// Indices `[0, 1, 2, 2, 3, 0]` shifted for every quad.
///
/// Grows by doubling through a GPU-side copy of the existing indices and
/// never shrinks.
pub struct QuadIndexBuffer {
    device: Rc<dyn GpuDevice>,
    buffer: Option<BufferId>,
    quads: usize,
}

impl QuadIndexBuffer {
    pub fn new(device: Rc<dyn GpuDevice>) -> Self {
        Self {
            device,
            buffer: None,
            quads: 0,
        }
    }

    /// Number of quads the current allocation can index.
    pub fn capacity(&self) -> usize {
        self.quads
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    fn indices_for(range: std::ops::Range<usize>) -> Vec<u32> {
        let mut indices = Vec::with_capacity(range.len() * INDICES_PER_QUAD);
        for quad in range {
            let base = (quad * 4) as u32;
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        indices
    }

    /// Makes sure at least `quads` quads can be drawn and leaves the buffer
    /// bound as the element array.
    pub fn ensure(&mut self, quads: usize) -> Result<BufferId, BufferError> {
        if let Some(buffer) = self.buffer.filter(|_| quads <= self.quads) {
            self.device.bind_buffer(BufferTarget::ElementArray, Some(buffer));
            return Ok(buffer);
        }

        let mut capacity = self.quads.max(MIN_QUADS);
        while capacity < quads {
            capacity *= 2;
        }
        let device = &self.device;
        let new_buffer = device.create_buffer()?;
        device.bind_buffer(BufferTarget::ElementArray, Some(new_buffer));
        let bytes = capacity * INDICES_PER_QUAD * INDEX_SIZE;
        if let Err(e) = device.buffer_data(BufferTarget::ElementArray, bytes, None, BufferUsageHint::Static) {
            device.delete_buffer(new_buffer);
            return Err(BufferError::AllocationFailed(e));
        }

        let copied = match self.buffer {
            Some(old) if device.info().supports(DeviceFeatures::COPY_BUFFER) => {
                device.bind_buffer(BufferTarget::CopyRead, Some(old));
                device.bind_buffer(BufferTarget::CopyWrite, Some(new_buffer));
                let result = device.copy_buffer_sub_data(
                    BufferTarget::CopyRead,
                    BufferTarget::CopyWrite,
                    0,
                    0,
                    self.quads * INDICES_PER_QUAD * INDEX_SIZE,
                );
                device.bind_buffer(BufferTarget::CopyRead, None);
                device.bind_buffer(BufferTarget::CopyWrite, None);
                if result.is_ok() {
                    self.quads
                } else {
                    0
                }
            }
            _ => 0,
        };

        let fresh = Self::indices_for(copied..capacity);
        let offset = copied * INDICES_PER_QUAD * INDEX_SIZE;
        if let Err(e) = device.buffer_sub_data(
            BufferTarget::ElementArray,
            offset,
            bytemuck::cast_slice(&fresh),
        ) {
            device.delete_buffer(new_buffer);
            return Err(BufferError::Device(e));
        }

        if let Some(old) = self.buffer.replace(new_buffer) {
            device.delete_buffer(old);
        }
        debug!(
            target: "gl",
            "Quad index buffer grown from {} to {} quads ({} copied)",
            self.quads, capacity, copied
        );
        self.quads = capacity;
        Ok(new_buffer)
    }
}

impl Drop for QuadIndexBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.device.delete_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;

    fn decode(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn grows_by_doubling_and_preserves_contents() {
        let device = Rc::new(SoftwareDevice::new());
        let mut indices = QuadIndexBuffer::new(device.clone());
        let first = indices.ensure(10).unwrap();
        assert_eq!(indices.capacity(), MIN_QUADS);
        assert_eq!(indices.ensure(MIN_QUADS).unwrap(), first);

        let second = indices.ensure(MIN_QUADS + 1).unwrap();
        assert_ne!(first, second);
        assert_eq!(indices.capacity(), 2 * MIN_QUADS);
        assert!(!device.buffer_exists(first));
        assert_eq!(device.stats().buffer_copies, 1);

        let contents = decode(&device.buffer_contents(second).unwrap());
        assert_eq!(contents.len(), 2 * MIN_QUADS * INDICES_PER_QUAD);
        assert_eq!(&contents[..6], &[0, 1, 2, 2, 3, 0]);
        let last = (2 * MIN_QUADS - 1) as u32 * 4;
        assert_eq!(&contents[contents.len() - 6..], &[last, last + 1, last + 2, last + 2, last + 3, last]);
    }

    #[test]
    fn never_shrinks() {
        let device = Rc::new(SoftwareDevice::new());
        let mut indices = QuadIndexBuffer::new(device);
        indices.ensure(5000).unwrap();
        let capacity = indices.capacity();
        assert!(capacity >= 5000);
        indices.ensure(1).unwrap();
        assert_eq!(indices.capacity(), capacity);
    }

    #[test]
    fn rewrites_everything_without_buffer_copies() {
        let device = Rc::new(SoftwareDevice::with_features(
            DeviceFeatures::all() - DeviceFeatures::COPY_BUFFER,
        ));
        let mut indices = QuadIndexBuffer::new(device.clone());
        indices.ensure(1).unwrap();
        let buffer = indices.ensure(MIN_QUADS * 3).unwrap();
        assert_eq!(indices.capacity(), MIN_QUADS * 4);
        assert_eq!(device.stats().buffer_copies, 0);
        let contents = decode(&device.buffer_contents(buffer).unwrap());
        assert_eq!(&contents[6..12], &[4, 5, 6, 6, 7, 4]);
    }
}
