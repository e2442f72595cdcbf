//! Vertex buffers and the per-renderer buffer manager.
//!
//! A [`VertexBuffer`] is written through a `map`/`unmap` pair. Static and
//! dynamic buffers map device memory directly, or go through a CPU staging
//! copy when mapping is unavailable. Streaming buffers either orphan a plain
//! buffer or, when persistent mapping is enabled, sub-allocate from a fenced
//! [`ring`](ring::PersistentRing).

mod index;
mod ring;

pub use index::QuadIndexBuffer;

use crate::config::RenderConfig;
use crate::device::{
    BufferId, BufferTarget, BufferUsageHint, DeviceFeatures, GpuDevice, IndexType, MapAccess,
    PrimitiveMode, VertexAttrib,
};
use crate::error::BufferError;
use crate::geometry::Region;
use bytemuck::{Pod, Zeroable};
use ring::PersistentRing;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Written once, drawn many times.
    Static,
    /// Rewritten every few frames.
    Dynamic,
    /// Rewritten for every draw.
    Stream,
}

impl BufferUsage {
    fn hint(self) -> BufferUsageHint {
        match self {
            BufferUsage::Static => BufferUsageHint::Static,
            BufferUsage::Dynamic => BufferUsageHint::Dynamic,
            BufferUsage::Stream => BufferUsageHint::Stream,
        }
    }
}

/// What to draw with the buffered vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
    /// Groups of four vertices, drawn as two triangles each through the
    /// shared quad index buffer.
    Quads,
}

impl Topology {
    fn primitive(self) -> PrimitiveMode {
        match self {
            Topology::Points => PrimitiveMode::Points,
            Topology::Lines => PrimitiveMode::Lines,
            Topology::LineStrip => PrimitiveMode::LineStrip,
            Topology::Triangles | Topology::Quads => PrimitiveMode::Triangles,
            Topology::TriangleStrip => PrimitiveMode::TriangleStrip,
            Topology::TriangleFan => PrimitiveMode::TriangleFan,
        }
    }
}

/// One float attribute inside an interleaved vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub index: u32,
    pub components: u32,
    pub offset: u32,
}

pub const POSITION_ATTRIBUTE: u32 = 0;
pub const TEXCOORD_ATTRIBUTE: u32 = 1;

/// Interleaved position + texture coordinate vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 2],
    pub texcoord: [f32; 2],
}

impl TexturedVertex {
    pub const STRIDE: u32 = std::mem::size_of::<TexturedVertex>() as u32;

    pub fn layout() -> [VertexAttribute; 2] {
        [
            VertexAttribute {
                index: POSITION_ATTRIBUTE,
                components: 2,
                offset: 0,
            },
            VertexAttribute {
                index: TEXCOORD_ATTRIBUTE,
                components: 2,
                offset: 8,
            },
        ]
    }
}

/// Position-only vertex for solid fills.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct PlainVertex {
    pub position: [f32; 2],
}

impl PlainVertex {
    pub const STRIDE: u32 = std::mem::size_of::<PlainVertex>() as u32;

    pub fn layout() -> [VertexAttribute; 1] {
        [VertexAttribute {
            index: POSITION_ATTRIBUTE,
            components: 2,
            offset: 0,
        }]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapVia {
    Direct,
    Staging,
    Ring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapState {
    Idle,
    Mapped { offset: usize, size: usize, via: MapVia },
}

enum Storage {
    Plain { buffer: BufferId, capacity: usize },
    Persistent(PersistentRing),
}

/// Options for a streaming buffer.
#[derive(Debug, Clone, Copy)]
pub struct StreamingOptions {
    pub persistent: bool,
    pub ring_size: usize,
    pub fence_timeout: Duration,
}

pub struct VertexBuffer {
    device: Rc<dyn GpuDevice>,
    usage: BufferUsage,
    storage: Storage,
    staging: Vec<u8>,
    map_state: MapState,
    stream_cursor: usize,
    base_offset: usize,
    data_size: usize,
    vertex_count: u32,
    attributes: Vec<VertexAttribute>,
    stride: u32,
    quad_indices: Option<Rc<RefCell<QuadIndexBuffer>>>,
}

impl std::fmt::Debug for VertexBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexBuffer")
            .field("usage", &self.usage)
            .field("persistent", &self.is_persistent())
            .field("vertex_count", &self.vertex_count)
            .field("map_state", &self.map_state)
            .finish()
    }
}

impl VertexBuffer {
    pub fn new(device: Rc<dyn GpuDevice>, usage: BufferUsage) -> Result<Self, BufferError> {
        let buffer = device.create_buffer()?;
        Ok(Self::with_storage(
            device,
            usage,
            Storage::Plain { buffer, capacity: 0 },
        ))
    }

    /// A streaming buffer, persistently mapped when `options.persistent` is set
    /// and the ring can be allocated.
    pub fn streaming(device: Rc<dyn GpuDevice>, options: StreamingOptions) -> Result<Self, BufferError> {
        if options.persistent {
            match PersistentRing::new(device.clone(), options.ring_size, options.fence_timeout) {
                Ok(ring) => {
                    return Ok(Self::with_storage(
                        device,
                        BufferUsage::Stream,
                        Storage::Persistent(ring),
                    ))
                }
                Err(e) => warn!(
                    target: "gl",
                    "Persistent streaming buffer unavailable ({}); using synchronous uploads", e
                ),
            }
        }
        Self::new(device, BufferUsage::Stream)
    }

    fn with_storage(device: Rc<dyn GpuDevice>, usage: BufferUsage, storage: Storage) -> Self {
        Self {
            device,
            usage,
            storage,
            staging: Vec::new(),
            map_state: MapState::Idle,
            stream_cursor: 0,
            base_offset: 0,
            data_size: 0,
            vertex_count: 0,
            attributes: Vec::new(),
            stride: 0,
            quad_indices: None,
        }
    }

    /// Shares a quad index buffer instead of growing a private one.
    pub fn set_quad_index_buffer(&mut self, indices: Rc<RefCell<QuadIndexBuffer>>) {
        self.quad_indices = Some(indices);
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.storage, Storage::Persistent(_))
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.map_state, MapState::Mapped { .. })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn set_vertex_count(&mut self, count: u32) {
        self.vertex_count = count;
    }

    /// Byte offset of the vertex data written by the last `unmap`.
    pub fn data_offset(&self) -> usize {
        self.base_offset
    }

    /// Size in bytes of the vertex data written by the last `unmap`.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn buffer(&self) -> BufferId {
        match &self.storage {
            Storage::Plain { buffer, .. } => *buffer,
            Storage::Persistent(ring) => ring.buffer(),
        }
    }

    pub fn ring_capacity(&self) -> Option<usize> {
        match &self.storage {
            Storage::Persistent(ring) => Some(ring.capacity()),
            Storage::Plain { .. } => None,
        }
    }

    pub fn set_attrib_layout(&mut self, attributes: &[VertexAttribute], stride: u32) {
        self.attributes = attributes.to_vec();
        self.stride = stride;
    }

    fn ensure_plain_capacity(&mut self, needed: usize) -> Result<(), BufferError> {
        let Storage::Plain { buffer, capacity } = &mut self.storage else {
            return Ok(());
        };
        let stream = self.usage == BufferUsage::Stream;
        if stream && self.stream_cursor + needed <= *capacity {
            return Ok(());
        }
        if !stream && needed <= *capacity {
            return Ok(());
        }
        // Orphaning: re-specifying the store lets the driver keep the old one
        // alive for draws still in flight.
        let new_capacity = if stream {
            needed.max(*capacity).next_power_of_two()
        } else {
            needed.max(*capacity)
        };
        self.device.bind_buffer(BufferTarget::Array, Some(*buffer));
        self.device
            .buffer_data(BufferTarget::Array, new_capacity, None, self.usage.hint())
            .map_err(BufferError::AllocationFailed)?;
        *capacity = new_capacity;
        self.stream_cursor = 0;
        Ok(())
    }

    fn degrade_to_synchronous(&mut self) -> Result<(), BufferError> {
        let buffer = self.device.create_buffer()?;
        warn!(target: "gl", "Streaming buffer falls back to synchronous uploads");
        self.storage = Storage::Plain { buffer, capacity: 0 };
        self.stream_cursor = 0;
        Ok(())
    }

    /// Returns `size` writable bytes. Must be followed by [`unmap`](Self::unmap)
    /// before the buffer can be mapped or drawn again.
    pub fn map(&mut self, size: usize) -> Result<&mut [u8], BufferError> {
        if self.is_mapped() {
            return Err(BufferError::AlreadyMapped);
        }

        if let Storage::Persistent(ring) = &mut self.storage {
            let reserved = match ring.reserve(size) {
                Err(BufferError::Overflow { .. }) => {
                    let grown = (size * 4).next_power_of_two();
                    match ring.reallocate(grown) {
                        Ok(()) => ring.reserve(size),
                        Err(e) => Err(e),
                    }
                }
                other => other,
            };
            match reserved {
                Ok((offset, ptr)) => {
                    self.map_state = MapState::Mapped {
                        offset,
                        size,
                        via: MapVia::Ring,
                    };
                    // SAFETY: the ring reserved `size` bytes at `ptr` inside its
                    // persistent mapping, which outlives this borrow of `self`.
                    return Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), size) });
                }
                Err(e @ (BufferError::FenceTimeout(_) | BufferError::FenceWaitFailed)) => {
                    return Err(e);
                }
                Err(e) => {
                    error!(target: "gl", "Streaming ring cannot serve {} bytes: {}", size, e);
                    self.degrade_to_synchronous()?;
                }
            }
        }

        self.ensure_plain_capacity(size)?;
        let offset = if self.usage == BufferUsage::Stream {
            self.stream_cursor
        } else {
            0
        };
        let access = match self.usage {
            BufferUsage::Stream => {
                MapAccess::WRITE | MapAccess::INVALIDATE_RANGE | MapAccess::UNSYNCHRONIZED
            }
            BufferUsage::Static | BufferUsage::Dynamic => MapAccess::WRITE | MapAccess::INVALIDATE_BUFFER,
        };

        self.device.bind_buffer(BufferTarget::Array, Some(self.buffer()));
        let direct = if size > 0 && self.device.info().supports(DeviceFeatures::MAP_BUFFER_RANGE) {
            self.device
                .map_buffer_range(BufferTarget::Array, offset, size, access)
        } else {
            None
        };
        match direct {
            Some(ptr) => {
                self.map_state = MapState::Mapped {
                    offset,
                    size,
                    via: MapVia::Direct,
                };
                // SAFETY: the device mapped `size` bytes that stay valid until
                // `unmap`, which requires `&mut self` again.
                Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), size) })
            }
            None => {
                self.staging.clear();
                self.staging.resize(size, 0);
                self.map_state = MapState::Mapped {
                    offset,
                    size,
                    via: MapVia::Staging,
                };
                Ok(&mut self.staging)
            }
        }
    }

    /// Publishes the bytes written since [`map`](Self::map).
    pub fn unmap(&mut self) -> Result<(), BufferError> {
        let MapState::Mapped { offset, size, via } = self.map_state else {
            return Err(BufferError::NotMapped);
        };
        self.map_state = MapState::Idle;
        match via {
            MapVia::Direct => {
                self.device.bind_buffer(BufferTarget::Array, Some(self.buffer()));
                self.device.unmap_buffer(BufferTarget::Array);
            }
            MapVia::Staging => {
                if size > 0 {
                    self.device.bind_buffer(BufferTarget::Array, Some(self.buffer()));
                    self.device
                        .buffer_sub_data(BufferTarget::Array, offset, &self.staging)?;
                }
            }
            MapVia::Ring => {
                if let Storage::Persistent(ring) = &mut self.storage {
                    ring.commit(size);
                }
            }
        }
        if via != MapVia::Ring && self.usage == BufferUsage::Stream {
            self.stream_cursor = offset + ((size + 15) & !15);
        }
        self.base_offset = offset;
        self.data_size = size;
        if self.stride > 0 {
            self.vertex_count = (size / self.stride as usize) as u32;
        }
        Ok(())
    }

    pub fn set_data(&mut self, data: &[u8]) -> Result<(), BufferError> {
        let region = self.map(data.len())?;
        region.copy_from_slice(data);
        self.unmap()
    }

    /// Uploads `vertices` and adopts `T`'s size as the stride.
    pub fn set_vertices<T: Pod>(&mut self, vertices: &[T]) -> Result<(), BufferError> {
        if self.stride == 0 {
            self.stride = std::mem::size_of::<T>() as u32;
        }
        self.set_data(bytemuck::cast_slice(vertices))?;
        self.vertex_count = vertices.len() as u32;
        Ok(())
    }

    fn bind_attributes(&self, first_vertex: u32) {
        self.device.bind_buffer(BufferTarget::Array, Some(self.buffer()));
        let base = self.base_offset + first_vertex as usize * self.stride as usize;
        for attribute in &self.attributes {
            self.device.set_vertex_attrib(&VertexAttrib {
                index: attribute.index,
                components: attribute.components,
                stride: self.stride,
                offset: (base + attribute.offset as usize) as u32,
            });
        }
    }

    fn unbind_attributes(&self) {
        for attribute in &self.attributes {
            self.device.disable_vertex_attrib(attribute.index);
        }
    }

    /// Issues the draw for attributes already bound at the first vertex.
    fn issue(&mut self, topology: Topology, count: u32) -> Result<(), BufferError> {
        if topology == Topology::Quads {
            let quads = (count / 4) as usize;
            if quads == 0 {
                return Ok(());
            }
            let indices = self
                .quad_indices
                .get_or_insert_with(|| Rc::new(RefCell::new(QuadIndexBuffer::new(self.device.clone()))))
                .clone();
            indices.borrow_mut().ensure(quads)?;
            self.device.draw_elements(
                PrimitiveMode::Triangles,
                (quads * 6) as u32,
                IndexType::U32,
                0,
            );
        } else {
            self.device.draw_arrays(topology.primitive(), 0, count);
        }
        Ok(())
    }

    /// Draws `count` vertices starting at `first`.
    pub fn draw(&mut self, topology: Topology, first: u32, count: u32) -> Result<(), BufferError> {
        if self.is_mapped() {
            return Err(BufferError::AlreadyMapped);
        }
        if count == 0 {
            return Ok(());
        }
        self.bind_attributes(first);
        let result = self.issue(topology, count);
        self.unbind_attributes();
        result
    }

    /// Draws every buffered vertex.
    pub fn render(&mut self, topology: Topology) -> Result<(), BufferError> {
        self.draw(topology, 0, self.vertex_count)
    }

    /// Draws every buffered vertex once per rectangle of `clip`, scissored to
    /// it. `clip` is in device framebuffer coordinates.
    pub fn render_clipped(&mut self, topology: Topology, clip: &Region) -> Result<(), BufferError> {
        if self.is_mapped() {
            return Err(BufferError::AlreadyMapped);
        }
        if self.vertex_count == 0 || clip.is_empty() {
            return Ok(());
        }
        self.bind_attributes(0);
        let mut result = Ok(());
        for rect in clip.rects() {
            self.device.set_scissor(Some(*rect));
            result = self.issue(topology, self.vertex_count);
            if result.is_err() {
                break;
            }
        }
        self.device.set_scissor(None);
        self.unbind_attributes();
        result
    }

    pub fn begin_frame(&mut self) {
        if let Storage::Persistent(ring) = &mut self.storage {
            ring.begin_frame();
        }
    }

    /// Fences this frame's streamed data and resizes the ring when the recent
    /// working set calls for it.
    pub fn end_of_frame(&mut self) -> Result<(), BufferError> {
        let Storage::Persistent(ring) = &mut self.storage else {
            return Ok(());
        };
        if let Some(capacity) = ring.end_of_frame()? {
            if let Err(e) = ring.reallocate(capacity) {
                error!(target: "gl", "Failed to grow streaming ring to {} bytes: {}", capacity, e);
                self.degrade_to_synchronous()?;
            }
        }
        Ok(())
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        if self.is_mapped() {
            let _ = self.unmap();
        }
        if let Storage::Plain { buffer, .. } = self.storage {
            self.device.delete_buffer(buffer);
        }
    }
}

/// Owns the shared quad index buffer and the per-renderer streaming buffer.
pub struct BufferManager {
    device: Rc<dyn GpuDevice>,
    quad_indices: Rc<RefCell<QuadIndexBuffer>>,
    streaming: VertexBuffer,
}

impl BufferManager {
    pub fn new(device: Rc<dyn GpuDevice>, config: &RenderConfig) -> Result<Self, BufferError> {
        let supported = device.info().supports(
            DeviceFeatures::BUFFER_STORAGE | DeviceFeatures::MAP_BUFFER_RANGE | DeviceFeatures::SYNC,
        );
        let persistent = match config.persistent_streaming {
            Some(true) if !supported => {
                warn!(target: "gl", "Persistent streaming requested but unsupported by the device");
                false
            }
            Some(forced) => forced,
            None => supported,
        };
        debug!(target: "gl", "Streaming buffer persistent mapping: {}", persistent);

        let quad_indices = Rc::new(RefCell::new(QuadIndexBuffer::new(device.clone())));
        let mut streaming = VertexBuffer::streaming(
            device.clone(),
            StreamingOptions {
                persistent,
                ring_size: config.streaming_ring_size,
                fence_timeout: config.fence_timeout(),
            },
        )?;
        streaming.set_quad_index_buffer(quad_indices.clone());
        Ok(Self {
            device,
            quad_indices,
            streaming,
        })
    }

    pub fn create_vertex_buffer(&self, usage: BufferUsage) -> Result<VertexBuffer, BufferError> {
        let mut buffer = VertexBuffer::new(self.device.clone(), usage)?;
        buffer.set_quad_index_buffer(self.quad_indices.clone());
        Ok(buffer)
    }

    /// The shared streaming buffer for ad-hoc geometry; one writer at a time.
    pub fn streaming_buffer(&mut self) -> &mut VertexBuffer {
        &mut self.streaming
    }

    pub fn quad_index_capacity(&self) -> usize {
        self.quad_indices.borrow().capacity()
    }

    pub fn begin_frame(&mut self) {
        self.streaming.begin_frame();
    }

    pub fn end_of_frame(&mut self) -> Result<(), BufferError> {
        self.streaming.end_of_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::{FenceMode, SoftwareDevice};
    use crate::geometry::Rect;

    fn quad(x: f32, y: f32) -> [PlainVertex; 4] {
        [
            PlainVertex { position: [x, y] },
            PlainVertex { position: [x, y + 1.0] },
            PlainVertex { position: [x + 1.0, y + 1.0] },
            PlainVertex { position: [x + 1.0, y] },
        ]
    }

    #[test]
    fn static_buffer_maps_directly() {
        let device = Rc::new(SoftwareDevice::new());
        let mut vbo = VertexBuffer::new(device.clone(), BufferUsage::Static).unwrap();
        vbo.set_attrib_layout(&PlainVertex::layout(), PlainVertex::STRIDE);
        vbo.set_vertices(&quad(0.0, 0.0)).unwrap();
        assert_eq!(vbo.vertex_count(), 4);
        assert_eq!(device.stats().maps, 1);

        vbo.render(Topology::TriangleFan).unwrap();
        let draws = device.take_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].mode, PrimitiveMode::TriangleFan);
        assert_eq!(draws[0].positions[2], [1.0, 1.0]);
    }

    #[test]
    fn falls_back_to_staging_without_map_support() {
        let device = Rc::new(SoftwareDevice::with_features(
            DeviceFeatures::all() - DeviceFeatures::MAP_BUFFER_RANGE,
        ));
        let mut vbo = VertexBuffer::new(device.clone(), BufferUsage::Dynamic).unwrap();
        vbo.set_attrib_layout(&PlainVertex::layout(), PlainVertex::STRIDE);
        vbo.set_vertices(&quad(2.0, 3.0)).unwrap();
        assert_eq!(device.stats().maps, 0);
        let contents = device.buffer_contents(vbo.buffer()).unwrap();
        let x = f32::from_ne_bytes([contents[0], contents[1], contents[2], contents[3]]);
        let y = f32::from_ne_bytes([contents[4], contents[5], contents[6], contents[7]]);
        assert_eq!((x, y), (2.0, 3.0));
    }

    #[test]
    fn map_and_unmap_must_pair() {
        let device = Rc::new(SoftwareDevice::new());
        let mut vbo = VertexBuffer::new(device, BufferUsage::Dynamic).unwrap();
        assert_eq!(vbo.unmap(), Err(BufferError::NotMapped));
        vbo.map(16).unwrap();
        assert!(matches!(vbo.map(16), Err(BufferError::AlreadyMapped)));
        assert_eq!(vbo.render(Topology::Triangles), Err(BufferError::AlreadyMapped));
        vbo.unmap().unwrap();
    }

    #[test]
    fn quads_expand_to_indexed_triangles() {
        let device = Rc::new(SoftwareDevice::new());
        let config = RenderConfig::default();
        let mut manager = BufferManager::new(device.clone(), &config).unwrap();
        let stream = manager.streaming_buffer();
        stream.set_attrib_layout(&PlainVertex::layout(), PlainVertex::STRIDE);
        let vertices: Vec<PlainVertex> = quad(0.0, 0.0).into_iter().chain(quad(5.0, 5.0)).collect();
        stream.set_vertices(&vertices).unwrap();
        stream.render(Topology::Quads).unwrap();

        let draws = device.take_draws();
        assert_eq!(draws.len(), 1);
        assert!(draws[0].indexed);
        assert_eq!(draws[0].vertex_count, 12);
        assert_eq!(draws[0].positions[6], [5.0, 5.0]);
        assert_eq!(manager.quad_index_capacity(), 1024);
    }

    #[test]
    fn streaming_is_persistent_when_supported() {
        let device = Rc::new(SoftwareDevice::new());
        let manager = BufferManager::new(device.clone(), &RenderConfig::default()).unwrap();
        assert!(manager.streaming.is_persistent());

        let forced_off = RenderConfig {
            persistent_streaming: Some(false),
            ..RenderConfig::default()
        };
        let manager = BufferManager::new(device, &forced_off).unwrap();
        assert!(!manager.streaming.is_persistent());

        let limited = Rc::new(SoftwareDevice::with_features(
            DeviceFeatures::all() - DeviceFeatures::BUFFER_STORAGE,
        ));
        let forced_on = RenderConfig {
            persistent_streaming: Some(true),
            ..RenderConfig::default()
        };
        let manager = BufferManager::new(limited, &forced_on).unwrap();
        assert!(!manager.streaming.is_persistent());
    }

    #[test]
    fn ring_growth_failure_degrades_to_synchronous_path() {
        let device = Rc::new(SoftwareDevice::new());
        let config = RenderConfig {
            streaming_ring_size: 256,
            ..RenderConfig::default()
        };
        let mut manager = BufferManager::new(device.clone(), &config).unwrap();
        manager.begin_frame();
        manager.streaming_buffer().set_data(&[0u8; 200]).unwrap();
        device.set_fail_buffer_storage(true);
        manager.end_of_frame().unwrap();
        assert!(!manager.streaming.is_persistent());

        manager.begin_frame();
        manager.streaming_buffer().set_data(&[7u8; 64]).unwrap();
        manager.end_of_frame().unwrap();
    }

    #[test]
    fn fence_timeout_fails_the_map() {
        let device = Rc::new(SoftwareDevice::new());
        device.set_fence_mode(FenceMode::Manual);
        let config = RenderConfig {
            streaming_ring_size: 256,
            fence_timeout_ms: 1,
            ..RenderConfig::default()
        };
        let mut manager = BufferManager::new(device.clone(), &config).unwrap();
        let stream = manager.streaming_buffer();
        stream.set_data(&[1u8; 200]).unwrap();
        assert!(matches!(stream.map(200), Err(BufferError::FenceTimeout(_))));
        assert!(!stream.is_mapped());

        device.signal_all_fences();
        assert!(stream.map(200).is_ok());
        stream.unmap().unwrap();
    }

    #[test]
    fn clipped_render_scissors_every_rect() {
        let device = Rc::new(SoftwareDevice::new());
        let mut vbo = VertexBuffer::new(device.clone(), BufferUsage::Static).unwrap();
        vbo.set_attrib_layout(&PlainVertex::layout(), PlainVertex::STRIDE);
        vbo.set_vertices(&quad(0.0, 0.0)).unwrap();
        let clip = Region::from_rects([Rect::new(0, 0, 4, 4), Rect::new(10, 10, 2, 2)]);
        vbo.render_clipped(Topology::TriangleFan, &clip).unwrap();
        let scissors: Vec<_> = device.take_draws().into_iter().map(|d| d.scissor).collect();
        assert_eq!(scissors, vec![Some(Rect::new(0, 0, 4, 4)), Some(Rect::new(10, 10, 2, 2))]);
    }
}
