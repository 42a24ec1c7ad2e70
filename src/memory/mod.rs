//! Device memory vocabulary shared by the heaps and the resource factory.
//!
//! `wgpu` hides the driver's memory types, so the renderer describes its own small table
//! of memory types. Each type pairs a set of property flags with the buffer usages a heap
//! of that type is created with; resource requirements are matched against the table the
//! same way a Vulkan renderer matches `memoryTypeBits` against the physical device.

pub mod heap;

use crate::error::Error;

pub use heap::{Allocation, MemoryHeap};

/// Row pitch alignment for buffer/texture copies, also used as the image placement alignment.
pub const IMAGE_ALIGNMENT: u64 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
        const HOST_CACHED = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryType {
    pub index: u32,
    pub properties: MemoryProperties,
    pub buffer_usage: wgpu::BufferUsages,
}

impl MemoryType {
    pub fn type_bit(&self) -> u32 {
        1 << self.index
    }

    pub fn is_host_visible(&self) -> bool {
        self.properties.contains(MemoryProperties::HOST_VISIBLE)
    }
}

#[derive(Clone, Debug)]
pub struct MemoryTypeTable {
    types: Vec<MemoryType>,
}

impl MemoryTypeTable {
    pub fn standard() -> Self {
        Self {
            types: vec![
                MemoryType {
                    index: 0,
                    properties: MemoryProperties::DEVICE_LOCAL,
                    buffer_usage: wgpu::BufferUsages::VERTEX
                        | wgpu::BufferUsages::INDEX
                        | wgpu::BufferUsages::UNIFORM
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                },
                MemoryType {
                    index: 1,
                    properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
                    buffer_usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                },
                MemoryType {
                    index: 2,
                    properties: MemoryProperties::HOST_VISIBLE
                        | MemoryProperties::HOST_COHERENT
                        | MemoryProperties::HOST_CACHED,
                    buffer_usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                },
            ],
        }
    }

    /// Lowest-indexed memory type whose properties include every requested flag.
    pub fn find(&self, properties: MemoryProperties) -> Result<MemoryType, Error> {
        self.types
            .iter()
            .find(|memory_type| memory_type.properties.contains(properties))
            .copied()
            .ok_or(Error::OutOfMemoryType(properties))
    }

    pub fn types(&self) -> &[MemoryType] {
        &self.types
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    pub type_bits: u32,
}

impl MemoryRequirements {
    pub fn for_buffer(
        size: u64,
        usage: wgpu::BufferUsages,
        memory_types: &MemoryTypeTable,
        limits: &wgpu::Limits,
    ) -> Result<Self, Error> {
        let mut alignment = wgpu::COPY_BUFFER_ALIGNMENT;
        if usage.intersects(wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::MAP_WRITE) {
            alignment = alignment.max(wgpu::MAP_ALIGNMENT);
        }
        if usage.contains(wgpu::BufferUsages::UNIFORM) {
            alignment = alignment.max(limits.min_uniform_buffer_offset_alignment as u64);
        }

        let size = align_up(size.max(1), wgpu::COPY_BUFFER_ALIGNMENT).ok_or_else(|| {
            Error::AllocationFailed {
                size,
                reason: String::from("size overflows the address space"),
            }
        })?;

        let type_bits = memory_types
            .types()
            .iter()
            .filter(|memory_type| memory_type.buffer_usage.contains(usage))
            .fold(0, |bits, memory_type| bits | memory_type.type_bit());

        Ok(Self {
            size,
            alignment,
            type_bits,
        })
    }

    pub fn for_image(
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        memory_types: &MemoryTypeTable,
    ) -> Result<Self, Error> {
        let texel_size = format.block_copy_size(None).ok_or_else(|| {
            Error::new(format!(
                "The texture format {format:?} has no single-aspect texel size"
            ))
        })?;

        let size = width as u64 * height as u64 * texel_size as u64;

        let type_bits = memory_types
            .types()
            .iter()
            .filter(|memory_type| {
                memory_type
                    .properties
                    .contains(MemoryProperties::DEVICE_LOCAL)
            })
            .fold(0, |bits, memory_type| bits | memory_type.type_bit());

        Ok(Self {
            size: align_up(size.max(1), wgpu::COPY_BUFFER_ALIGNMENT).unwrap_or(u64::MAX),
            alignment: IMAGE_ALIGNMENT,
            type_bits,
        })
    }
}

/// Rounds `value` up to the next multiple of `alignment`. An alignment of 0 is treated as 1.
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    let alignment = alignment.max(1);
    match value % alignment {
        0 => Some(value),
        remainder => value.checked_add(alignment - remainder),
    }
}
