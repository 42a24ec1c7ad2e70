//! Linear sub-allocation out of one contiguous block of device memory.
//!
//! Reclaim policy: a bump allocator with tail reclaim. Freeing an allocation removes it
//! from the live set and moves the offset back to the end of the highest allocation that
//! is still alive, so LIFO-ordered lifetimes (staging buffers, per-swapchain resources)
//! recycle their space and an empty heap starts again at offset 0. Holes below a live
//! allocation are reused only after everything above them has been freed.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::Error;
use crate::memory::{align_up, MemoryProperties, MemoryRequirements, MemoryType, MemoryTypeTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapRange {
    pub offset: u64,
    pub size: u64,
}

impl HeapRange {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// CPU-side bookkeeping of a heap: the bump offset and the live ranges keyed by offset.
#[derive(Debug)]
pub struct LinearAllocator {
    capacity: u64,
    current_offset: u64,
    live: BTreeMap<u64, u64>,
}

impl LinearAllocator {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            current_offset: 0,
            live: BTreeMap::new(),
        }
    }

    /// Reserves `size` bytes at the next multiple of `alignment`. Leaves the allocator
    /// untouched and returns `None` when the range would not fit.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<HeapRange> {
        let offset = align_up(self.current_offset, alignment)?;
        let end = offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }

        self.current_offset = end;
        self.live.insert(offset, end);

        Some(HeapRange { offset, size })
    }

    /// Returns `false` if no live allocation starts at `offset`.
    pub fn release(&mut self, offset: u64) -> bool {
        if self.live.remove(&offset).is_none() {
            return false;
        }

        self.current_offset = match self.live.values().next_back() {
            Some(end) => *end,
            None => 0,
        };

        true
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn live_ranges(&self) -> impl Iterator<Item = HeapRange> + '_ {
        self.live.iter().map(|(offset, end)| HeapRange {
            offset: *offset,
            size: end - offset,
        })
    }
}

struct HeapShared {
    label: String,
    memory_type: MemoryType,
    memory: Option<Rc<wgpu::Buffer>>,
    allocator: RefCell<LinearAllocator>,
}

impl Drop for HeapShared {
    fn drop(&mut self) {
        log::debug!(
            "Releasing device memory heap {} ({} bytes)",
            self.label,
            self.allocator.borrow().capacity()
        );
    }
}

/// One device memory allocation that hands out aligned, non-overlapping ranges.
///
/// Buffer heaps are backed by a single `wgpu::Buffer` whose usage comes from the heap's
/// memory type. Image heaps are budget-only: the driver places textures itself, and the
/// heap bounds how much texture memory may be live at once.
pub struct MemoryHeap {
    shared: Rc<HeapShared>,
}

impl MemoryHeap {
    pub fn create(
        device: &wgpu::Device,
        memory_types: &MemoryTypeTable,
        label: &str,
        size: u64,
        properties: MemoryProperties,
    ) -> Result<Self, Error> {
        let memory_type = memory_types.find(properties)?;

        if size == 0 || size > device.limits().max_buffer_size {
            return Err(Error::AllocationFailed {
                size,
                reason: format!(
                    "the size must be between 1 and {} bytes",
                    device.limits().max_buffer_size
                ),
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let gpu_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: memory_type.buffer_usage,
            mapped_at_creation: false,
        });

        let validation_error = pollster::block_on(device.pop_error_scope());
        let out_of_memory_error = pollster::block_on(device.pop_error_scope());

        if let Some(error) = out_of_memory_error.or(validation_error) {
            return Err(Error::AllocationFailed {
                size,
                reason: error.to_string(),
            });
        }

        log::debug!(
            "Created device memory heap {label}: {size} bytes, memory type {} ({:?})",
            memory_type.index,
            memory_type.properties
        );

        Ok(Self::from_parts(label, size, memory_type, Some(Rc::new(gpu_buffer))))
    }

    pub fn budget(
        memory_types: &MemoryTypeTable,
        label: &str,
        size: u64,
        properties: MemoryProperties,
    ) -> Result<Self, Error> {
        let memory_type = memory_types.find(properties)?;

        log::debug!(
            "Created image memory budget {label}: {size} bytes, memory type {}",
            memory_type.index
        );

        Ok(Self::from_parts(label, size, memory_type, None))
    }

    fn from_parts(
        label: &str,
        size: u64,
        memory_type: MemoryType,
        memory: Option<Rc<wgpu::Buffer>>,
    ) -> Self {
        Self {
            shared: Rc::new(HeapShared {
                label: label.to_string(),
                memory_type,
                memory,
                allocator: RefCell::new(LinearAllocator::new(size)),
            }),
        }
    }

    pub fn alloc(&self, requirements: &MemoryRequirements) -> Result<Allocation, Error> {
        let memory_type = self.shared.memory_type;
        if requirements.type_bits & memory_type.type_bit() == 0 {
            return Err(Error::TypeMismatch {
                heap: self.shared.label.clone(),
                memory_type: memory_type.index,
                type_bits: requirements.type_bits,
            });
        }

        let mut allocator = self.shared.allocator.borrow_mut();
        let range = match allocator.allocate(requirements.size, requirements.alignment) {
            Some(range) => range,
            None => {
                return Err(Error::HeapExhausted {
                    heap: self.shared.label.clone(),
                    requested: requirements.size,
                    offset: align_up(allocator.current_offset(), requirements.alignment)
                        .unwrap_or(u64::MAX),
                    capacity: allocator.capacity(),
                })
            }
        };

        log::trace!(
            "Heap {}: reserved [{}, {})",
            self.shared.label,
            range.offset,
            range.end()
        );

        Ok(Allocation {
            heap: self.shared.clone(),
            range,
        })
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn memory_type(&self) -> MemoryType {
        self.shared.memory_type
    }

    pub fn size(&self) -> u64 {
        self.shared.allocator.borrow().capacity()
    }

    pub fn current_offset(&self) -> u64 {
        self.shared.allocator.borrow().current_offset()
    }

    pub fn live_allocations(&self) -> usize {
        self.shared.allocator.borrow().live_allocations()
    }
}

/// A reserved range inside a [`MemoryHeap`]. Dropping it hands the range back to the heap.
pub struct Allocation {
    heap: Rc<HeapShared>,
    range: HeapRange,
}

impl Allocation {
    pub fn offset(&self) -> u64 {
        self.range.offset
    }

    pub fn size(&self) -> u64 {
        self.range.size
    }

    pub fn properties(&self) -> MemoryProperties {
        self.heap.memory_type.properties
    }

    pub fn memory_type_index(&self) -> u32 {
        self.heap.memory_type.index
    }

    pub fn heap_label(&self) -> &str {
        &self.heap.label
    }

    pub(crate) fn memory(&self) -> Option<&Rc<wgpu::Buffer>> {
        self.heap.memory.as_ref()
    }
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("heap", &self.heap.label)
            .field("offset", &self.range.offset)
            .field("size", &self.range.size)
            .finish()
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if !self.heap.allocator.borrow_mut().release(self.range.offset) {
            log::warn!(
                "Heap {}: no live allocation at offset {}",
                self.heap.label,
                self.range.offset
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn device_local_heap(size: u64) -> MemoryHeap {
        MemoryHeap::budget(
            &MemoryTypeTable::standard(),
            "TEST_HEAP",
            size,
            MemoryProperties::DEVICE_LOCAL,
        )
        .unwrap()
    }

    fn requirements(size: u64, alignment: u64) -> MemoryRequirements {
        MemoryRequirements {
            size,
            alignment,
            type_bits: 0b1,
        }
    }

    fn overlaps(a: HeapRange, b: HeapRange) -> bool {
        a.offset < b.end() && b.offset < a.end()
    }

    #[test]
    fn aligned_allocations_until_exhaustion() {
        let heap = device_local_heap(1024);

        let first = heap.alloc(&requirements(100, 256)).unwrap();
        assert_eq!(first.offset(), 0);

        let second = heap.alloc(&requirements(500, 256)).unwrap();
        assert_eq!(second.offset(), 256);

        let offset_before = heap.current_offset();
        match heap.alloc(&requirements(300, 256)) {
            Err(Error::HeapExhausted {
                requested,
                offset,
                capacity,
                ..
            }) => {
                assert_eq!(requested, 300);
                assert_eq!(offset, 768);
                assert_eq!(capacity, 1024);
            }
            other => panic!("expected HeapExhausted, got {other:?}"),
        }
        assert_eq!(heap.current_offset(), offset_before);
        assert_eq!(heap.live_allocations(), 2);
    }

    #[test]
    fn allocation_exactly_filling_the_heap_succeeds() {
        let heap = device_local_heap(1024);
        let whole = heap.alloc(&requirements(1024, 256)).unwrap();
        assert_eq!(whole.offset(), 0);
        assert_eq!(heap.current_offset(), 1024);
        assert!(heap.alloc(&requirements(1, 1)).is_err());
    }

    #[test]
    fn excluded_memory_type_is_rejected() {
        let heap = device_local_heap(1024);
        let request = MemoryRequirements {
            size: 16,
            alignment: 16,
            type_bits: 0b110,
        };

        match heap.alloc(&request) {
            Err(Error::TypeMismatch {
                memory_type,
                type_bits,
                ..
            }) => {
                assert_eq!(memory_type, 0);
                assert_eq!(type_bits, 0b110);
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
        assert_eq!(heap.current_offset(), 0);
    }

    #[test]
    fn budget_heap_reports_missing_memory_type() {
        let result = MemoryHeap::budget(
            &MemoryTypeTable::standard(),
            "TEST_HEAP",
            64,
            MemoryProperties::DEVICE_LOCAL | MemoryProperties::HOST_CACHED,
        );
        assert!(matches!(result, Err(Error::OutOfMemoryType(_))));
    }

    #[test]
    fn freeing_the_top_allocation_rewinds_the_heap() {
        let heap = device_local_heap(1024);
        let bottom = heap.alloc(&requirements(100, 4)).unwrap();
        let top = heap.alloc(&requirements(200, 256)).unwrap();
        assert_eq!(heap.current_offset(), 456);

        drop(top);
        assert_eq!(heap.current_offset(), bottom.offset() + bottom.size());

        let again = heap.alloc(&requirements(200, 256)).unwrap();
        assert_eq!(again.offset(), 256);
    }

    #[test]
    fn freeing_below_a_live_allocation_leaves_a_hole() {
        let heap = device_local_heap(1024);
        let bottom = heap.alloc(&requirements(128, 4)).unwrap();
        let top = heap.alloc(&requirements(128, 4)).unwrap();

        drop(bottom);
        assert_eq!(heap.current_offset(), 256);
        assert_eq!(heap.live_allocations(), 1);

        drop(top);
        assert_eq!(heap.current_offset(), 0);
        assert_eq!(heap.live_allocations(), 0);
    }

    #[test]
    fn allocation_keeps_its_heap_alive() {
        let heap = device_local_heap(256);
        let allocation = heap.alloc(&requirements(64, 64)).unwrap();
        drop(heap);

        assert_eq!(allocation.heap_label(), "TEST_HEAP");
        assert_eq!(allocation.properties(), MemoryProperties::DEVICE_LOCAL);
        assert_eq!(allocation.memory_type_index(), 0);
        assert!(allocation.memory().is_none());
    }

    #[test]
    fn releasing_an_unknown_offset_is_refused() {
        let mut allocator = LinearAllocator::new(64);
        let range = allocator.allocate(16, 16).unwrap();
        assert!(!allocator.release(range.offset + 1));
        assert!(allocator.release(range.offset));
        assert!(!allocator.release(range.offset));
    }

    #[test]
    fn random_sequences_hold_alignment_capacity_and_overlap_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..64 {
            let capacity = rng.gen_range(256..16_384);
            let mut allocator = LinearAllocator::new(capacity);
            let mut live: Vec<HeapRange> = Vec::new();

            for _ in 0..200 {
                if !live.is_empty() && rng.gen_bool(0.3) {
                    let index = rng.gen_range(0..live.len());
                    let range = live.swap_remove(index);
                    assert!(allocator.release(range.offset));
                    continue;
                }

                let size = rng.gen_range(1..1024);
                let alignment = match rng.gen_range(0..3) {
                    0 => 1 << rng.gen_range(0..10),
                    1 => rng.gen_range(1..300),
                    _ => 256,
                };

                let offset_before = allocator.current_offset();
                match allocator.allocate(size, alignment) {
                    Some(range) => {
                        assert_eq!(range.offset % alignment, 0);
                        assert!(range.end() <= capacity);
                        for other in live.iter() {
                            assert!(!overlaps(range, *other));
                        }
                        live.push(range);
                    }
                    None => {
                        let aligned = align_up(offset_before, alignment).unwrap();
                        assert!(aligned + size > capacity);
                        assert_eq!(allocator.current_offset(), offset_before);
                    }
                }

                assert!(allocator.current_offset() <= capacity);
                assert_eq!(allocator.live_allocations(), live.len());
            }

            let highest_end = live.iter().map(HeapRange::end).max().unwrap_or(0);
            assert_eq!(allocator.current_offset(), highest_end);
            assert_eq!(allocator.live_ranges().count(), live.len());
        }
    }
}
