use alloc::vec::Vec;

use kernel_shared::{
    board::BoardMemoryLayout,
    bugcheck::StopCode,
    config::HeapFill,
    error::{KernelError, KernelResult},
    object::{BlockKind, MultiUseWord, TypeId},
};
use klib::ByteSize;
use pal::{InterruptControl, InterruptState};

use crate::{bug_check, info, verbose};

use self::block::Block;
pub use self::segment::{MemorySegment, SegmentStatistics, SweepResult};
use self::segment::Allocation;

pub(crate) mod block;
#[cfg(target_os = "none")]
pub mod kernel_heap;
mod object_map;
mod segment;

/// The managed heap: a chain of segments, one per board range flagged as heap.
pub struct MemoryManager<'p> {
    interrupts: &'p dyn InterruptControl,
    segments: Vec<MemorySegment>,
    /// Segment that satisfied the last allocation, tried first next time.
    active: usize,
}

impl<'p> MemoryManager<'p> {
    pub fn new(interrupts: &'p dyn InterruptControl) -> Self {
        Self {
            interrupts,
            segments: Vec::new(),
            active: 0,
        }
    }

    /// Registers every heap range of the board as a segment.
    ///
    /// # Safety
    ///
    /// The layout must be truthful: heap ranges are plain RAM that nothing
    /// else uses.
    pub unsafe fn initialize(&mut self, layout: &BoardMemoryLayout) -> KernelResult<()> {
        for range in layout.heap_ranges() {
            self.add_segment(range.address, range.length);
        }
        if self.segments.is_empty() {
            return Err(KernelError::NoHeapSegments);
        }
        info!(
            "Heap: {} segment(s), {} available",
            self.segments.len(),
            ByteSize(self.available_memory())
        );
        Ok(())
    }

    /// # Safety
    ///
    /// As for [`MemoryManager::initialize`].
    pub unsafe fn add_segment(&mut self, address: usize, length: usize) -> bool {
        let _guard = InterruptState::disable(self.interrupts);
        let end = match address.checked_add(length) {
            Some(end) => end,
            None => return false,
        };
        match MemorySegment::new(address..end) {
            Some(segment) => {
                verbose!(
                    "Heap segment {:#010x}..{:#010x}",
                    segment.beginning(),
                    segment.end()
                );
                self.segments.push(segment);
                true
            }
            None => false,
        }
    }

    /// Applies the configured fill to all free memory once the kernel's own
    /// allocations are done.
    pub fn initialization_complete(&mut self, fill: HeapFill) {
        let _guard = InterruptState::disable(self.interrupts);
        let value = match fill {
            HeapFill::None => return,
            HeapFill::Zero => 0,
            HeapFill::Dirty(pattern) => pattern,
        };
        for segment in self.segments.iter() {
            segment.fill_free(value);
        }
    }

    fn allocate_block(&mut self, size: usize, allocation: Allocation) -> Option<usize> {
        let _guard = InterruptState::disable(self.interrupts);
        if let Some(segment) = self.segments.get_mut(self.active) {
            if let Some(address) = segment.allocate(size, allocation) {
                return Some(address);
            }
        }
        let active = self.active;
        for (index, segment) in self.segments.iter_mut().enumerate() {
            if index == active {
                continue;
            }
            if let Some(address) = segment.allocate(size, allocation) {
                self.active = index;
                return Some(address);
            }
        }
        None
    }

    /// Raw bytes, never scanned and never swept. `None` when no segment has room.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        self.allocate_block(size, Allocation::RawBytes)
    }

    pub fn allocate_object(
        &mut self,
        type_id: TypeId,
        size: usize,
        reference_count: usize,
    ) -> Option<usize> {
        self.allocate_block(
            size,
            Allocation::Object {
                type_id,
                reference_count,
            },
        )
    }

    pub fn release(&mut self, address: usize) {
        let _guard = InterruptState::disable(self.interrupts);
        match self.segments.iter_mut().find(|s| s.contains(address)) {
            Some(segment) => segment.release(address),
            None => bug_check!(
                StopCode::HeapCorruption,
                "release of {:#x}, outside the heap",
                address
            ),
        }
    }

    pub fn refers_to_memory(&self, address: usize) -> bool {
        self.segments.iter().any(|s| s.contains(address))
    }

    pub(crate) fn find_block(&self, address: usize) -> Option<Block> {
        self.segments
            .iter()
            .find(|s| s.contains(address))?
            .find_block(address)
    }

    pub(crate) fn block_at(&self, address: usize) -> Option<Block> {
        self.segments
            .iter()
            .find(|s| s.contains(address))?
            .block_at(address)
    }

    /// Start of the object containing `address`, interior pointers included.
    pub fn find_object(&self, address: usize) -> Option<usize> {
        self.find_block(address)
            .filter(|b| b.kind() == Some(BlockKind::Object))
            .map(|b| b.payload())
    }

    /// `address` itself, if an object starts exactly there.
    pub fn object_at(&self, address: usize) -> Option<usize> {
        self.block_at(address)
            .filter(|b| b.kind() == Some(BlockKind::Object))
            .map(|b| b.payload())
    }

    pub fn header(&self, object: usize) -> Option<MultiUseWord> {
        self.block_at(object).map(|b| b.multi_use())
    }

    pub fn type_of(&self, object: usize) -> Option<TypeId> {
        self.object_at(object)?;
        self.block_at(object).map(|b| b.type_id())
    }

    pub fn reference_count(&self, object: usize) -> Option<usize> {
        self.object_at(object)?;
        self.header(object).map(|h| h.reference_count())
    }

    /// Sets the mark bit. True if the object was not marked before.
    pub(crate) fn mark(&self, object: usize) -> bool {
        match self.block_at(object) {
            Some(block) if !block.multi_use().is_marked() => {
                block.set_multi_use(block.multi_use().with_mark(true));
                true
            }
            _ => false,
        }
    }

    pub fn is_marked(&self, object: usize) -> bool {
        self.header(object).map_or(false, |h| h.is_marked())
    }

    pub(crate) fn set_reference_count(&mut self, object: usize, count: usize) {
        if let Some(block) = self.block_at(object) {
            block.set_multi_use(block.multi_use().with_reference_count(count));
        }
    }

    /// Payload size of the block starting at `object`, in words.
    pub fn payload_words(&self, object: usize) -> Option<usize> {
        self.block_at(object).map(|b| b.payload_words())
    }

    pub fn read_payload_word(&self, object: usize, index: usize) -> Option<usize> {
        self.block_at(object)?.payload_word(index)
    }

    pub fn write_payload_word(&self, object: usize, index: usize, value: usize) -> bool {
        match self.block_at(object) {
            Some(block) => block.set_payload_word(index, value),
            None => false,
        }
    }

    pub(crate) fn segments(&self) -> &[MemorySegment] {
        &self.segments
    }

    /// Sweeps every segment, see [`MemorySegment::sweep`].
    pub(crate) fn sweep(&mut self) -> SweepResult {
        let _guard = InterruptState::disable(self.interrupts);
        let mut total = SweepResult::default();
        for segment in self.segments.iter_mut() {
            let result = segment.sweep();
            total.objects_freed += result.objects_freed;
            total.bytes_freed += result.bytes_freed;
            total.objects_kept += result.objects_kept;
        }
        total
    }

    pub fn available_memory(&self) -> usize {
        self.segments.iter().map(|s| s.free_bytes()).sum()
    }

    pub fn allocated_memory(&self) -> usize {
        self.segments.iter().map(|s| s.allocated_bytes()).sum()
    }

    pub fn segment_statistics(&self) -> Vec<SegmentStatistics> {
        self.segments.iter().map(|s| s.statistics()).collect()
    }

    /// Free blocks of every segment as `(header address, bytes)`.
    pub fn free_blocks(&self) -> Vec<(usize, usize)> {
        self.segments.iter().flat_map(|s| s.free_blocks()).collect()
    }
}
