use alloc::vec::Vec;
use core::ops::Range;

use kernel_shared::{
    bugcheck::StopCode,
    constants::{ARCH_WORD_SIZE, OBJECT_HEADER_WORDS},
    object::{BlockKind, TypeId},
};

use super::{block::Block, object_map::ObjectStartMap};
use crate::bug_check;

/// Smallest block that can exist on its own, a bare header.
const MIN_BLOCK_WORDS: usize = OBJECT_HEADER_WORDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Allocation {
    Object {
        type_id: TypeId,
        reference_count: usize,
    },
    RawBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentStatistics {
    pub beginning: usize,
    pub end: usize,
    pub free_bytes: usize,
    pub free_blocks: usize,
    pub largest_free_block: usize,
    pub objects: usize,
    pub raw_blocks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepResult {
    pub objects_freed: usize,
    pub bytes_freed: usize,
    pub objects_kept: usize,
}

/// A contiguous heap range, tiled exactly by blocks.
///
/// Free blocks form an address ordered singly linked list threaded through
/// header word 2.
#[derive(Debug)]
pub struct MemorySegment {
    beginning: usize,
    end: usize,
    free_head: Option<usize>,
    free_bytes: usize,
    starts: ObjectStartMap,
}

impl MemorySegment {
    /// # Safety
    ///
    /// `range` must be readable, writable and owned by the heap from now on.
    pub(crate) unsafe fn new(range: Range<usize>) -> Option<MemorySegment> {
        let beginning = klib::align_up(range.start, ARCH_WORD_SIZE)?;
        let end = klib::align_down(range.end, ARCH_WORD_SIZE);
        if end <= beginning || (end - beginning) / ARCH_WORD_SIZE < MIN_BLOCK_WORDS {
            return None;
        }
        let words = (end - beginning) / ARCH_WORD_SIZE;
        Block::at(beginning).format_free(words, None);
        Some(MemorySegment {
            beginning,
            end,
            free_head: Some(beginning),
            free_bytes: end - beginning,
            starts: ObjectStartMap::new(words),
        })
    }

    pub fn beginning(&self) -> usize {
        self.beginning
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.beginning
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.beginning && address < self.end
    }

    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    pub fn allocated_bytes(&self) -> usize {
        self.len() - self.free_bytes
    }

    fn word_index(&self, address: usize) -> usize {
        (address - self.beginning) / ARCH_WORD_SIZE
    }

    fn block(&self, header: usize) -> Block {
        debug_assert!(self.contains(header));
        // SAFETY: headers are only ever formed for addresses inside the segment.
        unsafe { Block::at(header) }
    }

    fn free_list(&self) -> FreeList<'_> {
        FreeList {
            segment: self,
            next: self.free_head,
        }
    }

    /// First fit. Carves the allocation off the end of the free block so the
    /// list links only change when a block is used up entirely.
    pub(crate) fn allocate(&mut self, payload_bytes: usize, allocation: Allocation) -> Option<usize> {
        let words = klib::align_up(payload_bytes, ARCH_WORD_SIZE)?
            .checked_div(ARCH_WORD_SIZE)?
            .checked_add(OBJECT_HEADER_WORDS)?;

        let mut previous: Option<Block> = None;
        let mut cursor = self.free_head;
        while let Some(address) = cursor {
            let candidate = self.block(address);
            let available = candidate.size_words();
            if available >= words {
                let remainder = available - words;
                let (header, size) = if remainder >= MIN_BLOCK_WORDS {
                    candidate.format_free(remainder, candidate.next_free());
                    (address + remainder * ARCH_WORD_SIZE, words)
                } else {
                    self.unlink(previous, candidate);
                    (address, available)
                };
                return Some(self.commit(header, size, allocation));
            }
            previous = Some(candidate);
            cursor = candidate.next_free();
        }
        None
    }

    fn unlink(&mut self, previous: Option<Block>, block: Block) {
        let next = block.next_free();
        match previous {
            Some(previous) => previous.set_next_free(next),
            None => self.free_head = next,
        }
    }

    fn commit(&mut self, header: usize, size_words: usize, allocation: Allocation) -> usize {
        let block = self.block(header);
        match allocation {
            Allocation::Object {
                type_id,
                reference_count,
            } => block.format_object(size_words, type_id, reference_count),
            Allocation::RawBytes => block.format_raw(size_words),
        }
        block.fill_payload(0);
        let index = self.word_index(header);
        self.starts.set(index, true);
        self.free_bytes -= size_words * ARCH_WORD_SIZE;
        block.payload()
    }

    /// Allocated block owning `address`, which may point anywhere inside it.
    pub(crate) fn find_block(&self, address: usize) -> Option<Block> {
        if !self.contains(address) {
            return None;
        }
        let start = self.starts.find_start(self.word_index(address))?;
        let block = self.block(self.beginning + start * ARCH_WORD_SIZE);
        if block.contains(address) {
            Some(block)
        } else {
            None
        }
    }

    /// Allocated block whose payload starts exactly at `payload`.
    pub(crate) fn block_at(&self, payload: usize) -> Option<Block> {
        if payload < self.beginning + OBJECT_HEADER_WORDS * ARCH_WORD_SIZE || !self.contains(payload) {
            return None;
        }
        let header = Block::from_payload(payload);
        if header % ARCH_WORD_SIZE != 0 || !self.starts.is_start(self.word_index(header)) {
            return None;
        }
        Some(self.block(header))
    }

    pub(crate) fn release(&mut self, payload: usize) {
        let block = match self.block_at(payload) {
            Some(block) => block,
            None => bug_check!(
                StopCode::HeapCorruption,
                "release of {:#x}, not an allocated block",
                payload
            ),
        };
        if !matches!(block.kind(), Some(BlockKind::Object | BlockKind::RawBytes)) {
            bug_check!(StopCode::HeapCorruption, "block at {:#x} has a bad header", block.address());
        }
        self.free_block(block);
    }

    fn free_block(&mut self, block: Block) {
        let index = self.word_index(block.address());
        self.starts.set(index, false);
        let size = block.size_words();
        self.free_bytes += size * ARCH_WORD_SIZE;

        // Find the free neighbours on both sides.
        let mut previous: Option<Block> = None;
        let mut cursor = self.free_head;
        while let Some(address) = cursor {
            if address > block.address() {
                break;
            }
            previous = Some(self.block(address));
            cursor = self.block(address).next_free();
        }
        let next = cursor.map(|address| self.block(address));

        let mut merged = block;
        let mut merged_size = size;
        let mut merged_next = cursor;
        if let Some(next) = next {
            if block.end() == next.address() {
                merged_size += next.size_words();
                merged_next = next.next_free();
            }
        }
        match previous {
            Some(previous) if previous.end() == block.address() => {
                merged = previous;
                merged_size += previous.size_words();
            }
            Some(previous) => previous.set_next_free(Some(block.address())),
            None => self.free_head = Some(block.address()),
        }
        merged.format_free(merged_size, merged_next);
    }

    /// Walks every block in address order.
    pub(crate) fn blocks(&self) -> Blocks<'_> {
        Blocks {
            segment: self,
            cursor: self.beginning,
        }
    }

    /// Rebuilds the free list from free blocks and unmarked objects, clearing
    /// marks on survivors. Raw byte blocks are never swept.
    pub(crate) fn sweep(&mut self) -> SweepResult {
        let mut result = SweepResult::default();
        let mut free_head: Option<usize> = None;
        let mut last_free: Option<Block> = None;
        let mut free_bytes = 0;

        let mut cursor = self.beginning;
        while cursor < self.end {
            let block = self.block(cursor);
            let size = block.size_words();
            if size < MIN_BLOCK_WORDS || block.end() > self.end {
                bug_check!(StopCode::HeapCorruption, "block at {:#x} has size {}", cursor, size);
            }
            let word = block.multi_use();
            let reclaim = match word.kind() {
                Some(BlockKind::Free) => true,
                Some(BlockKind::Object) if word.is_marked() => {
                    block.set_multi_use(word.with_mark(false));
                    result.objects_kept += 1;
                    false
                }
                Some(BlockKind::Object) => {
                    result.objects_freed += 1;
                    result.bytes_freed += size * ARCH_WORD_SIZE;
                    let index = self.word_index(cursor);
                    self.starts.set(index, false);
                    true
                }
                Some(BlockKind::RawBytes) => false,
                None => bug_check!(StopCode::HeapCorruption, "bad header at {:#x}", cursor),
            };
            cursor = block.end();

            if !reclaim {
                continue;
            }
            free_bytes += size * ARCH_WORD_SIZE;
            match last_free {
                Some(last) if last.end() == block.address() => {
                    let merged = last.size_words() + size;
                    last.format_free(merged, None);
                }
                Some(last) => {
                    last.set_next_free(Some(block.address()));
                    block.format_free(size, None);
                    last_free = Some(block);
                }
                None => {
                    block.format_free(size, None);
                    free_head = Some(block.address());
                    last_free = Some(block);
                }
            }
        }

        self.free_head = free_head;
        self.free_bytes = free_bytes;
        result
    }

    /// Fills the payload of every free block.
    pub(crate) fn fill_free(&self, value: usize) {
        for block in self.free_list() {
            block.fill_payload(value);
        }
    }

    /// `(header address, size in bytes)` of each free block, in list order.
    pub fn free_blocks(&self) -> Vec<(usize, usize)> {
        self.free_list()
            .map(|block| (block.address(), block.size_bytes()))
            .collect()
    }

    pub fn statistics(&self) -> SegmentStatistics {
        let mut statistics = SegmentStatistics {
            beginning: self.beginning,
            end: self.end,
            free_bytes: self.free_bytes,
            ..SegmentStatistics::default()
        };
        for block in self.blocks() {
            match block.kind() {
                Some(BlockKind::Free) => {
                    statistics.free_blocks += 1;
                    statistics.largest_free_block =
                        statistics.largest_free_block.max(block.size_bytes());
                }
                Some(BlockKind::Object) => statistics.objects += 1,
                Some(BlockKind::RawBytes) => statistics.raw_blocks += 1,
                None => {}
            }
        }
        statistics
    }
}

struct FreeList<'a> {
    segment: &'a MemorySegment,
    next: Option<usize>,
}

impl Iterator for FreeList<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.segment.block(self.next?);
        self.next = block.next_free();
        Some(block)
    }
}

pub(crate) struct Blocks<'a> {
    segment: &'a MemorySegment,
    cursor: usize,
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.cursor >= self.segment.end {
            return None;
        }
        let block = self.segment.block(self.cursor);
        let end = block.end();
        // A zero sized header would never advance.
        self.cursor = if end > self.cursor { end } else { self.segment.end };
        Some(block)
    }
}
