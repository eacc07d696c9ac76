//! Board memory description.
//!
//! Boards describe themselves with plain data: a table of memory ranges plus
//! a couple of clock constants. The kernel never looks at anything else about
//! the board.

use alloc::vec::Vec;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MemoryUsage: u32 {
        const RAM          = 1 << 0;
        const FLASH        = 1 << 1;
        const HEAP         = 1 << 2;
        const STACK        = 1 << 3;
        const PERIPHERALS  = 1 << 4;
        const READ_ONLY    = 1 << 5;
        /// Backs the kernel's own bookkeeping allocations, never the managed heap.
        const KERNEL       = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRange {
    pub address: usize,
    pub length: usize,
    pub usage: MemoryUsage,
}

impl MemoryRange {
    pub const fn new(address: usize, length: usize, usage: MemoryUsage) -> Self {
        Self {
            address,
            length,
            usage,
        }
    }

    /// `None` when the range runs past the end of the address space.
    pub const fn checked_end(&self) -> Option<usize> {
        self.address.checked_add(self.length)
    }

    pub const fn end(&self) -> usize {
        self.address.saturating_add(self.length)
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.address && address < self.end()
    }

    pub fn is_heap(&self) -> bool {
        self.usage.contains(MemoryUsage::HEAP)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMemoryLayout {
    pub name: &'static str,
    pub ranges: Vec<MemoryRange>,
    /// Frequency of the monotonic clock driving [`crate::time::SchedulerTime`].
    pub clock_frequency: u64,
    /// Stack the processor was running on at reset. Wrapped by the interrupt thread.
    pub boot_stack: Option<MemoryRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardLayoutError {
    Empty,
    Overlapping(MemoryRange, MemoryRange),
    Malformed,
}

impl BoardMemoryLayout {
    pub fn builder(name: &'static str) -> BoardMemoryLayoutBuilder {
        BoardMemoryLayoutBuilder {
            layout: BoardMemoryLayout {
                name,
                ranges: Vec::new(),
                clock_frequency: 1_000_000,
                boot_stack: None,
            },
        }
    }

    pub fn heap_ranges(&self) -> impl Iterator<Item = &MemoryRange> {
        self.ranges.iter().filter(|r| r.is_heap())
    }

    pub fn kernel_range(&self) -> Option<&MemoryRange> {
        self.ranges
            .iter()
            .find(|r| r.usage.contains(MemoryUsage::KERNEL))
    }

    /// Decodes a layout emitted by the board build tooling as a postcard blob.
    pub fn decode(bytes: &'static [u8]) -> Result<Self, BoardLayoutError> {
        let layout: BoardMemoryLayout =
            postcard::from_bytes(bytes).map_err(|_| BoardLayoutError::Malformed)?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<(), BoardLayoutError> {
        if self.ranges.is_empty() {
            return Err(BoardLayoutError::Empty);
        }
        let wraps = |range: &MemoryRange| range.checked_end().is_none();
        if self.ranges.iter().any(wraps) || self.boot_stack.as_ref().map_or(false, wraps) {
            return Err(BoardLayoutError::Malformed);
        }
        for (index, left) in self.ranges.iter().enumerate() {
            for right in self.ranges.iter().skip(index + 1) {
                if left.address < right.end() && right.address < left.end() {
                    return Err(BoardLayoutError::Overlapping(*left, *right));
                }
            }
        }
        Ok(())
    }
}

pub struct BoardMemoryLayoutBuilder {
    layout: BoardMemoryLayout,
}

impl BoardMemoryLayoutBuilder {
    pub fn range(mut self, address: usize, length: usize, usage: MemoryUsage) -> Self {
        self.layout
            .ranges
            .push(MemoryRange::new(address, length, usage));
        self
    }

    pub fn heap(self, address: usize, length: usize) -> Self {
        self.range(address, length, MemoryUsage::RAM | MemoryUsage::HEAP)
    }

    pub fn clock_frequency(mut self, ticks_per_second: u64) -> Self {
        self.layout.clock_frequency = ticks_per_second;
        self
    }

    pub fn boot_stack(mut self, address: usize, length: usize) -> Self {
        self.layout.boot_stack = Some(MemoryRange::new(
            address,
            length,
            MemoryUsage::RAM | MemoryUsage::STACK,
        ));
        self
    }

    pub fn build(self) -> Result<BoardMemoryLayout, BoardLayoutError> {
        self.layout.validate()?;
        Ok(self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_only_heap_ranges_for_the_allocator() {
        let layout = BoardMemoryLayout::builder("test")
            .range(0x0000_0000, 0x10_0000, MemoryUsage::FLASH | MemoryUsage::READ_ONLY)
            .heap(0x2000_0000, 0x8000)
            .heap(0x1FFF_0000, 0x8000)
            .build()
            .unwrap();

        let heaps: Vec<_> = layout.heap_ranges().map(|r| r.address).collect();
        assert_eq!(heaps, [0x2000_0000, 0x1FFF_0000]);
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let result = BoardMemoryLayout::builder("test")
            .heap(0x2000_0000, 0x1000)
            .heap(0x2000_0800, 0x1000)
            .build();

        assert!(matches!(result, Err(BoardLayoutError::Overlapping(_, _))));
    }

    #[test]
    fn ranges_past_the_address_space_are_malformed() {
        let result = BoardMemoryLayout::builder("test")
            .range(0x2000_0000, 64, MemoryUsage::RAM)
            .range(usize::MAX - 8, 64, MemoryUsage::RAM)
            .build();
        assert_eq!(result, Err(BoardLayoutError::Malformed));

        let result = BoardMemoryLayout::builder("test")
            .heap(0x2000_0000, 64)
            .boot_stack(usize::MAX - 8, 64)
            .build();
        assert_eq!(result, Err(BoardLayoutError::Malformed));
    }

    #[test]
    fn empty_layout_is_rejected() {
        assert_eq!(
            BoardMemoryLayout::builder("test").build(),
            Err(BoardLayoutError::Empty)
        );
    }
}
