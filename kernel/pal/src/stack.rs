use core::ops::Range;

/// A thread stack: `length` bytes starting at `base`, growing down from `top`.
///
/// This is the only way the kernel touches stack memory, every access is
/// bounds checked against the region.
#[derive(Debug, PartialEq, Eq)]
pub struct StackRegion {
    base: usize,
    length: usize,
}

const WORD: usize = core::mem::size_of::<usize>();

impl StackRegion {
    /// # Safety
    ///
    /// `base..base + length` must be word aligned, readable and writable for
    /// as long as the region exists, and must not be used by anything else.
    pub unsafe fn from_raw_parts(base: usize, length: usize) -> Self {
        debug_assert!(base % WORD == 0 && length % WORD == 0);
        Self { base, length }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn top(&self) -> usize {
        self.base + self.length
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.base..self.top()
    }

    pub fn contains(&self, address: usize) -> bool {
        self.range().contains(&address)
    }

    fn word_in_range(&self, address: usize) -> bool {
        address % WORD == 0 && address >= self.base && address + WORD <= self.top()
    }

    pub fn read_word(&self, address: usize) -> Option<usize> {
        if !self.word_in_range(address) {
            return None;
        }
        // SAFETY: in bounds and aligned, the constructor vouched for the memory.
        Some(unsafe { core::ptr::read_volatile(address as *const usize) })
    }

    pub fn write_word(&self, address: usize, value: usize) -> bool {
        if !self.word_in_range(address) {
            return false;
        }
        // SAFETY: see read_word.
        unsafe { core::ptr::write_volatile(address as *mut usize, value) };
        true
    }

    pub fn write_canary(&self, canary: usize) {
        self.write_word(self.base, canary);
    }

    pub fn check_canary(&self, canary: usize) -> bool {
        self.read_word(self.base) == Some(canary)
    }

    /// Words between `stack_pointer` and the top, the live part of the stack.
    pub fn live_words(&self, stack_pointer: usize) -> impl Iterator<Item = usize> + '_ {
        let start = stack_pointer.clamp(self.base, self.top());
        let start = start + (WORD - start % WORD) % WORD;
        (start..self.top())
            .step_by(WORD)
            .filter_map(move |address| self.read_word(address))
    }
}
