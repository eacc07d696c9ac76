use alloc::vec::Vec;

use pal::InterruptControl;

use crate::memory::MemoryManager;

/// Interrupts that are always masked, enough for single threaded unit tests.
pub(crate) struct Masked;

impl InterruptControl for Masked {
    fn disable_interrupts(&self) -> bool {
        false
    }

    fn restore_interrupts(&self, _were_enabled: bool) {}

    fn interrupts_enabled(&self) -> bool {
        false
    }
}

static MASKED: Masked = Masked;

/// A one segment heap of `words` words on leaked memory.
pub(crate) fn heap(words: usize) -> MemoryManager<'static> {
    let memory: &'static mut [usize] = Vec::leak(alloc::vec![0usize; words]);
    let mut heap = MemoryManager::new(&MASKED);
    let address = memory.as_mut_ptr() as usize;
    assert!(unsafe { heap.add_segment(address, words * core::mem::size_of::<usize>()) });
    heap
}
