//! Backing store for the kernel's own collections (thread tables, queues,
//! segment maps). Managed objects never land here.

use linked_list_allocator::LockedHeap;

#[global_allocator]
static KERNEL_HEAP: LockedHeap = LockedHeap::empty();

/// # Safety
///
/// `address..address + length` must be unused RAM, and this may only be
/// called once, before the first allocation.
pub unsafe fn init_kernel_heap(address: usize, length: usize) {
    KERNEL_HEAP.lock().init(address as *mut u8, length);
}
