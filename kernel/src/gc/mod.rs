//! Garbage collectors.
//!
//! One collector is compiled in, picked by cargo feature. Mark and sweep
//! collectors find live objects from roots; reference counting collectors
//! free objects as soon as generated code drops the last reference.

use alloc::vec::Vec;

use kernel_shared::{
    error::{KernelError, KernelResult},
    object::TypeTable,
};
use pal::Platform;

use crate::{memory::MemoryManager, thread::ThreadManager};

mod mark_stack;
mod mark_sweep;
mod reference_counting;

pub use mark_sweep::{
    Conservative, ConservativeMarkAndSweepCollector, MarkAndSweepCollector, Precise,
    PreciseMarkAndSweepCollector, ScanPolicy,
};
pub use reference_counting::{ReferenceCountingCollector, StrictReferenceCountingCollector};

#[cfg(feature = "gc-strict-refcount")]
pub type ConfiguredCollector = StrictReferenceCountingCollector;

#[cfg(all(feature = "gc-refcount", not(feature = "gc-strict-refcount")))]
pub type ConfiguredCollector = ReferenceCountingCollector;

#[cfg(all(
    feature = "gc-precise",
    not(any(feature = "gc-refcount", feature = "gc-strict-refcount"))
))]
pub type ConfiguredCollector = PreciseMarkAndSweepCollector;

#[cfg(not(any(
    feature = "gc-precise",
    feature = "gc-refcount",
    feature = "gc-strict-refcount"
)))]
pub type ConfiguredCollector = ConservativeMarkAndSweepCollector;

/// Anything that can hand candidate references to a collector.
pub trait RootSource {
    fn visit_roots(&self, visitor: &mut dyn FnMut(usize));
}

impl<P: Platform> RootSource for ThreadManager<'_, P> {
    fn visit_roots(&self, visitor: &mut dyn FnMut(usize)) {
        ThreadManager::visit_roots(self, visitor)
    }
}

impl RootSource for [usize] {
    fn visit_roots(&self, visitor: &mut dyn FnMut(usize)) {
        self.iter().for_each(|word| visitor(*word));
    }
}

impl<const N: usize> RootSource for [usize; N] {
    fn visit_roots(&self, visitor: &mut dyn FnMut(usize)) {
        self[..].visit_roots(visitor)
    }
}

impl<A: RootSource + ?Sized, B: RootSource + ?Sized> RootSource for (&A, &B) {
    fn visit_roots(&self, visitor: &mut dyn FnMut(usize)) {
        self.0.visit_roots(visitor);
        self.1.visit_roots(visitor);
    }
}

/// Statics holding object references, registered by generated code at start up.
#[derive(Debug, Default)]
pub struct GlobalRoots {
    slots: Vec<usize>,
}

impl GlobalRoots {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Safety
    ///
    /// `slot` must stay valid and word aligned for as long as collections run.
    pub unsafe fn register(&mut self, slot: *const usize) {
        self.slots.push(slot as usize);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl RootSource for GlobalRoots {
    fn visit_roots(&self, visitor: &mut dyn FnMut(usize)) {
        for slot in self.slots.iter() {
            // SAFETY: guaranteed by register.
            visitor(unsafe { core::ptr::read_volatile(*slot as *const usize) });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionReport {
    /// Objects reached directly from a root.
    pub roots: usize,
    pub objects_marked: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
    /// Extra heap passes forced by a full mark stack.
    pub overflow_rescans: usize,
}

pub trait GarbageCollector {
    fn name(&self) -> &'static str;

    /// Count stored in the header of a fresh object.
    fn initial_reference_count(&self) -> usize {
        0
    }

    /// Reclaims what is unreachable. Runs with interrupts masked and every
    /// thread's registers captured.
    fn collect(
        &mut self,
        heap: &mut MemoryManager,
        types: &TypeTable,
        roots: &dyn RootSource,
    ) -> CollectionReport;

    fn refers_to_memory(&self, heap: &MemoryManager, address: usize) -> bool {
        heap.refers_to_memory(address)
    }

    fn add_reference(&mut self, _heap: &mut MemoryManager, _address: usize) -> KernelResult<()> {
        Err(KernelError::UnsupportedOperation("add_reference"))
    }

    fn release_reference(
        &mut self,
        _heap: &mut MemoryManager,
        _types: &TypeTable,
        _address: usize,
    ) -> KernelResult<()> {
        Err(KernelError::UnsupportedOperation("release_reference"))
    }
}
