use alloc::vec::Vec;

use kernel_shared::{
    bugcheck::StopCode,
    constants::MAX_REFERENCE_COUNT,
    error::KernelResult,
    object::{TypeLayout, TypeTable},
};

use super::{CollectionReport, GarbageCollector, RootSource};
use crate::{bug_check, memory::MemoryManager, verbose, warn};

/// Counts live in the object header. An object reaching zero is freed at once
/// and releases everything it references. Cycles are never reclaimed.
///
/// Counts stick at the maximum: such an object is never freed.
#[derive(Debug, Default)]
pub struct ReferenceCountingCollector {
    freed: usize,
}

/// Like [`ReferenceCountingCollector`] but every inconsistency, such as an
/// unknown address, an underflow or an overflow, stops the system.
#[derive(Debug, Default)]
pub struct StrictReferenceCountingCollector {
    freed: usize,
}

impl ReferenceCountingCollector {
    pub const fn new() -> Self {
        Self { freed: 0 }
    }
}

impl StrictReferenceCountingCollector {
    pub const fn new() -> Self {
        Self { freed: 0 }
    }
}

fn increment(heap: &mut MemoryManager, address: usize, strict: bool) {
    if address == 0 {
        return;
    }
    let object = match heap.object_at(address) {
        Some(object) => object,
        None if strict => bug_check!(
            StopCode::InvalidObjectAddress,
            "add_reference({:#x})",
            address
        ),
        None => return,
    };
    let count = heap.reference_count(object).unwrap_or(0);
    if count >= MAX_REFERENCE_COUNT {
        if strict {
            bug_check!(StopCode::ReferenceCountOverflow, "object {:#x}", object);
        }
        return;
    }
    heap.set_reference_count(object, count + 1);
}

/// Drops one reference and frees whatever reaches zero. Returns the number of
/// objects freed.
fn decrement(heap: &mut MemoryManager, types: &TypeTable, address: usize, strict: bool) -> usize {
    let mut pending = Vec::new();
    if release_one(heap, address, strict) {
        pending.push(address);
    }

    let mut freed = 0;
    while let Some(object) = pending.pop() {
        for child in references_of(heap, types, object, strict) {
            if release_one(heap, child, strict) {
                pending.push(child);
            }
        }
        heap.release(object);
        freed += 1;
    }
    freed
}

/// True when the count of `address` dropped to zero.
fn release_one(heap: &mut MemoryManager, address: usize, strict: bool) -> bool {
    if address == 0 {
        return false;
    }
    let object = match heap.object_at(address) {
        Some(object) => object,
        None if strict => bug_check!(
            StopCode::InvalidObjectAddress,
            "release_reference({:#x})",
            address
        ),
        None => return false,
    };
    match heap.reference_count(object).unwrap_or(0) {
        0 if strict => bug_check!(StopCode::ReferenceCountUnderflow, "object {:#x}", object),
        0 => {
            warn!("Reference count of {:#x} is already zero", object);
            false
        }
        MAX_REFERENCE_COUNT => false,
        count => {
            heap.set_reference_count(object, count - 1);
            count == 1
        }
    }
}

fn references_of(heap: &MemoryManager, types: &TypeTable, object: usize, strict: bool) -> Vec<usize> {
    let type_id = match heap.type_of(object) {
        Some(type_id) => type_id,
        None => return Vec::new(),
    };
    let descriptor = match types.get(type_id) {
        Some(descriptor) => descriptor,
        None if strict => bug_check!(StopCode::UnknownType, "{} of object {:#x}", type_id, object),
        None => {
            warn!("{} of object {:#x} is unknown, its references leak", type_id, object);
            return Vec::new();
        }
    };
    let payload_words = heap.payload_words(object).unwrap_or(0);
    let element_count = match descriptor.layout {
        TypeLayout::ReferenceArray => heap.read_payload_word(object, 0).unwrap_or(0),
        _ => 0,
    };
    descriptor
        .reference_slots(payload_words, element_count)
        .filter_map(|slot| heap.read_payload_word(object, slot))
        .filter(|value| *value != 0)
        .collect()
}

impl GarbageCollector for ReferenceCountingCollector {
    fn name(&self) -> &'static str {
        "reference counting"
    }

    fn initial_reference_count(&self) -> usize {
        1
    }

    /// Objects are freed as their counts drop, nothing is left to do here.
    fn collect(
        &mut self,
        _heap: &mut MemoryManager,
        _types: &TypeTable,
        _roots: &dyn RootSource,
    ) -> CollectionReport {
        verbose!("{} objects freed by reference counting so far", self.freed);
        CollectionReport::default()
    }

    fn add_reference(&mut self, heap: &mut MemoryManager, address: usize) -> KernelResult<()> {
        increment(heap, address, false);
        Ok(())
    }

    fn release_reference(
        &mut self,
        heap: &mut MemoryManager,
        types: &TypeTable,
        address: usize,
    ) -> KernelResult<()> {
        self.freed += decrement(heap, types, address, false);
        Ok(())
    }
}

impl GarbageCollector for StrictReferenceCountingCollector {
    fn name(&self) -> &'static str {
        "strict reference counting"
    }

    fn initial_reference_count(&self) -> usize {
        1
    }

    fn collect(
        &mut self,
        _heap: &mut MemoryManager,
        _types: &TypeTable,
        _roots: &dyn RootSource,
    ) -> CollectionReport {
        verbose!("{} objects freed by reference counting so far", self.freed);
        CollectionReport::default()
    }

    fn add_reference(&mut self, heap: &mut MemoryManager, address: usize) -> KernelResult<()> {
        increment(heap, address, true);
        Ok(())
    }

    fn release_reference(
        &mut self,
        heap: &mut MemoryManager,
        types: &TypeTable,
        address: usize,
    ) -> KernelResult<()> {
        self.freed += decrement(heap, types, address, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kernel_shared::object::{TypeDescriptor, TypeId};

    use super::*;
    use crate::test_support::heap;

    const NODE: TypeId = TypeId(1);
    const WORD: usize = core::mem::size_of::<usize>();

    fn types() -> TypeTable {
        [TypeDescriptor::new(NODE, "Node", 2 * WORD, TypeLayout::Fields(&[0]))]
            .into_iter()
            .collect()
    }

    fn node(heap: &mut MemoryManager, next: usize) -> usize {
        let object = heap.allocate_object(NODE, 2 * WORD, 1).unwrap();
        heap.write_payload_word(object, 0, next);
        object
    }

    #[test]
    fn counts_follow_add_and_release() {
        let mut heap = heap(128);
        let types = types();
        let mut collector = ReferenceCountingCollector::new();
        let object = node(&mut heap, 0);

        collector.add_reference(&mut heap, object).unwrap();
        assert_eq!(heap.reference_count(object), Some(2));
        collector.release_reference(&mut heap, &types, object).unwrap();
        assert_eq!(heap.reference_count(object), Some(1));
        collector.release_reference(&mut heap, &types, object).unwrap();
        assert_eq!(heap.object_at(object), None);
        assert_eq!(heap.free_blocks().len(), 1);
    }

    #[test]
    fn freeing_cascades_through_references() {
        let mut heap = heap(128);
        let types = types();
        let mut collector = ReferenceCountingCollector::new();
        let tail = node(&mut heap, 0);
        let head = node(&mut heap, tail);

        collector.release_reference(&mut heap, &types, head).unwrap();
        assert_eq!(heap.object_at(head), None);
        assert_eq!(heap.object_at(tail), None);
        assert_eq!(heap.allocated_memory(), 0);
    }

    #[test]
    fn cycles_leak() {
        let mut heap = heap(128);
        let types = types();
        let mut collector = ReferenceCountingCollector::new();
        let first = node(&mut heap, 0);
        let second = node(&mut heap, first);
        collector.add_reference(&mut heap, first).unwrap();
        heap.write_payload_word(first, 0, second);
        collector.add_reference(&mut heap, second).unwrap();

        // Both counts are now held only by the cycle.
        collector.release_reference(&mut heap, &types, first).unwrap();
        collector.release_reference(&mut heap, &types, second).unwrap();
        let report = collector.collect(&mut heap, &types, &[0usize; 0]);

        assert_eq!(report.objects_freed, 0);
        assert_eq!(heap.reference_count(first), Some(1));
        assert_eq!(heap.reference_count(second), Some(1));
    }

    #[test]
    fn saturated_counts_stick() {
        let mut heap = heap(128);
        let types = types();
        let mut collector = ReferenceCountingCollector::new();
        let object = node(&mut heap, 0);
        heap.set_reference_count(object, MAX_REFERENCE_COUNT);

        collector.add_reference(&mut heap, object).unwrap();
        collector.release_reference(&mut heap, &types, object).unwrap();
        assert_eq!(heap.reference_count(object), Some(MAX_REFERENCE_COUNT));
    }

    #[test]
    fn lenient_collector_ignores_foreign_addresses() {
        let mut heap = heap(128);
        let types = types();
        let mut collector = ReferenceCountingCollector::new();

        collector.add_reference(&mut heap, 0x10).unwrap();
        collector.release_reference(&mut heap, &types, 0x10).unwrap();
        collector.release_reference(&mut heap, &types, 0).unwrap();
    }

    #[test]
    #[should_panic]
    fn strict_collector_stops_on_underflow() {
        let mut heap = heap(128);
        let types = types();
        let mut collector = StrictReferenceCountingCollector::new();
        let object = node(&mut heap, 0);
        heap.set_reference_count(object, 0);

        let _ = collector.release_reference(&mut heap, &types, object);
    }

    #[test]
    #[should_panic]
    fn strict_collector_stops_on_foreign_addresses() {
        let mut heap = heap(128);
        let mut collector = StrictReferenceCountingCollector::new();
        let _ = collector.add_reference(&mut heap, 0x10);
    }

    #[test]
    fn mark_and_sweep_rejects_counting() {
        let mut heap = heap(128);
        let mut collector = crate::gc::ConservativeMarkAndSweepCollector::new();
        assert!(collector.add_reference(&mut heap, 0).is_err());
    }
}
