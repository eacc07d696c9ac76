use core::marker::PhantomData;

use kernel_shared::{
    bugcheck::StopCode,
    object::{TypeLayout, TypeTable},
};

use super::{mark_stack::MarkStack, CollectionReport, GarbageCollector, RootSource};
use crate::{bug_check, memory::MemoryManager, verbose};

/// How a mark and sweep collector recognizes references.
pub trait ScanPolicy {
    const NAME: &'static str;

    /// Object a root word keeps alive, if any.
    fn resolve_root(heap: &MemoryManager, word: usize) -> Option<usize>;

    /// Calls `child` for every object referenced from `object`'s payload.
    fn visit_children(
        heap: &MemoryManager,
        types: &TypeTable,
        object: usize,
        child: &mut dyn FnMut(usize),
    );
}

/// Every word that looks like a pointer into an object keeps it alive,
/// interior pointers included. Needs no type information.
pub struct Conservative;

impl ScanPolicy for Conservative {
    const NAME: &'static str = "conservative mark and sweep";

    fn resolve_root(heap: &MemoryManager, word: usize) -> Option<usize> {
        heap.find_object(word)
    }

    fn visit_children(
        heap: &MemoryManager,
        _types: &TypeTable,
        object: usize,
        child: &mut dyn FnMut(usize),
    ) {
        let words = heap.payload_words(object).unwrap_or(0);
        for index in 0..words {
            let word = heap.read_payload_word(object, index).unwrap_or(0);
            if let Some(target) = heap.find_object(word) {
                child(target);
            }
        }
    }
}

/// Object payloads are walked through their type descriptors. Roots are still
/// taken conservatively but must point at an object start.
pub struct Precise;

impl ScanPolicy for Precise {
    const NAME: &'static str = "precise mark and sweep";

    fn resolve_root(heap: &MemoryManager, word: usize) -> Option<usize> {
        heap.object_at(word)
    }

    fn visit_children(
        heap: &MemoryManager,
        types: &TypeTable,
        object: usize,
        child: &mut dyn FnMut(usize),
    ) {
        let type_id = match heap.type_of(object) {
            Some(type_id) => type_id,
            None => bug_check!(StopCode::HeapCorruption, "{:#x} is not an object", object),
        };
        let descriptor = match types.get(type_id) {
            Some(descriptor) => descriptor,
            None => bug_check!(StopCode::UnknownType, "{} of object {:#x}", type_id, object),
        };
        if !descriptor.has_references() {
            return;
        }
        let payload_words = heap.payload_words(object).unwrap_or(0);
        let element_count = match descriptor.layout {
            TypeLayout::ReferenceArray => heap.read_payload_word(object, 0).unwrap_or(0),
            _ => 0,
        };
        for slot in descriptor.reference_slots(payload_words, element_count) {
            let value = heap.read_payload_word(object, slot).unwrap_or(0);
            if value == 0 {
                continue;
            }
            match heap.object_at(value) {
                Some(target) => child(target),
                // References to flash constants are legal, anything else inside
                // the heap means the field was overwritten.
                None if heap.refers_to_memory(value) => bug_check!(
                    StopCode::HeapCorruption,
                    "field {} of {:#x} holds {:#x}",
                    slot,
                    object,
                    value
                ),
                None => {}
            }
        }
    }
}

pub struct MarkAndSweepCollector<S, const CAPACITY: usize = 1024> {
    stack: MarkStack<CAPACITY>,
    _policy: PhantomData<S>,
}

pub type ConservativeMarkAndSweepCollector = MarkAndSweepCollector<Conservative>;
pub type PreciseMarkAndSweepCollector = MarkAndSweepCollector<Precise>;

impl<S: ScanPolicy, const CAPACITY: usize> MarkAndSweepCollector<S, CAPACITY> {
    pub const fn new() -> Self {
        Self {
            stack: MarkStack::new(),
            _policy: PhantomData,
        }
    }

    /// Traces until the stack is empty. Returns the number of objects marked.
    fn drain(&mut self, heap: &MemoryManager, types: &TypeTable) -> usize {
        let mut marked = 0;
        while let Some(object) = self.stack.pop() {
            let stack = &mut self.stack;
            S::visit_children(heap, types, object, &mut |child| {
                if heap.mark(child) {
                    marked += 1;
                    stack.push(child);
                }
            });
        }
        marked
    }

    /// Retraces every marked object. Objects whose push was dropped are
    /// marked but untraced, this reaches their children.
    fn rescan(&mut self, heap: &MemoryManager, types: &TypeTable) -> usize {
        let mut marked = 0;
        for segment in heap.segments() {
            for block in segment.blocks() {
                if !heap.is_marked(block.payload()) || heap.object_at(block.payload()).is_none() {
                    continue;
                }
                let stack = &mut self.stack;
                S::visit_children(heap, types, block.payload(), &mut |child| {
                    if heap.mark(child) {
                        marked += 1;
                        stack.push(child);
                    }
                });
                marked += self.drain(heap, types);
            }
        }
        marked
    }
}

impl<S: ScanPolicy, const CAPACITY: usize> Default for MarkAndSweepCollector<S, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ScanPolicy, const CAPACITY: usize> GarbageCollector for MarkAndSweepCollector<S, CAPACITY> {
    fn name(&self) -> &'static str {
        S::NAME
    }

    fn collect(
        &mut self,
        heap: &mut MemoryManager,
        types: &TypeTable,
        roots: &dyn RootSource,
    ) -> CollectionReport {
        let mut report = CollectionReport::default();
        {
            let heap: &MemoryManager = heap;
            let stack = &mut self.stack;
            roots.visit_roots(&mut |word| {
                if let Some(object) = S::resolve_root(heap, word) {
                    if heap.mark(object) {
                        report.roots += 1;
                        stack.push(object);
                    }
                }
            });
            report.objects_marked = report.roots + self.drain(heap, types);
            while self.stack.take_overflow() {
                report.overflow_rescans += 1;
                report.objects_marked += self.rescan(heap, types);
            }
        }

        let swept = heap.sweep();
        report.objects_freed = swept.objects_freed;
        report.bytes_freed = swept.bytes_freed;
        verbose!(
            "{}: {} marked, {} freed ({} bytes), {} rescans",
            S::NAME,
            report.objects_marked,
            report.objects_freed,
            report.bytes_freed,
            report.overflow_rescans
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use kernel_shared::object::{TypeDescriptor, TypeId, TypeLayout};

    use super::*;
    use crate::test_support::heap;

    const NODE: TypeId = TypeId(1);
    const ARRAY: TypeId = TypeId(2);
    const BYTES: TypeId = TypeId(3);
    const WORD: usize = core::mem::size_of::<usize>();

    fn types() -> TypeTable {
        [
            TypeDescriptor::new(NODE, "Node", 2 * WORD, TypeLayout::Fields(&[0])),
            TypeDescriptor::new(ARRAY, "Node[]", 0, TypeLayout::ReferenceArray),
            TypeDescriptor::new(BYTES, "Byte[]", 0, TypeLayout::Opaque),
        ]
        .into_iter()
        .collect()
    }

    fn node(heap: &mut MemoryManager, next: usize) -> usize {
        let object = heap.allocate_object(NODE, 2 * WORD, 0).unwrap();
        heap.write_payload_word(object, 0, next);
        object
    }

    #[test]
    fn conservative_collection_keeps_what_roots_reach() {
        let mut heap = heap(256);
        let types = types();
        let tail = node(&mut heap, 0);
        let head = node(&mut heap, tail);
        let garbage = node(&mut heap, 0);

        // Interior pointer into head.
        let roots = [head + WORD, 0x1234];
        let mut collector = ConservativeMarkAndSweepCollector::new();
        let report = collector.collect(&mut heap, &types, &roots);

        assert_eq!(report.objects_marked, 2);
        assert_eq!(report.objects_freed, 1);
        assert!(heap.object_at(head).is_some());
        assert!(heap.object_at(tail).is_some());
        assert!(heap.object_at(garbage).is_none());
        assert!(!heap.is_marked(head));
    }

    #[test]
    fn conservative_scan_treats_data_words_as_references() {
        let mut heap = heap(256);
        let types = types();
        let target = node(&mut heap, 0);
        let bytes = heap.allocate_object(BYTES, 4 * WORD, 0).unwrap();
        heap.write_payload_word(bytes, 3, target);

        let roots = [bytes];
        let report = ConservativeMarkAndSweepCollector::new().collect(&mut heap, &types, &roots);
        assert_eq!(report.objects_freed, 0);
        assert!(heap.object_at(target).is_some());
    }

    #[test]
    fn precise_scan_ignores_non_reference_words() {
        let mut heap = heap(256);
        let types = types();
        let target = node(&mut heap, 0);
        let bytes = heap.allocate_object(BYTES, 4 * WORD, 0).unwrap();
        heap.write_payload_word(bytes, 3, target);

        let roots = [bytes];
        let report = PreciseMarkAndSweepCollector::new().collect(&mut heap, &types, &roots);
        assert_eq!(report.objects_freed, 1);
        assert!(heap.object_at(target).is_none());
    }

    #[test]
    fn precise_roots_must_point_at_the_object_start() {
        let mut heap = heap(256);
        let types = types();
        let object = node(&mut heap, 0);

        let roots = [object + WORD];
        let report = PreciseMarkAndSweepCollector::new().collect(&mut heap, &types, &roots);
        assert_eq!(report.objects_freed, 1);
    }

    #[test]
    fn precise_scan_walks_reference_arrays() {
        let mut heap = heap(256);
        let types = types();
        let first = node(&mut heap, 0);
        let second = node(&mut heap, 0);
        let array = heap.allocate_object(ARRAY, 3 * WORD, 0).unwrap();
        heap.write_payload_word(array, 0, 2);
        heap.write_payload_word(array, 1, first);
        heap.write_payload_word(array, 2, second);

        let roots = [array];
        let report = PreciseMarkAndSweepCollector::new().collect(&mut heap, &types, &roots);
        assert_eq!(report.objects_marked, 3);
        assert_eq!(report.objects_freed, 0);
    }

    #[test]
    #[should_panic]
    fn precise_scan_stops_on_a_field_pointing_inside_an_object() {
        let mut heap = heap(256);
        let types = types();
        let target = node(&mut heap, 0);
        let source = node(&mut heap, target + WORD);

        let roots = [source];
        PreciseMarkAndSweepCollector::new().collect(&mut heap, &types, &roots);
    }

    #[test]
    fn cycles_without_roots_are_collected() {
        let mut heap = heap(256);
        let types = types();
        let first = node(&mut heap, 0);
        let second = node(&mut heap, first);
        heap.write_payload_word(first, 0, second);
        let free_before = heap.available_memory();

        let report = ConservativeMarkAndSweepCollector::new().collect(&mut heap, &types, &[0usize; 0]);
        assert_eq!(report.objects_freed, 2);
        assert!(heap.available_memory() > free_before);
        assert_eq!(heap.free_blocks().len(), 1);
    }

    #[test]
    fn a_full_mark_stack_falls_back_to_rescanning() {
        let mut heap = heap(1024);
        let types = types();
        let mut list = 0;
        for _ in 0..20 {
            list = node(&mut heap, list);
        }
        // Fan out from one array so a two entry stack overflows.
        let array = heap.allocate_object(ARRAY, 9 * WORD, 0).unwrap();
        heap.write_payload_word(array, 0, 8);
        for slot in 1..=8 {
            let leaf = node(&mut heap, 0);
            heap.write_payload_word(array, slot, leaf);
        }
        let garbage = node(&mut heap, 0);

        let roots = [list, array];
        let mut collector = MarkAndSweepCollector::<Precise, 2>::new();
        let report = collector.collect(&mut heap, &types, &roots);

        assert!(report.overflow_rescans > 0);
        assert_eq!(report.objects_marked, 20 + 1 + 8);
        assert_eq!(report.objects_freed, 1);
        assert!(heap.object_at(garbage).is_none());
    }
}
