mod common;

use common::*;
use kernel_shared::{error::KernelError, thread::ThreadPriority};
use pal::ProcessorContext;
use rtkernel::{
    gc::{
        ConservativeMarkAndSweepCollector, GarbageCollector, PreciseMarkAndSweepCollector,
        ReferenceCountingCollector, StrictReferenceCountingCollector,
    },
    Kernel,
};

/// Starts one thread and returns the stack slot a local variable of it would
/// occupy.
fn running_thread_local<C: GarbageCollector>(kernel: &mut Kernel<'_, MockPlatform, C>) -> *mut usize {
    kernel.start_threads();
    let id = kernel.start_thread(thread_body, 0, ThreadPriority::NORMAL).unwrap();
    take_switch(kernel);
    let thread = kernel.threads().thread(id).unwrap();
    (thread.context().stack_pointer() + 2 * WORD) as *mut usize
}

fn node<C: GarbageCollector>(kernel: &mut Kernel<'_, MockPlatform, C>, next: usize) -> usize {
    let object = kernel.allocate_object(NODE, 0).unwrap();
    kernel.memory().write_payload_word(object, 0, next);
    object
}

#[test]
fn a_local_variable_keeps_its_object_alive() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[16 * 1024], ConservativeMarkAndSweepCollector::new());
    let local = running_thread_local(&mut kernel);

    let tail = node(&mut kernel, 0);
    let head = node(&mut kernel, tail);
    let garbage = node(&mut kernel, 0);
    unsafe { local.write_volatile(head) };

    let report = kernel.collect();
    assert_eq!(report.objects_freed, 1);
    assert!(kernel.memory().object_at(head).is_some());
    assert!(kernel.memory().object_at(tail).is_some());
    assert!(kernel.memory().object_at(garbage).is_none());

    unsafe { local.write_volatile(0) };
    let report = kernel.collect();
    assert_eq!(report.objects_freed, 2);
    assert_eq!(kernel.memory().allocated_memory(), STACK_SIZE * 2 + 6 * WORD);
}

#[test]
fn retiring_the_only_holder_lets_its_object_go() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[16 * 1024], ConservativeMarkAndSweepCollector::new());
    let local = running_thread_local(&mut kernel);
    let holder = kernel.threads().current_thread().unwrap();

    let object = node(&mut kernel, 0);
    unsafe { local.write_volatile(object) };
    assert_eq!(kernel.collect().objects_freed, 0);

    kernel.retire_thread(holder);
    take_switch(&mut kernel);
    assert!(kernel.threads().thread(holder).is_none());

    assert_eq!(kernel.collect().objects_freed, 1);
    assert!(kernel.memory().object_at(object).is_none());
}

#[test]
fn interior_pointers_on_the_stack_count_conservatively() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[16 * 1024], ConservativeMarkAndSweepCollector::new());
    let local = running_thread_local(&mut kernel);

    let object = node(&mut kernel, 0);
    unsafe { local.write_volatile(object + WORD) };
    assert_eq!(kernel.collect().objects_freed, 0);
}

#[test]
fn precise_collection_only_follows_declared_references() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[16 * 1024], PreciseMarkAndSweepCollector::new());
    let local = running_thread_local(&mut kernel);

    let text = kernel.allocate_object(STRING, 4 * WORD).unwrap();
    let holder = node(&mut kernel, 0);
    // Word 1 of a node is plain data.
    kernel.memory().write_payload_word(holder, 1, text);
    unsafe { local.write_volatile(holder) };

    let report = kernel.collect();
    assert_eq!(report.objects_marked, 1);
    assert!(kernel.memory().object_at(text).is_none());
}

#[test]
fn global_roots_are_scanned() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[16 * 1024], PreciseMarkAndSweepCollector::new());
    let slot: &'static mut usize = Box::leak(Box::new(0));
    let slot = slot as *mut usize;
    unsafe { kernel.register_global_root(slot) };

    let object = node(&mut kernel, 0);
    unsafe { slot.write_volatile(object) };
    assert_eq!(kernel.collect().objects_freed, 0);

    unsafe { slot.write_volatile(0) };
    assert_eq!(kernel.collect().objects_freed, 1);
}

#[test]
fn allocation_collects_garbage_when_the_heap_is_full() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[8 * 1024], ConservativeMarkAndSweepCollector::new());

    for _ in 0..1_000 {
        node(&mut kernel, 0);
    }
    assert!(kernel.collections() > 0);
}

#[test]
fn reference_counts_free_objects_at_zero() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[16 * 1024], ReferenceCountingCollector::new());
    let tail = node(&mut kernel, 0);
    let head = node(&mut kernel, tail);
    assert_eq!(kernel.memory().reference_count(head), Some(1));

    kernel.add_reference(head).unwrap();
    assert_eq!(kernel.memory().reference_count(head), Some(2));
    kernel.release_reference(head).unwrap();
    kernel.release_reference(head).unwrap();

    assert!(kernel.memory().object_at(head).is_none());
    assert!(kernel.memory().object_at(tail).is_none());
}

#[test]
fn reference_counting_leaks_cycles() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[16 * 1024], ReferenceCountingCollector::new());
    let first = node(&mut kernel, 0);
    let second = node(&mut kernel, first);
    kernel.add_reference(first).unwrap();
    kernel.memory().write_payload_word(first, 0, second);
    kernel.add_reference(second).unwrap();

    kernel.release_reference(first).unwrap();
    kernel.release_reference(second).unwrap();
    assert_eq!(kernel.collect().objects_freed, 0);
    assert!(kernel.memory().object_at(first).is_some());
    assert!(kernel.memory().object_at(second).is_some());
}

#[test]
fn mark_and_sweep_does_not_count_references() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[16 * 1024], ConservativeMarkAndSweepCollector::new());
    let object = node(&mut kernel, 0);
    assert_eq!(kernel.memory().reference_count(object), Some(0));
    assert_eq!(
        kernel.add_reference(object),
        Err(KernelError::UnsupportedOperation("add_reference"))
    );
    assert_eq!(
        kernel.release_reference(object),
        Err(KernelError::UnsupportedOperation("release_reference"))
    );
}

#[test]
#[should_panic]
fn strict_counting_stops_on_a_stray_release() {
    let platform = MockPlatform::new();
    let mut kernel = kernel_with(&platform, &[16 * 1024], StrictReferenceCountingCollector::new());
    let object = node(&mut kernel, 0);
    let _ = kernel.release_reference(object + WORD);
}
