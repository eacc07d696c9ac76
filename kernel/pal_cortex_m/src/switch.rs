use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Once;

/// Stack pointer the switch handler resumes, published by `switch_to`.
static NEXT_STACK_POINTER: AtomicUsize = AtomicUsize::new(0);

/// Kernel side of the switch: receives the outgoing stack pointer, picks the
/// incoming context and calls its `switch_to`.
static SWITCH_HANDLER: Once<fn(usize)> = Once::new();

pub fn install_switch_handler(handler: fn(usize)) {
    SWITCH_HANDLER.call_once(|| handler);
}

pub(crate) fn set_next_stack_pointer(stack_pointer: usize) {
    NEXT_STACK_POINTER.store(stack_pointer, Ordering::SeqCst);
}

pub fn next_stack_pointer() -> usize {
    NEXT_STACK_POINTER.load(Ordering::SeqCst)
}

/// Called by the PendSV handler with the outgoing frame already pushed.
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
pub(crate) extern "C" fn switch_stacks(outgoing: usize) -> usize {
    set_next_stack_pointer(outgoing);
    if let Some(handler) = SWITCH_HANDLER.get() {
        handler(outgoing);
    }
    next_stack_pointer()
}

#[cfg(all(target_arch = "arm", not(armv6m)))]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    #[cfg(feature = "vfp")]
    core::arch::naked_asm!(
        "mrs r0, psp",
        "tst lr, #0x10",
        "it eq",
        "vstmdbeq r0!, {{s16-s31}}",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "tst lr, #0x10",
        "it eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr psp, r0",
        "bx lr",
        switch = sym switch_stacks,
    );
    #[cfg(not(feature = "vfp"))]
    core::arch::naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",
        "bx lr",
        switch = sym switch_stacks,
    );
}

#[cfg(all(target_arch = "arm", armv6m))]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    // Thumb-1 can only store r0-r7, high registers travel through r4-r7.
    core::arch::naked_asm!(
        "mrs r0, psp",
        "subs r0, #32",
        "stmia r0!, {{r4-r7}}",
        "mov r4, r8",
        "mov r5, r9",
        "mov r6, r10",
        "mov r7, r11",
        "stmia r0!, {{r4-r7}}",
        "subs r0, #32",
        "bl {switch}",
        "adds r0, #16",
        "ldmia r0!, {{r4-r7}}",
        "mov r8, r4",
        "mov r9, r5",
        "mov r10, r6",
        "mov r11, r7",
        "msr psp, r0",
        "subs r0, #32",
        "ldmia r0!, {{r4-r7}}",
        "movs r0, #2",
        "mvns r0, r0",
        "bx r0",
        switch = sym switch_stacks,
    );
}

/// Moves thread mode onto the process stack at `stack_top` and continues in
/// `continuation`. The boot stack stays with the handlers.
///
/// # Safety
///
/// `stack_top` must be the 8 byte aligned top of a stack nothing else uses.
#[cfg(target_arch = "arm")]
#[unsafe(naked)]
pub unsafe extern "C" fn run_on_process_stack(
    stack_top: usize,
    continuation: extern "C" fn() -> !,
) -> ! {
    core::arch::naked_asm!(
        "msr psp, r0",
        "movs r2, #2",
        "msr control, r2",
        "isb",
        "bx r1",
    );
}

/// # Safety
///
/// Off target there is no separate process stack, the continuation simply runs.
#[cfg(not(target_arch = "arm"))]
pub unsafe extern "C" fn run_on_process_stack(
    _stack_top: usize,
    continuation: extern "C" fn() -> !,
) -> ! {
    continuation()
}
