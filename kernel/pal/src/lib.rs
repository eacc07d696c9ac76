#![cfg_attr(not(test), no_std)]

mod context;
mod interrupts;
mod stack;
mod timer;

pub use context::{ProcessorContext, ThreadStart};
pub use interrupts::{InterruptControl, InterruptState};
pub use stack::StackRegion;
pub use timer::{CompareTimer, CountdownTimer};

pub trait HardwareControl {
    fn init(&self);
    fn halt(&self) -> !;
}

/// Everything the kernel needs from a board: interrupt masking, the two
/// scheduler timers and the architectural context switch.
pub trait Platform: HardwareControl + InterruptControl {
    type Context: ProcessorContext;

    fn quantum_timer(&self) -> &dyn CountdownTimer;
    fn wait_timer(&self) -> &dyn CompareTimer;

    /// Pends the low priority switch exception. The switch itself happens
    /// when the kernel runs `complete_context_switch` from that exception.
    fn request_context_switch(&self);

    /// Sleeps until the next interrupt. Used by the idle thread.
    fn wait_for_interrupt(&self);

    /// Leaves the boot stack for good: thread mode continues on `stack_top`
    /// in `continuation`.
    fn enter_thread_mode(&self, stack_top: usize, continuation: extern "C" fn() -> !) -> !;
}
