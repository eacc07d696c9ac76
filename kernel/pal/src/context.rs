use crate::StackRegion;

/// Where a freshly allocated context starts executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadStart {
    pub entry: usize,
    pub argument: usize,
    /// Return address of the entry function. Retires the thread.
    pub exit: usize,
}

/// Register state of a thread that is not running.
pub trait ProcessorContext {
    /// Builds the initial exception frame at the top of `stack` so that the
    /// first switch to this context enters `start.entry(start.argument)`.
    fn allocate(stack: &StackRegion, start: ThreadStart) -> Self
    where
        Self: Sized;

    /// Context for code that already runs on `stack`, like the boot or idle thread.
    fn wrap_current(stack: &StackRegion) -> Self
    where
        Self: Sized;

    /// Makes this context the one the pending switch exception returns into.
    fn switch_to(&mut self);

    /// Records the stack pointer of an outgoing thread after its registers
    /// were pushed.
    fn save_stack_pointer(&mut self, stack_pointer: usize);

    /// Snapshot of the calling thread's callee saved registers and stack pointer.
    fn populate_from_current(&mut self);

    fn stack_pointer(&self) -> usize;
    fn program_counter(&self) -> usize;

    /// Registers that may hold references and are not on the thread's stack.
    fn root_registers(&self) -> &[usize];

    fn register(&self, index: usize) -> Option<usize>;
    fn set_register(&mut self, index: usize, value: usize) -> bool;
}
