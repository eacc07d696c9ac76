use kernel_shared::{
    constants::STACK_CANARY,
    thread::{ThreadId, ThreadPriority},
    time::SchedulerTime,
};
use pal::{ProcessorContext, StackRegion};

mod manager;

pub use kernel_shared::thread::WaitOutcome;
pub use manager::ThreadManager;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ThreadState {
    /// Registered but not handed to the scheduler yet, or removed from it.
    Created,
    Ready,
    Running,
    Waiting,
    Retired,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ThreadKind {
    Normal,
    /// Runs when nothing else is ready. Never queued, never retired.
    Idle,
    /// Owns the boot stack that handlers run on. Never queued, never retired.
    Interrupt,
}

/// Why a thread is blocked, and how the wait ended.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct WaitingRecord {
    /// `SchedulerTime::MAX` waits forever.
    pub timeout: SchedulerTime,
    pub outcome: WaitOutcome,
    pub processed: bool,
}

impl WaitingRecord {
    pub fn new(timeout: SchedulerTime) -> Self {
        Self {
            timeout,
            outcome: WaitOutcome::Pending,
            processed: false,
        }
    }

    pub fn forever() -> Self {
        Self::new(SchedulerTime::MAX)
    }

    pub fn has_timeout(&self) -> bool {
        !self.timeout.is_never()
    }

    fn complete(&mut self, outcome: WaitOutcome) {
        self.outcome = outcome;
        self.processed = true;
    }
}

pub struct Thread<C> {
    id: ThreadId,
    state: ThreadState,
    priority: ThreadPriority,
    kind: ThreadKind,
    context: C,
    stack: StackRegion,
    /// Heap block backing the stack. `None` for stacks the board provided.
    stack_allocation: Option<usize>,
    wait: Option<WaitingRecord>,
}

impl<C: ProcessorContext> Thread<C> {
    pub(crate) fn new(
        id: ThreadId,
        kind: ThreadKind,
        priority: ThreadPriority,
        context: C,
        stack: StackRegion,
        stack_allocation: Option<usize>,
    ) -> Self {
        Thread {
            id,
            state: ThreadState::Created,
            priority,
            kind,
            context,
            stack,
            stack_allocation,
            wait: None,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn priority(&self) -> ThreadPriority {
        self.priority
    }

    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    pub fn is_system(&self) -> bool {
        self.kind != ThreadKind::Normal
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn stack(&self) -> &StackRegion {
        &self.stack
    }

    pub fn wait_record(&self) -> Option<&WaitingRecord> {
        self.wait.as_ref()
    }

    pub fn stack_is_intact(&self) -> bool {
        self.stack.is_empty() || self.stack.check_canary(STACK_CANARY)
    }

    /// Every word that may hold a reference: captured registers, then the
    /// live part of the stack.
    pub fn visit_roots(&self, visitor: &mut dyn FnMut(usize)) {
        for register in self.context.root_registers() {
            visitor(*register);
        }
        // A stack pointer outside the stack means the snapshot is unusable,
        // fall back to scanning all of it.
        let stack_pointer = self.context.stack_pointer();
        let from = if self.stack.contains(stack_pointer) || stack_pointer == self.stack.top() {
            stack_pointer
        } else {
            self.stack.base()
        };
        for word in self.stack.live_words(from) {
            visitor(word);
        }
    }
}
