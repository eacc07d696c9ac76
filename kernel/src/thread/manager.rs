use alloc::{collections::BTreeMap, collections::VecDeque, vec::Vec};

use kernel_shared::{
    bugcheck::StopCode,
    constants::{ARCH_WORD_SIZE, STACK_CANARY},
    error::{KernelError, KernelResult},
    thread::{ThreadEntry, ThreadId, ThreadPriority},
    time::{SchedulerTime, SchedulerTimeSpan},
};
use pal::{InterruptState, Platform, ProcessorContext, StackRegion, ThreadStart};

use super::{Thread, ThreadKind, ThreadState, WaitOutcome, WaitingRecord};
use crate::{bug_check, debug, info, logging, memory::MemoryManager, verbose};

/// Room for the initial exception frame, the FPU extension and the canary.
const MIN_STACK_SIZE: usize = 64 * ARCH_WORD_SIZE;

/// Single core scheduler.
///
/// `running` is the thread the scheduler picked, `current` the one whose
/// registers are on the processor. They differ between a reschedule and the
/// switch exception that completes it.
pub struct ThreadManager<'p, P: Platform> {
    platform: &'p P,
    threads: BTreeMap<ThreadId, Thread<P::Context>>,
    ready: VecDeque<ThreadId>,
    waiting: Vec<ThreadId>,
    running: Option<ThreadId>,
    current: Option<ThreadId>,
    idle: Option<ThreadId>,
    interrupt: Option<ThreadId>,
    in_interrupt: bool,
    /// Retired while their stack was still in use.
    zombies: Vec<ThreadId>,
    next_id: u32,
    quantum_milliseconds: u64,
    thread_exit: usize,
    switch_requested: bool,
}

impl<'p, P: Platform> ThreadManager<'p, P> {
    /// `thread_exit` is the return address of every thread entry point.
    pub fn new(platform: &'p P, quantum_milliseconds: u64, thread_exit: usize) -> Self {
        Self {
            platform,
            threads: BTreeMap::new(),
            ready: VecDeque::new(),
            waiting: Vec::new(),
            running: None,
            current: None,
            idle: None,
            interrupt: None,
            in_interrupt: false,
            zombies: Vec::new(),
            next_id: 1,
            quantum_milliseconds,
            thread_exit,
            switch_requested: false,
        }
    }

    /// Creates the interrupt thread around the boot stack and the idle thread
    /// on a fresh stack.
    pub fn initialize(
        &mut self,
        memory: &mut MemoryManager,
        boot_stack: Option<StackRegion>,
        idle_stack_size: usize,
    ) -> KernelResult<()> {
        let _guard = InterruptState::disable(self.platform);

        let boot_stack = match boot_stack {
            Some(stack) => {
                stack.write_canary(STACK_CANARY);
                stack
            }
            // SAFETY: an empty region never touches memory.
            None => unsafe { StackRegion::from_raw_parts(0, 0) },
        };
        let context = P::Context::wrap_current(&boot_stack);
        let interrupt = self.register(
            ThreadKind::Interrupt,
            ThreadPriority::HIGHEST,
            context,
            boot_stack,
            None,
        );
        self.interrupt = Some(interrupt);

        let (idle_stack, allocation) = self.allocate_stack(memory, idle_stack_size)?;
        let context = P::Context::wrap_current(&idle_stack);
        let idle = self.register(
            ThreadKind::Idle,
            ThreadPriority::LOWEST,
            context,
            idle_stack,
            Some(allocation),
        );
        self.idle = Some(idle);

        verbose!("Interrupt thread {}, idle thread {}", interrupt, idle);
        Ok(())
    }

    fn allocate_id(&mut self) -> ThreadId {
        loop {
            let id = ThreadId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.threads.contains_key(&id) {
                return id;
            }
        }
    }

    fn allocate_stack(
        &mut self,
        memory: &mut MemoryManager,
        stack_size: usize,
    ) -> KernelResult<(StackRegion, usize)> {
        let stack_size = match klib::align_up(stack_size, 8) {
            Some(aligned) if aligned >= MIN_STACK_SIZE => aligned,
            _ => return Err(KernelError::InvalidStackSize(stack_size)),
        };
        let address = memory
            .allocate(stack_size)
            .ok_or(KernelError::OutOfMemory {
                requested: stack_size,
            })?;
        // SAFETY: the heap handed this block to us alone.
        let stack = unsafe { StackRegion::from_raw_parts(address, stack_size) };
        stack.write_canary(STACK_CANARY);
        Ok((stack, address))
    }

    fn register(
        &mut self,
        kind: ThreadKind,
        priority: ThreadPriority,
        context: P::Context,
        stack: StackRegion,
        allocation: Option<usize>,
    ) -> ThreadId {
        let id = self.allocate_id();
        let mut thread = Thread::new(id, kind, priority, context, stack, allocation);
        if kind != ThreadKind::Normal {
            thread.state = ThreadState::Ready;
        }
        self.threads.insert(id, thread);
        id
    }

    /// Allocates a stack and builds the initial context. The thread does not
    /// run until [`ThreadManager::add_thread`].
    pub fn create_thread(
        &mut self,
        memory: &mut MemoryManager,
        entry: ThreadEntry,
        argument: usize,
        stack_size: usize,
        priority: ThreadPriority,
    ) -> KernelResult<ThreadId> {
        let _guard = InterruptState::disable(self.platform);
        let (stack, allocation) = self.allocate_stack(memory, stack_size)?;
        let context = P::Context::allocate(
            &stack,
            ThreadStart {
                entry: entry as usize,
                argument,
                exit: self.thread_exit,
            },
        );
        let id = self.register(ThreadKind::Normal, priority, context, stack, Some(allocation));
        debug!("Created thread {} with a {} byte stack", id, stack_size);
        Ok(id)
    }

    fn thread_mut(&mut self, id: ThreadId) -> &mut Thread<P::Context> {
        match self.threads.get_mut(&id) {
            Some(thread) => thread,
            None => bug_check!(StopCode::UnknownThread, "thread {} does not exist", id),
        }
    }

    fn priority_of(&self, id: ThreadId) -> ThreadPriority {
        self.threads
            .get(&id)
            .map_or(ThreadPriority::LOWEST, |t| t.priority)
    }

    fn is_system(&self, id: ThreadId) -> bool {
        self.threads.get(&id).map_or(true, |t| t.is_system())
    }

    /// Queues behind every thread of the same or higher priority.
    fn insert_ready(&mut self, id: ThreadId) {
        let priority = self.priority_of(id);
        let position = self
            .ready
            .iter()
            .position(|other| self.priority_of(*other) < priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(position, id);
    }

    pub fn add_thread(&mut self, id: ThreadId) {
        let _guard = InterruptState::disable(self.platform);
        let thread = self.thread_mut(id);
        if thread.is_system() || thread.state != ThreadState::Created {
            return;
        }
        thread.state = ThreadState::Ready;
        self.insert_ready(id);
        self.reschedule();
    }

    /// Takes a thread away from the scheduler without destroying it. It can
    /// be added again later.
    pub fn remove_thread(&mut self, id: ThreadId) {
        let _guard = InterruptState::disable(self.platform);
        let was_running = self.detach(id);
        let thread = self.thread_mut(id);
        if thread.state != ThreadState::Retired {
            thread.state = ThreadState::Created;
        }
        if was_running {
            self.reschedule();
        }
    }

    /// Unlinks `id` from whichever queue holds it. True if it was running.
    fn detach(&mut self, id: ThreadId) -> bool {
        let state = self.thread_mut(id).state;
        match state {
            ThreadState::Ready => self.ready.retain(|other| *other != id),
            ThreadState::Waiting => {
                self.waiting.retain(|other| *other != id);
                self.thread_mut(id).wait = None;
                self.recompute_wait_timer();
            }
            ThreadState::Running if self.running == Some(id) => {
                self.running = None;
                return true;
            }
            _ => {}
        }
        false
    }

    pub fn yield_now(&mut self) {
        let _guard = InterruptState::disable(self.platform);
        self.requeue_running();
        self.reschedule();
    }

    fn requeue_running(&mut self) {
        let id = match self.running {
            Some(id) if !self.is_system(id) => id,
            _ => return,
        };
        self.thread_mut(id).state = ThreadState::Ready;
        self.running = None;
        self.insert_ready(id);
    }

    /// Picks the next thread, arms or cancels the quantum and pends a switch
    /// when the pick differs from what runs now.
    pub fn reschedule(&mut self) {
        let _guard = InterruptState::disable(self.platform);

        if let Some(running) = self.running.filter(|id| !self.is_system(*id)) {
            let preempted = self
                .ready
                .front()
                .map_or(false, |head| self.priority_of(*head) > self.priority_of(running));
            if preempted {
                self.requeue_running();
            }
        }

        if self.running.map_or(true, |id| self.is_system(id)) {
            match self.ready.pop_front() {
                Some(next) => {
                    self.thread_mut(next).state = ThreadState::Running;
                    self.running = Some(next);
                }
                None => self.running = self.idle,
            }
        }

        let competing = match self.running {
            Some(id) if !self.is_system(id) => self
                .ready
                .front()
                .map_or(false, |head| self.priority_of(*head) == self.priority_of(id)),
            _ => false,
        };
        if competing {
            self.set_next_quantum_timer();
        } else {
            self.cancel_quantum_timer();
        }

        if self.running.is_some() && self.running != self.current {
            self.switch_requested = true;
            self.platform.request_context_switch();
        }
    }

    /// Blocks the running thread on `record`.
    pub fn switch_to_wait(&mut self, record: WaitingRecord) {
        let _guard = InterruptState::disable(self.platform);
        if record.processed {
            return;
        }
        let id = match self.running.filter(|id| !self.is_system(*id)) {
            Some(id) => id,
            None => bug_check!(StopCode::NoCurrentThread, "wait outside a managed thread"),
        };
        let thread = self.thread_mut(id);
        thread.state = ThreadState::Waiting;
        thread.wait = Some(WaitingRecord {
            outcome: WaitOutcome::Pending,
            ..record
        });
        self.waiting.push(id);
        self.running = None;
        self.recompute_wait_timer();
        self.reschedule();
    }

    pub fn sleep(&mut self, duration: SchedulerTimeSpan) {
        let deadline = self.now() + duration;
        self.switch_to_wait(WaitingRecord::new(deadline));
    }

    fn finish_wait(&mut self, id: ThreadId, outcome: WaitOutcome) {
        self.waiting.retain(|other| *other != id);
        let thread = self.thread_mut(id);
        if let Some(record) = thread.wait.as_mut() {
            record.complete(outcome);
        }
        thread.state = ThreadState::Ready;
        self.insert_ready(id);
    }

    /// Ends the wait of `id` with [`WaitOutcome::Signaled`]. False if it was
    /// not waiting, which makes racing wakeups harmless.
    pub fn wakeup(&mut self, id: ThreadId) -> bool {
        let _guard = InterruptState::disable(self.platform);
        if self.thread_mut(id).state != ThreadState::Waiting {
            return false;
        }
        self.finish_wait(id, WaitOutcome::Signaled);
        self.recompute_wait_timer();
        self.reschedule();
        true
    }

    /// Quantum timer interrupt.
    pub fn time_quantum_expired(&mut self) {
        if self.platform.interrupts_enabled() {
            bug_check!(StopCode::InterruptsEnabled, "quantum expiry with interrupts enabled");
        }
        self.requeue_running();
        self.reschedule();
    }

    /// Wait timer interrupt: times out every wait whose deadline has passed.
    pub fn wait_expired(&mut self, now: SchedulerTime) {
        let _guard = InterruptState::disable(self.platform);
        let expired: Vec<ThreadId> = self
            .waiting
            .iter()
            .copied()
            .filter(|id| {
                self.threads
                    .get(id)
                    .and_then(|t| t.wait)
                    .map_or(false, |record| record.timeout <= now)
            })
            .collect();
        for id in expired.iter() {
            self.finish_wait(*id, WaitOutcome::TimedOut);
        }
        self.recompute_wait_timer();
        if !expired.is_empty() {
            verbose!("{} wait(s) timed out at {}", expired.len(), now);
            self.reschedule();
        }
    }

    fn recompute_wait_timer(&mut self) {
        let next = self
            .waiting
            .iter()
            .filter_map(|id| self.threads.get(id).and_then(|t| t.wait))
            .map(|record| record.timeout)
            .min()
            .unwrap_or(SchedulerTime::MAX);
        self.set_next_wait_timer(next);
    }

    /// Arms the wait timer for `time`, `SchedulerTime::MAX` cancels it.
    /// Deadlines past the counter width are clamped, the expiry handler
    /// re-arms for the rest.
    pub fn set_next_wait_timer(&self, time: SchedulerTime) {
        let timer = self.platform.wait_timer();
        if time.is_never() {
            timer.cancel();
            return;
        }
        let delta = time.ticks_until(self.now()).min(timer.max_delta());
        timer.schedule(delta);
    }

    pub fn set_next_quantum_timer(&self) {
        let timer = self.platform.quantum_timer();
        let ticks = SchedulerTimeSpan::from_milliseconds(
            self.quantum_milliseconds,
            timer.ticks_per_second(),
        )
        .ticks()
        .clamp(1, timer.max_ticks());
        timer.schedule(ticks);
    }

    pub fn cancel_quantum_timer(&self) {
        self.platform.quantum_timer().cancel();
    }

    pub fn now(&self) -> SchedulerTime {
        SchedulerTime::from_ticks(self.platform.wait_timer().now())
    }

    /// Destroys a thread. The stack goes back to the heap right away unless
    /// the thread is still executing on it, then after the next switch.
    pub fn retire_thread(&mut self, memory: &mut MemoryManager, id: ThreadId) {
        let _guard = InterruptState::disable(self.platform);
        let thread = self.thread_mut(id);
        if thread.is_system() {
            bug_check!(StopCode::IllegalSchedulerState, "thread {} cannot be retired", id);
        }
        if thread.state == ThreadState::Retired {
            return;
        }
        self.detach(id);
        let thread = self.thread_mut(id);
        thread.state = ThreadState::Retired;
        thread.wait = None;

        if self.current == Some(id) {
            self.zombies.push(id);
        } else {
            self.release_thread(memory, id);
        }
        debug!("Retired thread {}", id);
        self.reschedule();
    }

    fn release_thread(&mut self, memory: &mut MemoryManager, id: ThreadId) {
        if let Some(thread) = self.threads.remove(&id) {
            if let Some(allocation) = thread.stack_allocation {
                memory.release(allocation);
            }
        }
    }

    /// Runs from the switch exception. Saves the outgoing stack pointer,
    /// checks its canary, installs the thread picked by the last reschedule
    /// and frees stacks of threads that retired themselves.
    pub fn complete_context_switch(
        &mut self,
        memory: &mut MemoryManager,
        outgoing_stack_pointer: Option<usize>,
    ) {
        let _guard = InterruptState::disable(self.platform);
        self.switch_requested = false;

        if let Some(outgoing) = self.current {
            if let Some(thread) = self.threads.get_mut(&outgoing) {
                if let Some(stack_pointer) = outgoing_stack_pointer {
                    thread.context.save_stack_pointer(stack_pointer);
                }
                if !thread.stack_is_intact() {
                    bug_check!(StopCode::StackCorruption, "thread {} overran its stack", outgoing);
                }
            }
        }

        let incoming = match self.running.or(self.idle) {
            Some(id) => id,
            None => bug_check!(StopCode::NoCurrentThread, "nothing to switch to"),
        };
        self.current = Some(incoming);

        for zombie in core::mem::take(&mut self.zombies) {
            if zombie == incoming {
                self.zombies.push(zombie);
            } else {
                self.release_thread(memory, zombie);
            }
        }

        logging::set_current_thread(Some(incoming));
        self.thread_mut(incoming).context.switch_to();
    }

    /// Runs `f` with the interrupt thread as the current thread.
    pub fn install_interrupt_thread<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let interrupt = match self.interrupt {
            Some(id) => id,
            None => bug_check!(StopCode::NoCurrentThread, "no interrupt thread"),
        };
        if !self.thread_mut(interrupt).stack_is_intact() {
            bug_check!(StopCode::StackCorruption, "interrupt stack overran");
        }
        let nested = core::mem::replace(&mut self.in_interrupt, true);
        logging::set_current_thread(Some(interrupt));
        let result = f(self);
        self.in_interrupt = nested;
        logging::set_current_thread(self.current_thread());
        result
    }

    /// Makes the idle thread current and picks the first thread to run.
    /// Returns the top of the idle stack, where thread mode continues.
    pub fn start_threads(&mut self) -> usize {
        let _guard = InterruptState::disable(self.platform);
        let idle = match self.idle {
            Some(id) => id,
            None => bug_check!(
                StopCode::NoCurrentThread,
                "scheduler started before initialization"
            ),
        };
        self.current = Some(idle);
        self.thread_mut(idle).state = ThreadState::Running;
        logging::set_current_thread(Some(idle));
        self.reschedule();
        let picked = self.running.filter(|id| *id != idle).map_or(0, |_| 1);
        info!("Scheduler started, {} thread(s) ready", self.ready.len() + picked);
        self.thread_mut(idle).stack().top()
    }

    /// Captures the registers of the current thread before a collection.
    pub fn snapshot_current(&mut self) {
        if let Some(id) = self.current_thread() {
            self.thread_mut(id).context.populate_from_current();
        }
    }

    /// Feeds every potential reference held by a live thread to `visitor`.
    pub fn visit_roots(&self, visitor: &mut dyn FnMut(usize)) {
        for thread in self.threads.values() {
            if thread.state != ThreadState::Retired {
                thread.visit_roots(visitor);
            }
        }
    }

    /// Outcome of the last wait of `id`, once it ended.
    pub fn take_wait_outcome(&mut self, id: ThreadId) -> Option<WaitOutcome> {
        let thread = self.threads.get_mut(&id)?;
        match thread.wait {
            Some(record) if record.processed => {
                thread.wait = None;
                Some(record.outcome)
            }
            _ => None,
        }
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread<P::Context>> {
        self.threads.get(&id)
    }

    pub fn running_thread(&self) -> Option<ThreadId> {
        self.running
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        if self.in_interrupt {
            self.interrupt
        } else {
            self.current
        }
    }

    pub fn idle_thread(&self) -> Option<ThreadId> {
        self.idle
    }

    pub fn interrupt_thread(&self) -> Option<ThreadId> {
        self.interrupt
    }

    pub fn ready_threads(&self) -> Vec<ThreadId> {
        self.ready.iter().copied().collect()
    }

    pub fn waiting_threads(&self) -> Vec<ThreadId> {
        self.waiting.clone()
    }

    pub fn switch_requested(&self) -> bool {
        self.switch_requested
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}
