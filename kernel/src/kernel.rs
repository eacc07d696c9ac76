use kernel_shared::{
    board::BoardMemoryLayout,
    bugcheck::StopCode,
    config::KernelConfiguration,
    error::{KernelError, KernelResult},
    object::{TypeId, TypeTable},
    services::RuntimeServices,
    thread::{ThreadEntry, ThreadId, ThreadPriority},
    time::{SchedulerTime, SchedulerTimeSpan},
};
use klib::ByteSize;
use pal::{InterruptState, Platform, StackRegion};

use crate::{
    bug_check,
    gc::{CollectionReport, ConfiguredCollector, GarbageCollector, GlobalRoots},
    info,
    interrupts::InterruptDispatcher,
    logging,
    memory::MemoryManager,
    thread::{ThreadManager, WaitOutcome, WaitingRecord},
    verbose, warn, METADATA_BUILD_ARCH, METADATA_BUILD_TARGET, METADATA_COLLECTOR,
    METADATA_PROFILE, METADATA_VERSION,
};

/// The runtime kernel: heap, collector and scheduler of one board.
///
/// Board glue owns the single instance and forwards the timer interrupts,
/// device interrupts, the switch exception and thread exits to it.
pub struct Kernel<'p, P: Platform, C: GarbageCollector = ConfiguredCollector> {
    platform: &'p P,
    configuration: KernelConfiguration,
    memory: MemoryManager<'p>,
    threads: ThreadManager<'p, P>,
    collector: C,
    types: TypeTable,
    roots: GlobalRoots,
    interrupts: InterruptDispatcher<'p, P>,
    collections: usize,
}

impl<'p, P: Platform, C: GarbageCollector> Kernel<'p, P, C> {
    /// Brings up the heap and the system threads. Interrupts must still be
    /// masked; they come on when the scheduler starts.
    ///
    /// # Safety
    ///
    /// The heap ranges and the boot stack in `layout` must describe real,
    /// otherwise unused memory. `thread_exit` must be the address of a
    /// function that ends up in [`Kernel::on_thread_exit`].
    pub unsafe fn new(
        platform: &'p P,
        layout: &BoardMemoryLayout,
        configuration: KernelConfiguration,
        types: TypeTable,
        collector: C,
        thread_exit: usize,
    ) -> KernelResult<Self> {
        logging::set_max_level(configuration.log_level);
        info!(
            "Runtime kernel {} on {}",
            METADATA_VERSION.unwrap_or("unknown"),
            layout.name
        );
        info!(
            "Architecture {} ({}), profile {}, collector {} ({})",
            METADATA_BUILD_ARCH,
            METADATA_BUILD_TARGET,
            METADATA_PROFILE,
            collector.name(),
            METADATA_COLLECTOR
        );
        layout.validate()?;
        platform.init();

        let mut memory = MemoryManager::new(platform);
        memory.initialize(layout)?;

        let mut threads =
            ThreadManager::new(platform, configuration.quantum_milliseconds, thread_exit);
        let boot_stack = layout
            .boot_stack
            .map(|range| StackRegion::from_raw_parts(range.address, range.length));
        threads.initialize(&mut memory, boot_stack, configuration.default_stack_size)?;

        memory.initialization_complete(configuration.heap_fill);
        verbose!(
            "{} type(s) registered, {} of heap free",
            types.len(),
            ByteSize(memory.available_memory())
        );

        Ok(Self {
            platform,
            configuration,
            memory,
            threads,
            collector,
            types,
            roots: GlobalRoots::new(),
            interrupts: InterruptDispatcher::new(),
            collections: 0,
        })
    }

    pub fn configuration(&self) -> &KernelConfiguration {
        &self.configuration
    }

    pub fn memory(&self) -> &MemoryManager<'p> {
        &self.memory
    }

    pub fn threads(&self) -> &ThreadManager<'p, P> {
        &self.threads
    }

    pub fn threads_mut(&mut self) -> &mut ThreadManager<'p, P> {
        &mut self.threads
    }

    pub fn collector(&self) -> &C {
        &self.collector
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn collections(&self) -> usize {
        self.collections
    }

    /// # Safety
    ///
    /// See [`GlobalRoots::register`].
    pub unsafe fn register_global_root(&mut self, slot: *const usize) {
        self.roots.register(slot);
    }

    pub fn register_interrupt(
        &mut self,
        irq: u32,
        handler: impl FnMut(&mut ThreadManager<'p, P>) + 'p,
    ) {
        self.interrupts.register(irq, alloc::boxed::Box::new(handler));
    }

    /// Raw bytes, never scanned. Collects once before giving up.
    pub fn allocate(&mut self, size: usize) -> KernelResult<usize> {
        if let Some(address) = self.memory.allocate(size) {
            return Ok(address);
        }
        self.collect();
        self.memory
            .allocate(size)
            .ok_or(KernelError::OutOfMemory { requested: size })
    }

    /// A managed object of a registered type. `size` is raised to the
    /// type's instance size. Collects once before giving up.
    pub fn allocate_object(&mut self, type_id: TypeId, size: usize) -> KernelResult<usize> {
        let descriptor = self
            .types
            .get(type_id)
            .ok_or(KernelError::UnknownType(type_id))?;
        let size = size.max(descriptor.instance_size);
        let reference_count = self.collector.initial_reference_count();

        if let Some(object) = self.memory.allocate_object(type_id, size, reference_count) {
            return Ok(object);
        }
        let report = self.collect();
        verbose!(
            "Retrying {} byte allocation after freeing {}",
            size,
            ByteSize(report.bytes_freed)
        );
        match self.memory.allocate_object(type_id, size, reference_count) {
            Some(object) => Ok(object),
            None => {
                warn!("Out of memory: {} bytes of {}", size, type_id);
                Err(KernelError::OutOfMemory { requested: size })
            }
        }
    }

    pub fn release(&mut self, address: usize) {
        self.memory.release(address);
    }

    /// Runs the configured collector over every thread and every global root.
    pub fn collect(&mut self) -> CollectionReport {
        let _guard = InterruptState::disable(self.platform);
        self.threads.snapshot_current();
        let roots = (&self.threads, &self.roots);
        let report = self.collector.collect(&mut self.memory, &self.types, &roots);
        self.collections += 1;
        report
    }

    pub fn add_reference(&mut self, address: usize) -> KernelResult<()> {
        let _guard = InterruptState::disable(self.platform);
        self.collector.add_reference(&mut self.memory, address)
    }

    pub fn release_reference(&mut self, address: usize) -> KernelResult<()> {
        let _guard = InterruptState::disable(self.platform);
        self.collector
            .release_reference(&mut self.memory, &self.types, address)
    }

    pub fn create_thread(
        &mut self,
        entry: ThreadEntry,
        argument: usize,
        stack_size: Option<usize>,
        priority: ThreadPriority,
    ) -> KernelResult<ThreadId> {
        let stack_size = stack_size.unwrap_or(self.configuration.default_stack_size);
        match self
            .threads
            .create_thread(&mut self.memory, entry, argument, stack_size, priority)
        {
            Err(KernelError::OutOfMemory { .. }) => {
                self.collect();
                self.threads
                    .create_thread(&mut self.memory, entry, argument, stack_size, priority)
            }
            result => result,
        }
    }

    pub fn add_thread(&mut self, id: ThreadId) {
        self.threads.add_thread(id);
    }

    pub fn remove_thread(&mut self, id: ThreadId) {
        self.threads.remove_thread(id);
    }

    pub fn retire_thread(&mut self, id: ThreadId) {
        self.threads.retire_thread(&mut self.memory, id);
    }

    /// Creates a thread with the default stack and hands it to the scheduler.
    pub fn start_thread(
        &mut self,
        entry: ThreadEntry,
        argument: usize,
        priority: ThreadPriority,
    ) -> KernelResult<ThreadId> {
        let id = self.create_thread(entry, argument, None, priority)?;
        self.threads.add_thread(id);
        Ok(id)
    }

    pub fn yield_now(&mut self) {
        self.threads.yield_now();
    }

    pub fn switch_to_wait(&mut self, record: WaitingRecord) {
        self.threads.switch_to_wait(record);
    }

    pub fn wakeup(&mut self, id: ThreadId) -> bool {
        self.threads.wakeup(id)
    }

    pub fn sleep(&mut self, duration: SchedulerTimeSpan) {
        self.threads.sleep(duration);
    }

    pub fn take_wait_outcome(&mut self, id: ThreadId) -> Option<WaitOutcome> {
        self.threads.take_wait_outcome(id)
    }

    pub fn now(&self) -> SchedulerTime {
        self.threads.now()
    }

    /// Quantum timer interrupt.
    pub fn on_quantum_timer(&mut self) {
        let _guard = InterruptState::disable(self.platform);
        self.threads
            .install_interrupt_thread(|threads| threads.time_quantum_expired());
    }

    /// Wait timer interrupt.
    pub fn on_wait_timer(&mut self) {
        let _guard = InterruptState::disable(self.platform);
        let now = self.threads.now();
        self.threads
            .install_interrupt_thread(|threads| threads.wait_expired(now));
    }

    /// Device interrupt. False when no handler is registered for `irq`.
    pub fn process_interrupt(&mut self, irq: u32) -> bool {
        let _guard = InterruptState::disable(self.platform);
        let dispatcher = &mut self.interrupts;
        self.threads
            .install_interrupt_thread(|threads| dispatcher.dispatch(irq, threads))
    }

    /// Switch exception: `outgoing_stack_pointer` is where the handler left
    /// the registers of the thread being switched out.
    pub fn on_context_switch(&mut self, outgoing_stack_pointer: usize) {
        self.threads
            .complete_context_switch(&mut self.memory, Some(outgoing_stack_pointer));
    }

    /// Reached when a thread entry point returns.
    pub fn on_thread_exit(&mut self) {
        let _guard = InterruptState::disable(self.platform);
        let id = match self.threads.current_thread() {
            Some(id) => id,
            None => bug_check!(StopCode::NoCurrentThread, "thread exit before start"),
        };
        if self.threads.thread(id).map_or(true, |thread| thread.is_system()) {
            bug_check!(StopCode::ThreadExited, "system thread {} returned", id);
        }
        verbose!("Thread {} returned", id);
        self.threads.retire_thread(&mut self.memory, id);
    }

    /// Picks the first thread. Returns the idle stack top for
    /// [`Platform::enter_thread_mode`].
    pub fn start_threads(&mut self) -> usize {
        self.threads.start_threads()
    }

    /// Starts scheduling and leaves the boot stack for the idle thread.
    pub fn start_scheduler(&mut self, idle: extern "C" fn() -> !) -> ! {
        let stack_top = self.threads.start_threads();
        self.platform.enter_thread_mode(stack_top, idle)
    }

    /// Body of the idle thread.
    pub fn idle(platform: &P) -> ! {
        loop {
            platform.wait_for_interrupt();
        }
    }
}

impl<P: Platform, C: GarbageCollector> RuntimeServices for Kernel<'_, P, C> {
    fn allocate(&mut self, size: usize) -> anyhow::Result<usize> {
        Ok(Kernel::allocate(self, size)?)
    }

    fn allocate_object(&mut self, type_id: TypeId, size: usize) -> anyhow::Result<usize> {
        Ok(Kernel::allocate_object(self, type_id, size)?)
    }

    fn release(&mut self, address: usize) {
        Kernel::release(self, address)
    }

    fn add_reference(&mut self, address: usize) -> anyhow::Result<()> {
        Ok(Kernel::add_reference(self, address)?)
    }

    fn release_reference(&mut self, address: usize) -> anyhow::Result<()> {
        Ok(Kernel::release_reference(self, address)?)
    }

    fn collect(&mut self) -> anyhow::Result<usize> {
        Ok(Kernel::collect(self).objects_freed)
    }

    fn create_thread(
        &mut self,
        entry: ThreadEntry,
        argument: usize,
        stack_size: Option<usize>,
        priority: ThreadPriority,
    ) -> anyhow::Result<ThreadId> {
        Ok(Kernel::create_thread(self, entry, argument, stack_size, priority)?)
    }

    fn add_thread(&mut self, id: ThreadId) {
        Kernel::add_thread(self, id)
    }

    fn start_thread(
        &mut self,
        entry: ThreadEntry,
        argument: usize,
        priority: ThreadPriority,
    ) -> anyhow::Result<ThreadId> {
        Ok(Kernel::start_thread(self, entry, argument, priority)?)
    }

    fn current_thread(&self) -> Option<ThreadId> {
        self.threads.current_thread()
    }

    fn yield_now(&mut self) {
        Kernel::yield_now(self)
    }

    fn switch_to_wait(&mut self, timeout: SchedulerTime) {
        Kernel::switch_to_wait(self, WaitingRecord::new(timeout))
    }

    fn wakeup(&mut self, id: ThreadId) -> bool {
        Kernel::wakeup(self, id)
    }

    fn take_wait_outcome(&mut self, id: ThreadId) -> Option<WaitOutcome> {
        Kernel::take_wait_outcome(self, id)
    }

    fn sleep(&mut self, duration: SchedulerTimeSpan) {
        Kernel::sleep(self, duration)
    }

    fn now(&self) -> SchedulerTime {
        Kernel::now(self)
    }
}
