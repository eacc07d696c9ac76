#![allow(dead_code)]

use std::cell::Cell;

use kernel_shared::{
    board::BoardMemoryLayout,
    config::{HeapFill, KernelConfiguration, LogLevel},
    object::{TypeDescriptor, TypeId, TypeLayout, TypeTable},
};
use pal::{
    CompareTimer, CountdownTimer, HardwareControl, InterruptControl, Platform, ProcessorContext,
    StackRegion, ThreadStart,
};
use rtkernel::{gc::GarbageCollector, Kernel};

pub const WORD: usize = std::mem::size_of::<usize>();
pub const TICKS_PER_SECOND: u64 = 1_000_000;
pub const THREAD_EXIT: usize = 0x0800_0101;
pub const STACK_SIZE: usize = 128 * WORD;

pub const NODE: TypeId = TypeId(1);
pub const NODE_ARRAY: TypeId = TypeId(2);
pub const STRING: TypeId = TypeId(3);

pub struct MockCountdown {
    armed: Cell<Option<u64>>,
    schedules: Cell<usize>,
}

impl MockCountdown {
    pub fn armed_ticks(&self) -> Option<u64> {
        self.armed.get()
    }

    pub fn schedules(&self) -> usize {
        self.schedules.get()
    }
}

impl CountdownTimer for MockCountdown {
    fn schedule(&self, ticks: u64) {
        assert!(ticks <= self.max_ticks());
        self.armed.set(Some(ticks));
        self.schedules.set(self.schedules.get() + 1);
    }

    fn cancel(&self) {
        self.armed.set(None);
    }

    fn max_ticks(&self) -> u64 {
        0x00FF_FFFF
    }

    fn is_armed(&self) -> bool {
        self.armed.get().is_some()
    }

    fn ticks_per_second(&self) -> u64 {
        TICKS_PER_SECOND
    }
}

pub struct MockCompare {
    now: Cell<u64>,
    delta: Cell<Option<u64>>,
}

impl MockCompare {
    pub fn advance(&self, ticks: u64) {
        self.now.set(self.now.get() + ticks);
    }

    pub fn armed_delta(&self) -> Option<u64> {
        self.delta.get()
    }
}

impl CompareTimer for MockCompare {
    fn now(&self) -> u64 {
        self.now.get()
    }

    fn schedule(&self, delta: u64) {
        assert!(delta <= self.max_delta());
        self.delta.set(Some(delta));
    }

    fn cancel(&self) {
        self.delta.set(None);
    }

    fn max_delta(&self) -> u64 {
        u32::MAX as u64
    }

    fn ticks_per_second(&self) -> u64 {
        TICKS_PER_SECOND
    }
}

/// Register state kept entirely in memory. Tests plant register values with
/// `set_register`.
pub struct MockContext {
    stack_pointer: usize,
    registers: [usize; 17],
    live: bool,
}

impl ProcessorContext for MockContext {
    fn allocate(stack: &StackRegion, start: ThreadStart) -> Self {
        let mut registers = [0; 17];
        registers[0] = start.argument;
        registers[14] = start.exit;
        registers[15] = start.entry;
        Self {
            stack_pointer: stack.top() - 16 * WORD,
            registers,
            live: false,
        }
    }

    fn wrap_current(stack: &StackRegion) -> Self {
        Self {
            stack_pointer: stack.top(),
            registers: [0; 17],
            live: true,
        }
    }

    fn switch_to(&mut self) {
        self.live = true;
    }

    fn save_stack_pointer(&mut self, stack_pointer: usize) {
        self.stack_pointer = stack_pointer;
        self.live = false;
    }

    fn populate_from_current(&mut self) {
        self.live = true;
    }

    fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    fn program_counter(&self) -> usize {
        self.registers[15]
    }

    fn root_registers(&self) -> &[usize] {
        &self.registers[..13]
    }

    fn register(&self, index: usize) -> Option<usize> {
        self.registers.get(index).copied()
    }

    fn set_register(&mut self, index: usize, value: usize) -> bool {
        match self.registers.get_mut(index) {
            Some(register) => {
                *register = value;
                true
            }
            None => false,
        }
    }
}

pub struct MockPlatform {
    enabled: Cell<bool>,
    pub quantum: MockCountdown,
    pub wait: MockCompare,
    switch_requests: Cell<usize>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            enabled: Cell::new(false),
            quantum: MockCountdown {
                armed: Cell::new(None),
                schedules: Cell::new(0),
            },
            wait: MockCompare {
                now: Cell::new(0),
                delta: Cell::new(None),
            },
            switch_requests: Cell::new(0),
        }
    }

    pub fn switch_requests(&self) -> usize {
        self.switch_requests.get()
    }

    pub fn enable_interrupts(&self) {
        self.enabled.set(true);
    }
}

impl HardwareControl for MockPlatform {
    fn init(&self) {
        self.quantum.cancel();
        self.wait.cancel();
    }

    fn halt(&self) -> ! {
        panic!("halted")
    }
}

impl InterruptControl for MockPlatform {
    fn disable_interrupts(&self) -> bool {
        self.enabled.replace(false)
    }

    fn restore_interrupts(&self, were_enabled: bool) {
        if were_enabled {
            self.enabled.set(true);
        }
    }

    fn interrupts_enabled(&self) -> bool {
        self.enabled.get()
    }
}

impl Platform for MockPlatform {
    type Context = MockContext;

    fn quantum_timer(&self) -> &dyn CountdownTimer {
        &self.quantum
    }

    fn wait_timer(&self) -> &dyn CompareTimer {
        &self.wait
    }

    fn request_context_switch(&self) {
        self.switch_requests.set(self.switch_requests.get() + 1);
    }

    fn wait_for_interrupt(&self) {}

    fn enter_thread_mode(&self, _stack_top: usize, continuation: extern "C" fn() -> !) -> ! {
        continuation()
    }
}

/// Word aligned memory that outlives the test.
pub fn leak_words(words: usize) -> usize {
    let memory: &'static mut [usize] = Vec::leak(vec![0usize; words]);
    memory.as_mut_ptr() as usize
}

/// A board with one heap range per entry of `heap_bytes` and a leaked boot stack.
pub fn layout(heap_bytes: &[usize]) -> BoardMemoryLayout {
    let mut builder = BoardMemoryLayout::builder("mock").clock_frequency(TICKS_PER_SECOND);
    for bytes in heap_bytes {
        builder = builder.heap(leak_words((bytes + WORD - 1) / WORD), *bytes);
    }
    builder
        .boot_stack(leak_words(STACK_SIZE / WORD), STACK_SIZE)
        .build()
        .unwrap()
}

pub fn configuration() -> KernelConfiguration {
    KernelConfiguration {
        quantum_milliseconds: 20,
        default_stack_size: STACK_SIZE,
        heap_fill: HeapFill::Zero,
        log_level: LogLevel::WARNING,
    }
}

pub fn types() -> TypeTable {
    [
        TypeDescriptor::new(NODE, "Node", 2 * WORD, TypeLayout::Fields(&[0])),
        TypeDescriptor::new(NODE_ARRAY, "Node[]", 0, TypeLayout::ReferenceArray),
        TypeDescriptor::new(STRING, "String", 0, TypeLayout::Opaque),
    ]
    .into_iter()
    .collect()
}

pub fn kernel_with<'p, C: GarbageCollector>(
    platform: &'p MockPlatform,
    heap_bytes: &[usize],
    collector: C,
) -> Kernel<'p, MockPlatform, C> {
    let layout = layout(heap_bytes);
    unsafe { Kernel::new(platform, &layout, configuration(), types(), collector, THREAD_EXIT) }
        .unwrap()
}

pub extern "C" fn thread_body(_argument: usize) {}

/// What the switch exception does: hands the outgoing stack pointer to the
/// kernel, which installs the thread the last reschedule picked.
pub fn take_switch<C: GarbageCollector>(kernel: &mut Kernel<'_, MockPlatform, C>) {
    let stack_pointer = kernel
        .threads()
        .current_thread()
        .and_then(|id| kernel.threads().thread(id))
        .map(|thread| thread.context().stack_pointer())
        .unwrap_or(0);
    kernel.on_context_switch(stack_pointer);
}
