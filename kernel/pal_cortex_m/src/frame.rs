use core::{marker::PhantomData, ops::Range};

use pal::{ProcessorContext, StackRegion, ThreadStart};

use crate::switch;

/// Thumb state, the only valid execution state on M profile cores.
pub const INITIAL_XPSR: usize = 0x0100_0000;

/// Return to thread mode on the process stack, basic frame.
pub const EXC_RETURN_THREAD_PSP: usize = 0xFFFF_FFFD;

/// Return to thread mode on the process stack, extended (floating point) frame.
pub const EXC_RETURN_THREAD_PSP_FPU: usize = 0xFFFF_FFED;

const WORD: usize = core::mem::size_of::<usize>();

pub const REGISTER_COUNT: usize = 17;
pub const SP: usize = 13;
pub const LR: usize = 14;
pub const PC: usize = 15;
pub const XPSR: usize = 16;

/// Words the hardware stacks on exception entry: r0-r3, r12, lr, pc, xpsr.
const HARDWARE_FRAME_WORDS: usize = 8;

/// Software pushed floating point registers s16-s31.
#[cfg(feature = "vfp")]
pub(crate) const FPU_FRAME_WORDS: usize = 16;

/// What differs between M profile variants: how the switch handler lays out
/// the callee saved registers and how a live snapshot is taken.
pub trait Architecture {
    /// Words the switch handler pushes below the hardware frame.
    const SOFTWARE_FRAME_WORDS: usize;

    /// Slot of `register` within the software frame, if it lives there.
    fn software_slot(register: usize) -> Option<usize>;

    /// Slot of the saved EXC_RETURN value, if the handler stores one.
    fn exc_return_slot() -> Option<usize>;

    /// Extra words between the software and the hardware frame for a given EXC_RETURN.
    fn extension_words(_exc_return: usize) -> usize {
        0
    }

    /// Captures r4-r11 of the caller.
    fn capture_callee_saved(registers: &mut [usize; 8]);

    fn current_stack_pointer() -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// Registers live in a frame at `stack_pointer`.
    Parked,
    /// The thread is running, or `snapshot` holds a fresh capture.
    Live,
}

/// Register state of a Cortex-M thread.
pub struct CortexMContext<A> {
    stack: Range<usize>,
    stack_pointer: usize,
    state: FrameState,
    snapshot: [usize; REGISTER_COUNT],
    _architecture: PhantomData<A>,
}

fn hardware_slot(register: usize) -> Option<usize> {
    match register {
        0..=3 => Some(register),
        12 => Some(4),
        LR => Some(5),
        PC => Some(6),
        XPSR => Some(7),
        _ => None,
    }
}

impl<A: Architecture> CortexMContext<A> {
    fn word_address(&self, register: usize) -> Option<usize> {
        if self.state != FrameState::Parked {
            return None;
        }
        if let Some(slot) = A::software_slot(register) {
            return Some(self.stack_pointer + slot * WORD);
        }
        let exc_return = match A::exc_return_slot() {
            Some(slot) => self.read(self.stack_pointer + slot * WORD)?,
            None => EXC_RETURN_THREAD_PSP,
        };
        let hardware_base = self.stack_pointer
            + (A::SOFTWARE_FRAME_WORDS + A::extension_words(exc_return)) * WORD;
        hardware_slot(register).map(|slot| hardware_base + slot * WORD)
    }

    fn read(&self, address: usize) -> Option<usize> {
        if address < self.stack.start || address + WORD > self.stack.end {
            return None;
        }
        // SAFETY: within the stack handed to allocate/wrap_current.
        Some(unsafe { core::ptr::read_volatile(address as *const usize) })
    }

    fn write(&self, address: usize, value: usize) -> bool {
        if address < self.stack.start || address + WORD > self.stack.end {
            return false;
        }
        // SAFETY: see read.
        unsafe { core::ptr::write_volatile(address as *mut usize, value) };
        true
    }

    pub fn is_parked(&self) -> bool {
        self.state == FrameState::Parked
    }
}

impl<A: Architecture> ProcessorContext for CortexMContext<A> {
    fn allocate(stack: &StackRegion, start: ThreadStart) -> Self {
        // The hardware frame must be 8 byte aligned for exception return.
        let top = stack.top() & !7;
        let hardware_base = top - HARDWARE_FRAME_WORDS * WORD;
        let stack_pointer = hardware_base - A::SOFTWARE_FRAME_WORDS * WORD;

        let mut snapshot = [0usize; REGISTER_COUNT];
        snapshot[0] = start.argument;
        snapshot[SP] = hardware_base;
        snapshot[LR] = start.exit | 1;
        snapshot[PC] = start.entry & !1;
        snapshot[XPSR] = INITIAL_XPSR;

        let context = Self {
            stack: stack.range(),
            stack_pointer,
            state: FrameState::Parked,
            snapshot,
            _architecture: PhantomData,
        };

        for slot in 0..A::SOFTWARE_FRAME_WORDS {
            stack.write_word(stack_pointer + slot * WORD, 0);
        }
        if let Some(slot) = A::exc_return_slot() {
            stack.write_word(stack_pointer + slot * WORD, EXC_RETURN_THREAD_PSP);
        }
        for register in [0, 1, 2, 3, 12, LR, PC, XPSR] {
            if let Some(slot) = hardware_slot(register) {
                stack.write_word(hardware_base + slot * WORD, snapshot[register]);
            }
        }
        context
    }

    fn wrap_current(stack: &StackRegion) -> Self {
        let mut snapshot = [0usize; REGISTER_COUNT];
        snapshot[SP] = stack.top();
        Self {
            stack: stack.range(),
            stack_pointer: stack.top(),
            state: FrameState::Live,
            snapshot,
            _architecture: PhantomData,
        }
    }

    fn switch_to(&mut self) {
        self.state = FrameState::Live;
        switch::set_next_stack_pointer(self.stack_pointer);
    }

    fn save_stack_pointer(&mut self, stack_pointer: usize) {
        self.stack_pointer = stack_pointer;
        self.state = FrameState::Parked;
    }

    fn populate_from_current(&mut self) {
        let mut callee_saved = [0usize; 8];
        A::capture_callee_saved(&mut callee_saved);
        self.snapshot[4..12].copy_from_slice(&callee_saved);
        self.snapshot[SP] = A::current_stack_pointer();
        self.stack_pointer = self.snapshot[SP];
        self.state = FrameState::Live;
    }

    fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    fn program_counter(&self) -> usize {
        self.register(PC).unwrap_or(self.snapshot[PC])
    }

    fn root_registers(&self) -> &[usize] {
        match self.state {
            // Everything is on the stack, scanning the stack covers it.
            FrameState::Parked => &[],
            FrameState::Live => &self.snapshot[..SP],
        }
    }

    fn register(&self, index: usize) -> Option<usize> {
        if index >= REGISTER_COUNT {
            return None;
        }
        if index == SP {
            return Some(self.stack_pointer);
        }
        match self.word_address(index) {
            Some(address) => self.read(address),
            None => Some(self.snapshot[index]),
        }
    }

    fn set_register(&mut self, index: usize, value: usize) -> bool {
        if index >= REGISTER_COUNT || index == SP {
            return false;
        }
        self.snapshot[index] = value;
        match self.word_address(index) {
            Some(address) => self.write(address, value),
            None => true,
        }
    }
}
