use crate::frame::{Architecture, CortexMContext};
#[cfg(feature = "vfp")]
use crate::frame::FPU_FRAME_WORDS;

/// Cortex-M3/M4/M7. The switch handler pushes `{r4-r11, lr}` with one
/// `stmdb`, plus s16-s31 when the outgoing thread has live FPU state.
pub struct ArmV7M;

pub type ArmV7MContext = CortexMContext<ArmV7M>;

const EXC_RETURN_SLOT: usize = 8;

impl Architecture for ArmV7M {
    const SOFTWARE_FRAME_WORDS: usize = 9;

    fn software_slot(register: usize) -> Option<usize> {
        match register {
            4..=11 => Some(register - 4),
            _ => None,
        }
    }

    fn exc_return_slot() -> Option<usize> {
        Some(EXC_RETURN_SLOT)
    }

    #[cfg(feature = "vfp")]
    fn extension_words(exc_return: usize) -> usize {
        // Bit 4 clear: the hardware stacked an extended frame and so did we.
        if exc_return & 0x10 == 0 {
            FPU_FRAME_WORDS
        } else {
            0
        }
    }

    #[cfg(target_arch = "arm")]
    fn capture_callee_saved(registers: &mut [usize; 8]) {
        // SAFETY: stores eight words into the array behind the pointer.
        unsafe {
            core::arch::asm!(
                "stmia {0}, {{r4-r11}}",
                in(reg) registers.as_mut_ptr(),
                options(nostack, preserves_flags),
            );
        }
    }

    #[cfg(not(target_arch = "arm"))]
    fn capture_callee_saved(registers: &mut [usize; 8]) {
        registers.fill(0);
    }

    fn current_stack_pointer() -> usize {
        current_stack_pointer()
    }
}

#[cfg(target_arch = "arm")]
pub(crate) fn current_stack_pointer() -> usize {
    let stack_pointer: usize;
    // SAFETY: reads sp only.
    unsafe {
        core::arch::asm!("mov {0}, sp", out(reg) stack_pointer, options(nomem, nostack, preserves_flags));
    }
    stack_pointer
}

/// Off target the closest thing to the stack pointer is a local's address.
#[cfg(not(target_arch = "arm"))]
#[inline(never)]
pub(crate) fn current_stack_pointer() -> usize {
    let marker = 0usize;
    core::hint::black_box(&marker) as *const usize as usize
}
