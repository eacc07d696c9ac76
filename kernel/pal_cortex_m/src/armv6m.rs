use crate::frame::{Architecture, CortexMContext};

/// Cortex-M0/M0+. No FPU, and the handler moves r8-r11 through low
/// registers, so the software frame is r4-r7 followed by r8-r11 and the
/// exception return value is a constant.
pub struct ArmV6M;

pub type ArmV6MContext = CortexMContext<ArmV6M>;

impl Architecture for ArmV6M {
    const SOFTWARE_FRAME_WORDS: usize = 8;

    fn software_slot(register: usize) -> Option<usize> {
        match register {
            4..=11 => Some(register - 4),
            _ => None,
        }
    }

    fn exc_return_slot() -> Option<usize> {
        None
    }

    #[cfg(target_arch = "arm")]
    fn capture_callee_saved(registers: &mut [usize; 8]) {
        // SAFETY: stores eight words into the array behind the pointer.
        unsafe {
            core::arch::asm!(
                "str r4, [{p}, #0]",
                "str r5, [{p}, #4]",
                "str r6, [{p}, #8]",
                "str r7, [{p}, #12]",
                "mov {t}, r8",
                "str {t}, [{p}, #16]",
                "mov {t}, r9",
                "str {t}, [{p}, #20]",
                "mov {t}, r10",
                "str {t}, [{p}, #24]",
                "mov {t}, r11",
                "str {t}, [{p}, #28]",
                p = in(reg) registers.as_mut_ptr(),
                t = out(reg) _,
                options(nostack, preserves_flags),
            );
        }
    }

    #[cfg(not(target_arch = "arm"))]
    fn capture_callee_saved(registers: &mut [usize; 8]) {
        registers.fill(0);
    }

    fn current_stack_pointer() -> usize {
        crate::armv7m::current_stack_pointer()
    }
}
