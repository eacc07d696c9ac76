#![cfg_attr(not(test), no_std)]

mod armv6m;
mod armv7m;
mod compare;
mod frame;
mod primask;
mod switch;
mod systick;

use core::marker::PhantomData;

pub use armv6m::{ArmV6M, ArmV6MContext};
pub use armv7m::{ArmV7M, ArmV7MContext};
pub use compare::{CompareTimerRegisters, CompareWaitTimer};
pub use frame::{
    Architecture, CortexMContext, EXC_RETURN_THREAD_PSP, EXC_RETURN_THREAD_PSP_FPU, INITIAL_XPSR,
};
pub use primask::Primask;
pub use switch::{install_switch_handler, next_stack_pointer, run_on_process_stack};
pub use systick::{SysTickRegisters, SysTickTimer, SYSTICK_MAX_RELOAD};

use pal::{CompareTimer, CountdownTimer, HardwareControl, InterruptControl, Platform, ProcessorContext};

/// System handler priority register 3, holds the PendSV and SysTick priorities.
#[cfg(target_arch = "arm")]
const SHPR3: usize = 0xE000_ED20;

pub struct CortexMPlatform<C> {
    primask: Primask,
    systick: SysTickTimer,
    wait_timer: CompareWaitTimer,
    #[cfg(not(target_arch = "arm"))]
    switch_pending: core::sync::atomic::AtomicBool,
    _context: PhantomData<C>,
}

impl<C> CortexMPlatform<C> {
    pub const fn new(systick: SysTickTimer, wait_timer: CompareWaitTimer) -> Self {
        Self {
            primask: Primask::new(),
            systick,
            wait_timer,
            #[cfg(not(target_arch = "arm"))]
            switch_pending: core::sync::atomic::AtomicBool::new(false),
            _context: PhantomData,
        }
    }

    /// Whether a switch was requested and not yet taken. Only meaningful off target.
    #[cfg(not(target_arch = "arm"))]
    pub fn take_pending_switch(&self) -> bool {
        self.switch_pending
            .swap(false, core::sync::atomic::Ordering::SeqCst)
    }
}

impl<C> HardwareControl for CortexMPlatform<C> {
    fn init(&self) {
        // PendSV and SysTick at the lowest priority, so a switch never
        // preempts another handler.
        #[cfg(target_arch = "arm")]
        unsafe {
            let shpr3 = SHPR3 as *mut u32;
            let value = core::ptr::read_volatile(shpr3);
            core::ptr::write_volatile(shpr3, value | 0xFFFF_0000);
        }
        self.systick.cancel();
        self.wait_timer.cancel();
    }

    fn halt(&self) -> ! {
        self.primask.disable_interrupts();
        loop {
            sleep_until_interrupt();
        }
    }
}

impl<C> InterruptControl for CortexMPlatform<C> {
    fn disable_interrupts(&self) -> bool {
        self.primask.disable_interrupts()
    }

    fn restore_interrupts(&self, were_enabled: bool) {
        self.primask.restore_interrupts(were_enabled)
    }

    fn interrupts_enabled(&self) -> bool {
        self.primask.interrupts_enabled()
    }
}

impl<C: ProcessorContext> Platform for CortexMPlatform<C> {
    type Context = C;

    fn quantum_timer(&self) -> &dyn CountdownTimer {
        &self.systick
    }

    fn wait_timer(&self) -> &dyn CompareTimer {
        &self.wait_timer
    }

    fn request_context_switch(&self) {
        #[cfg(target_arch = "arm")]
        cortex_m::peripheral::SCB::set_pendsv();
        #[cfg(not(target_arch = "arm"))]
        self.switch_pending
            .store(true, core::sync::atomic::Ordering::SeqCst);
    }

    fn wait_for_interrupt(&self) {
        sleep_until_interrupt();
    }

    fn enter_thread_mode(&self, stack_top: usize, continuation: extern "C" fn() -> !) -> ! {
        // SAFETY: the kernel hands over the idle stack it owns.
        unsafe { run_on_process_stack(stack_top, continuation) }
    }
}

fn sleep_until_interrupt() {
    #[cfg(target_arch = "arm")]
    cortex_m::asm::wfi();
    #[cfg(not(target_arch = "arm"))]
    core::hint::spin_loop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systick::tests::fake_systick;
    use crate::compare::tests::fake_compare;

    #[test]
    fn init_leaves_both_timers_idle() {
        let (systick, _) = fake_systick(48_000_000);
        let (wait_timer, _) = fake_compare(1_000_000);
        let platform: CortexMPlatform<ArmV7MContext> = CortexMPlatform::new(systick, wait_timer);

        platform.systick.schedule(1000);
        platform.init();
        assert!(!platform.quantum_timer().is_armed());
    }

    #[test]
    fn switch_requests_are_latched_until_taken() {
        let (systick, _) = fake_systick(48_000_000);
        let (wait_timer, _) = fake_compare(1_000_000);
        let platform: CortexMPlatform<ArmV6MContext> = CortexMPlatform::new(systick, wait_timer);

        platform.request_context_switch();
        assert!(platform.take_pending_switch());
        assert!(!platform.take_pending_switch());
    }
}
