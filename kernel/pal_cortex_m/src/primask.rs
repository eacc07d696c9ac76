use pal::InterruptControl;

/// Interrupt masking through PRIMASK.
///
/// Off target the mask is simulated with a flag so the scheduler can be
/// exercised on the host.
pub struct Primask {
    #[cfg(not(target_arch = "arm"))]
    enabled: core::sync::atomic::AtomicBool,
}

impl Primask {
    pub const fn new() -> Self {
        Self {
            #[cfg(not(target_arch = "arm"))]
            enabled: core::sync::atomic::AtomicBool::new(true),
        }
    }
}

impl Default for Primask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "arm")]
impl InterruptControl for Primask {
    fn disable_interrupts(&self) -> bool {
        let were_enabled = cortex_m::register::primask::read().is_active();
        cortex_m::interrupt::disable();
        were_enabled
    }

    fn restore_interrupts(&self, were_enabled: bool) {
        if were_enabled {
            // SAFETY: only re-enables what the matching disable turned off.
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    fn interrupts_enabled(&self) -> bool {
        cortex_m::register::primask::read().is_active()
    }
}

#[cfg(not(target_arch = "arm"))]
impl InterruptControl for Primask {
    fn disable_interrupts(&self) -> bool {
        self.enabled
            .swap(false, core::sync::atomic::Ordering::SeqCst)
    }

    fn restore_interrupts(&self, were_enabled: bool) {
        if were_enabled {
            self.enabled
                .store(true, core::sync::atomic::Ordering::SeqCst);
        }
    }

    fn interrupts_enabled(&self) -> bool {
        self.enabled.load(core::sync::atomic::Ordering::SeqCst)
    }
}
