use volatile::Volatile;

use pal::CountdownTimer;

/// SysTick reload is 24 bits wide.
pub const SYSTICK_MAX_RELOAD: u64 = 0x00FF_FFFF;

pub const SYSTICK_BASE: usize = 0xE000_E010;

const CSR_ENABLE: u32 = 1 << 0;
const CSR_TICKINT: u32 = 1 << 1;
const CSR_CLKSOURCE: u32 = 1 << 2;

#[repr(C)]
pub struct SysTickRegisters {
    pub csr: Volatile<u32>,
    pub rvr: Volatile<u32>,
    pub cvr: Volatile<u32>,
    pub calib: Volatile<u32>,
}

/// Quantum timer on the core SysTick.
pub struct SysTickTimer {
    registers: *mut SysTickRegisters,
    ticks_per_second: u64,
}

// SAFETY: the register block is only touched with interrupts disabled by the kernel.
unsafe impl Sync for SysTickTimer {}
unsafe impl Send for SysTickTimer {}

impl SysTickTimer {
    /// # Safety
    ///
    /// `registers` must point at a SysTick register block that nothing else drives.
    pub const unsafe fn new(registers: *mut SysTickRegisters, ticks_per_second: u64) -> Self {
        Self {
            registers,
            ticks_per_second,
        }
    }

    /// The architectural SysTick, clocked from the core.
    ///
    /// # Safety
    ///
    /// Only one instance may exist.
    pub const unsafe fn core(core_clock: u64) -> Self {
        Self::new(SYSTICK_BASE as *mut SysTickRegisters, core_clock)
    }

    fn registers(&self) -> &mut SysTickRegisters {
        // SAFETY: guaranteed by the constructor.
        unsafe { &mut *self.registers }
    }
}

impl CountdownTimer for SysTickTimer {
    fn schedule(&self, ticks: u64) {
        if ticks > SYSTICK_MAX_RELOAD {
            panic!(
                "SysTick programmed with {} ticks, the counter holds {}",
                ticks, SYSTICK_MAX_RELOAD
            );
        }
        let registers = self.registers();
        registers.csr.write(0);
        registers.rvr.write(ticks.saturating_sub(1).max(1) as u32);
        registers.cvr.write(0);
        registers
            .csr
            .write(CSR_ENABLE | CSR_TICKINT | CSR_CLKSOURCE);
    }

    fn cancel(&self) {
        self.registers().csr.write(0);
    }

    fn max_ticks(&self) -> u64 {
        SYSTICK_MAX_RELOAD
    }

    fn is_armed(&self) -> bool {
        self.registers().csr.read() & CSR_ENABLE != 0
    }

    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }
}
