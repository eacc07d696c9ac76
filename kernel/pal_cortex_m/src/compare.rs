use spin::Mutex;
use volatile::Volatile;

use pal::CompareTimer;

const CONTROL_ENABLE: u32 = 1 << 0;
const CONTROL_INTERRUPT: u32 = 1 << 1;

/// Generic 32-bit free running counter with one compare channel, the shape
/// of most vendor RTC and low power timer blocks.
#[repr(C)]
pub struct CompareTimerRegisters {
    pub counter: Volatile<u32>,
    pub compare: Volatile<u32>,
    pub control: Volatile<u32>,
    pub status: Volatile<u32>,
}

struct Extension {
    last: u32,
    high: u64,
}

/// Wait timer and scheduler clock.
///
/// The counter is extended to 64 bits in software, so `now` has to be
/// sampled at least once per wrap. The kernel does that through the clamped
/// wait timer while anything waits.
pub struct CompareWaitTimer {
    registers: *mut CompareTimerRegisters,
    ticks_per_second: u64,
    extension: Mutex<Extension>,
}

// SAFETY: the register block is only touched with interrupts disabled by the kernel.
unsafe impl Sync for CompareWaitTimer {}
unsafe impl Send for CompareWaitTimer {}

impl CompareWaitTimer {
    /// # Safety
    ///
    /// `registers` must point at a compare timer block that nothing else drives.
    pub const unsafe fn new(registers: *mut CompareTimerRegisters, ticks_per_second: u64) -> Self {
        Self {
            registers,
            ticks_per_second,
            extension: Mutex::new(Extension { last: 0, high: 0 }),
        }
    }

    fn registers(&self) -> &mut CompareTimerRegisters {
        // SAFETY: guaranteed by the constructor.
        unsafe { &mut *self.registers }
    }

    /// Clears the compare flag. Call from the timer interrupt.
    pub fn acknowledge(&self) {
        self.registers().status.write(0);
    }
}

impl CompareTimer for CompareWaitTimer {
    fn now(&self) -> u64 {
        let counter = self.registers().counter.read();
        let mut extension = self.extension.lock();
        if counter < extension.last {
            extension.high += 1 << 32;
        }
        extension.last = counter;
        extension.high | counter as u64
    }

    fn schedule(&self, delta: u64) {
        if delta > self.max_delta() {
            panic!(
                "wait timer programmed {} ticks ahead, the counter holds {}",
                delta,
                self.max_delta()
            );
        }
        let registers = self.registers();
        let target = registers.counter.read().wrapping_add(delta.max(1) as u32);
        registers.compare.write(target);
        registers
            .control
            .write(CONTROL_ENABLE | CONTROL_INTERRUPT);
    }

    fn cancel(&self) {
        // The counter keeps running, it is the scheduler clock.
        self.registers().control.write(CONTROL_ENABLE);
    }

    fn max_delta(&self) -> u64 {
        u32::MAX as u64
    }

    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn fake_compare(
        clock: u64,
    ) -> (CompareWaitTimer, &'static mut CompareTimerRegisters) {
        let registers = Box::leak(Box::new(CompareTimerRegisters {
            counter: Volatile::new(0),
            compare: Volatile::new(0),
            control: Volatile::new(0),
            status: Volatile::new(0),
        }));
        let pointer = registers as *mut CompareTimerRegisters;
        (unsafe { CompareWaitTimer::new(pointer, clock) }, unsafe { &mut *pointer })
    }

    #[test]
    fn now_extends_across_counter_wrap() {
        let (timer, registers) = fake_compare(1_000_000);
        registers.counter.write(0xFFFF_FFF0);
        assert_eq!(timer.now(), 0xFFFF_FFF0);

        registers.counter.write(0x10);
        assert_eq!(timer.now(), 0x1_0000_0010);
    }

    #[test]
    fn schedule_targets_counter_plus_delta() {
        let (timer, registers) = fake_compare(1_000_000);
        registers.counter.write(0xFFFF_FF00);
        timer.schedule(0x200);

        assert_eq!(registers.compare.read(), 0x100);
        assert_eq!(registers.control.read(), CONTROL_ENABLE | CONTROL_INTERRUPT);

        timer.cancel();
        assert_eq!(registers.control.read(), CONTROL_ENABLE);
    }

    #[test]
    #[should_panic]
    fn delta_beyond_counter_width_is_fatal() {
        let (timer, _) = fake_compare(1_000_000);
        timer.schedule(u32::MAX as u64 + 1);
    }
}
