use pal::HardwareControl;
use spin::Once;

static HALT_TARGET: Once<&'static (dyn HardwareControl + Sync)> = Once::new();

/// Hardware the panic handler stops. Only the first call has an effect.
pub fn set_halt_target(hardware: &'static (dyn HardwareControl + Sync)) {
    HALT_TARGET.call_once(|| hardware);
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    crate::fatal!("HALT: {}", info);
    match HALT_TARGET.get() {
        Some(hardware) => hardware.halt(),
        None => loop {
            core::hint::spin_loop();
        },
    }
}
