#![cfg_attr(not(test), no_std)]

extern crate alloc;

include!(concat!(env!("OUT_DIR"), "/metadata_constants.rs"));

pub mod gc;
pub mod interrupts;
mod kernel;
pub mod logging;
pub mod memory;
mod panic;
pub mod thread;

#[cfg(test)]
pub(crate) mod test_support;

pub use kernel::Kernel;
pub use kernel_shared::bugcheck::StopCode;
pub use panic::set_halt_target;
