use alloc::{boxed::Box, collections::BTreeMap};

use pal::Platform;

use crate::{thread::ThreadManager, warn};

pub type InterruptHandler<'p, P> = Box<dyn FnMut(&mut ThreadManager<'p, P>) + 'p>;

/// Device interrupt handlers by IRQ number. Handlers run on the interrupt
/// thread and may wake threads, the kernel reschedules afterwards.
pub struct InterruptDispatcher<'p, P: Platform> {
    handlers: BTreeMap<u32, InterruptHandler<'p, P>>,
    spurious: usize,
}

impl<'p, P: Platform> InterruptDispatcher<'p, P> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            spurious: 0,
        }
    }

    /// Replaces any handler already registered for `irq`.
    pub fn register(&mut self, irq: u32, handler: InterruptHandler<'p, P>) {
        self.handlers.insert(irq, handler);
    }

    pub fn unregister(&mut self, irq: u32) -> bool {
        self.handlers.remove(&irq).is_some()
    }

    pub fn is_registered(&self, irq: u32) -> bool {
        self.handlers.contains_key(&irq)
    }

    /// False when nothing handles `irq`.
    pub fn dispatch(&mut self, irq: u32, threads: &mut ThreadManager<'p, P>) -> bool {
        match self.handlers.get_mut(&irq) {
            Some(handler) => {
                handler(threads);
                true
            }
            None => {
                self.spurious += 1;
                warn!("Spurious interrupt {}", irq);
                false
            }
        }
    }

    pub fn spurious_count(&self) -> usize {
        self.spurious
    }
}

impl<P: Platform> Default for InterruptDispatcher<'_, P> {
    fn default() -> Self {
        Self::new()
    }
}
