pub trait InterruptControl {
    /// Masks interrupts and reports whether they were enabled before.
    fn disable_interrupts(&self) -> bool;
    fn restore_interrupts(&self, were_enabled: bool);
    fn interrupts_enabled(&self) -> bool;
}

/// Interrupts stay masked for as long as this guard lives.
///
/// Guards nest: only the outermost one turns interrupts back on.
pub struct InterruptState<'a> {
    control: &'a dyn InterruptControl,
    were_enabled: bool,
}

impl<'a> InterruptState<'a> {
    pub fn disable(control: &'a dyn InterruptControl) -> Self {
        let were_enabled = control.disable_interrupts();
        Self {
            control,
            were_enabled,
        }
    }

    pub fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for InterruptState<'_> {
    fn drop(&mut self) {
        self.control.restore_interrupts(self.were_enabled);
    }
}
