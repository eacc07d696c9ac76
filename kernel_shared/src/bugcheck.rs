use core::fmt::Display;

/// Reason a bug check stopped the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum StopCode {
    NoCurrentThread = 0x01,
    UnknownThread = 0x02,
    StackCorruption = 0x03,
    ThreadExited = 0x04,
    IllegalSchedulerState = 0x05,
    InterruptsEnabled = 0x10,
    TimerOutOfRange = 0x11,
    NoHeapSegments = 0x20,
    HeapCorruption = 0x21,
    InvalidObjectAddress = 0x22,
    ReferenceCountUnderflow = 0x23,
    ReferenceCountOverflow = 0x24,
    UnknownType = 0x25,
}

impl StopCode {
    pub const fn code(&self) -> u32 {
        *self as u32
    }
}

impl Display for StopCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x} - {:?}", self.code(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_code_and_name() {
        assert_eq!(
            format!("{}", StopCode::StackCorruption),
            "0x0003 - StackCorruption"
        );
    }
}
