use core::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ThreadId(pub u32);

impl Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Higher runs first. Threads of equal priority share the processor round robin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadPriority(pub u8);

impl ThreadPriority {
    pub const LOWEST: ThreadPriority = ThreadPriority(0);
    pub const NORMAL: ThreadPriority = ThreadPriority(8);
    pub const HIGHEST: ThreadPriority = ThreadPriority(15);
}

impl Default for ThreadPriority {
    fn default() -> Self {
        ThreadPriority::NORMAL
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitOutcome {
    Pending,
    Signaled,
    TimedOut,
}

/// Entry point of a managed thread. The argument lands in r0.
pub type ThreadEntry = extern "C" fn(usize);
