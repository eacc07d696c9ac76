use core::{
    fmt::Display,
    ops::{Add, Sub},
};

use serde::{Deserialize, Serialize};

/// Monotonic timestamp in hardware clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SchedulerTime(u64);

/// Distance between two [`SchedulerTime`] values, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SchedulerTimeSpan(u64);

impl SchedulerTime {
    pub const ZERO: SchedulerTime = SchedulerTime(0);
    /// Never reached. Waiting until `MAX` means waiting without a timeout.
    pub const MAX: SchedulerTime = SchedulerTime(u64::MAX);

    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    pub const fn ticks(&self) -> u64 {
        self.0
    }

    pub const fn is_never(&self) -> bool {
        self.0 == u64::MAX
    }

    /// Ticks left until `self`, zero if it has already passed.
    pub fn ticks_until(&self, now: SchedulerTime) -> u64 {
        self.0.saturating_sub(now.0)
    }
}

impl SchedulerTimeSpan {
    pub const ZERO: SchedulerTimeSpan = SchedulerTimeSpan(0);
    pub const INFINITE: SchedulerTimeSpan = SchedulerTimeSpan(u64::MAX);

    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    pub const fn from_milliseconds(milliseconds: u64, ticks_per_second: u64) -> Self {
        Self(milliseconds.saturating_mul(ticks_per_second) / 1000)
    }

    pub const fn from_microseconds(microseconds: u64, ticks_per_second: u64) -> Self {
        Self(microseconds.saturating_mul(ticks_per_second) / 1_000_000)
    }

    pub const fn ticks(&self) -> u64 {
        self.0
    }
}

impl Add<SchedulerTimeSpan> for SchedulerTime {
    type Output = SchedulerTime;

    fn add(self, rhs: SchedulerTimeSpan) -> Self::Output {
        // Saturates into MAX, an overflowing deadline is the same as no deadline.
        SchedulerTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SchedulerTime {
    type Output = SchedulerTimeSpan;

    fn sub(self, rhs: SchedulerTime) -> Self::Output {
        SchedulerTimeSpan(self.0.saturating_sub(rhs.0))
    }
}

impl Display for SchedulerTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_never() {
            write!(f, "never")
        } else {
            write!(f, "{}t", self.0)
        }
    }
}
