/// Down-counting timer that fires once after a number of ticks. Drives the
/// scheduling quantum.
pub trait CountdownTimer {
    /// Panics when `ticks` exceeds [`CountdownTimer::max_ticks`].
    fn schedule(&self, ticks: u64);
    fn cancel(&self);
    fn max_ticks(&self) -> u64;
    fn is_armed(&self) -> bool;
    fn ticks_per_second(&self) -> u64;
}

/// Free running counter with a compare register. Drives wait timeouts and
/// provides the monotonic scheduler clock.
pub trait CompareTimer {
    fn now(&self) -> u64;
    /// Fires `delta` ticks from now. Panics when `delta` exceeds
    /// [`CompareTimer::max_delta`].
    fn schedule(&self, delta: u64);
    fn cancel(&self);
    fn max_delta(&self) -> u64;
    fn ticks_per_second(&self) -> u64;
}
