//! The narrow surface the managed class library calls into.
//!
//! Everything here returns `anyhow::Result`: the library only reports
//! failures upwards, it never matches on kernel error variants.

use crate::{
    object::TypeId,
    thread::{ThreadEntry, ThreadId, ThreadPriority, WaitOutcome},
    time::{SchedulerTime, SchedulerTimeSpan},
};

pub trait RuntimeServices {
    fn allocate(&mut self, size: usize) -> anyhow::Result<usize>;
    fn allocate_object(&mut self, type_id: TypeId, size: usize) -> anyhow::Result<usize>;
    fn release(&mut self, address: usize);

    fn add_reference(&mut self, address: usize) -> anyhow::Result<()>;
    fn release_reference(&mut self, address: usize) -> anyhow::Result<()>;
    fn collect(&mut self) -> anyhow::Result<usize>;

    /// The thread stays invisible to the scheduler until [`add_thread`].
    ///
    /// [`add_thread`]: RuntimeServices::add_thread
    fn create_thread(
        &mut self,
        entry: ThreadEntry,
        argument: usize,
        stack_size: Option<usize>,
        priority: ThreadPriority,
    ) -> anyhow::Result<ThreadId>;
    fn add_thread(&mut self, id: ThreadId);
    fn start_thread(
        &mut self,
        entry: ThreadEntry,
        argument: usize,
        priority: ThreadPriority,
    ) -> anyhow::Result<ThreadId>;
    fn current_thread(&self) -> Option<ThreadId>;
    fn yield_now(&mut self);

    /// Blocks the calling thread until [`wakeup`] or `timeout`.
    /// `SchedulerTime::MAX` waits forever.
    ///
    /// [`wakeup`]: RuntimeServices::wakeup
    fn switch_to_wait(&mut self, timeout: SchedulerTime);
    /// False if `id` was not waiting.
    fn wakeup(&mut self, id: ThreadId) -> bool;
    /// Outcome of the last wait of `id`, once it ended.
    fn take_wait_outcome(&mut self, id: ThreadId) -> Option<WaitOutcome>;
    fn sleep(&mut self, duration: SchedulerTimeSpan);
    fn now(&self) -> SchedulerTime;
}
