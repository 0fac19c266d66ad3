//! Scheduler interface consumed by the port layer.

use crate::thread::{Thread, ThreadId};

/// What the context switch engine needs from the ready-queue policy.
///
/// Every method runs with the kernel lock held; implementations therefore
/// take `&mut self` and need no synchronization of their own.
pub trait Scheduler: Send {
    /// Whether a ready thread should take the processor from the current one.
    fn is_preemption_required(&self) -> bool;

    /// Make the first ready thread current and return its ID.
    ///
    /// The previously current thread goes back to the ready list. If nothing
    /// is ready the current thread stays current.
    fn select_first(&mut self) -> ThreadId;

    /// ID of the running thread.
    fn current(&self) -> ThreadId;

    /// Look up a thread.
    ///
    /// # Panics
    ///
    /// Halts with [`FatalError::UnknownThread`](crate::FatalError::UnknownThread)
    /// if `id` is not owned by this scheduler.
    fn thread(&self, id: ThreadId) -> &Thread;

    /// Mutable form of [`thread`](Self::thread).
    fn thread_mut(&mut self, id: ThreadId) -> &mut Thread;

    /// The running thread.
    fn current_thread(&self) -> &Thread {
        self.thread(self.current())
    }

    /// Mutable form of [`current_thread`](Self::current_thread).
    fn current_thread_mut(&mut self) -> &mut Thread {
        let id = self.current();
        self.thread_mut(id)
    }
}

/// Priority levels for threads.
///
/// These are convenience constants for common priority levels.
pub mod priority {
    /// Idle priority - only runs when nothing else is ready
    pub const IDLE: u8 = 0;

    /// Low priority - background tasks
    pub const LOW: u8 = 64;

    /// Normal priority - default for most threads
    pub const NORMAL: u8 = 128;

    /// High priority - important system tasks
    pub const HIGH: u8 = 192;
}
