//! Thread records as the port layer sees them.
//!
//! The scheduler owns every [`Thread`]. The port only touches a thread's
//! [`ThreadContext`] and working-area base while that thread is suspended, or
//! while it is current and the kernel lock is held.

use crate::context::ThreadContext;
use core::num::NonZeroUsize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroUsize);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// The thread that was running `main()` when the port initialized.
    pub const MAIN: ThreadId = match NonZeroUsize::new(1) {
        Some(id) => ThreadId(id),
        None => unreachable!(),
    };

    /// Create a thread ID, `None` for zero.
    pub const fn new(id: usize) -> Option<Self> {
        match NonZeroUsize::new(id) {
            Some(id) => Some(ThreadId(id)),
            None => None,
        }
    }

    /// Get the raw ID value.
    pub const fn get(self) -> usize {
        self.0.get()
    }
}

/// Scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Waiting in the ready list
    Ready = 0,
    /// Currently executing
    Running = 1,
}

/// A schedulable thread.
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    priority: u8,
    /// Lowest address of the working area, where the guard region goes
    wabase: usize,
    state: ThreadState,
    ctx: ThreadContext,
}

impl Thread {
    /// Create a thread record with an empty context.
    ///
    /// # Arguments
    ///
    /// * `id` - Thread identifier
    /// * `priority` - Priority, higher runs first
    /// * `wabase` - Base address of the thread's working area
    pub const fn new(id: ThreadId, priority: u8, wabase: usize) -> Self {
        Self {
            id,
            priority,
            wabase,
            state: ThreadState::Ready,
            ctx: ThreadContext {
                sp: 0,
                syscall: crate::context::SyscallContext::new(),
            },
        }
    }

    /// Same record, starting in `state`.
    pub const fn with_state(mut self, state: ThreadState) -> Self {
        self.state = state;
        self
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Base address the guard region is bound to while this thread runs.
    pub fn region_base(&self) -> usize {
        self.wabase
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    pub fn context(&self) -> &ThreadContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ThreadContext {
        &mut self.ctx
    }
}
