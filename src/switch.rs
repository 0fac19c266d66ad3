//! Context switch engine.
//!
//! [`Kernel::schedule_next`] runs at the tail of the PendSV handler, once the
//! hardware has finished stacking the interrupted thread's exception frame.
//! When it commits to a switch the kernel lock stays held: the epilogue swaps
//! the callee-saved frames and the lock is only released once the new thread
//! is resumed. A [`SwitchToken`] carries that ownership across.

use crate::arch::Arch;
use crate::context::ThreadContext;
use crate::kernel::Kernel;
use crate::lock::KernelGuard;
use crate::sched::Scheduler;
use crate::syscall::SyscallDispatch;
use crate::thread::ThreadId;

/// The two threads of a committed switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchPair {
    /// Thread being switched out
    pub old: ThreadId,
    /// Thread being switched in
    pub new: ThreadId,
}

/// A committed switch, holding the kernel lock.
#[must_use = "dropping the token releases the kernel lock before the switch completes"]
pub struct SwitchToken<'a, A: Arch, S> {
    guard: KernelGuard<'a, A, S>,
    pair: SwitchPair,
}

impl<'a, A: Arch, S: Scheduler> SwitchToken<'a, A, S> {
    pub fn pair(&self) -> SwitchPair {
        self.pair
    }

    pub fn scheduler(&self) -> &S {
        &self.guard
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.guard
    }

    /// Context addresses of the old and new thread, for the epilogue.
    ///
    /// Both stay valid for as long as the scheduler keeps the threads.
    pub fn contexts(&mut self) -> (*mut ThreadContext, *mut ThreadContext) {
        let old = self.guard.thread_mut(self.pair.old).context_mut() as *mut ThreadContext;
        let new = self.guard.thread_mut(self.pair.new).context_mut() as *mut ThreadContext;
        (old, new)
    }

    /// Complete the switch and release the kernel lock.
    pub fn finish(self) {
        drop(self.guard);
    }

    /// Hand the lock over to code outside Rust ownership.
    ///
    /// The lock stays held until [`Kernel::unlock_after_switch`] runs.
    pub fn detach(self) -> SwitchPair {
        self.guard.detach();
        self.pair
    }
}

impl<A: Arch, S: Scheduler, D: SyscallDispatch> Kernel<A, S, D> {
    /// Decide whether the interrupted thread gives way to another one.
    ///
    /// Only valid at the tail of the PendSV handler. Taking the kernel lock
    /// there is not a nested-ISR lock: the exception entry is complete and
    /// this runs as ordinary code.
    ///
    /// # Returns
    ///
    /// `None` with the lock released when no preemption is required.
    /// Otherwise the new thread is current, the guard region is bound to its
    /// working area and the returned token holds the lock.
    pub fn schedule_next(&self) -> Option<SwitchToken<'_, A, S>> {
        let mut guard = self.lock();

        if !guard.is_preemption_required() {
            return None;
        }

        let old = guard.current();
        let new = guard.select_first();

        if self.config().guard_pages {
            let base = guard.thread(new).region_base();
            unsafe {
                self.guard_region().bind(self.arch(), base);
            }
        }

        log::trace!("switch {} -> {}", old, new);
        Some(SwitchToken {
            guard,
            pair: SwitchPair { old, new },
        })
    }

    /// Release the lock kept by a detached [`SwitchToken`].
    ///
    /// # Safety
    ///
    /// Must be called exactly once per detached token, from the switched-in
    /// thread's continuation, and only then.
    pub unsafe fn unlock_after_switch(&self) {
        unsafe {
            self.kernel_lock().force_unlock(self.arch());
        }
    }

    /// Bind the guard region to the current thread's working area.
    ///
    /// The switch path binds on its own; this is for threads whose first
    /// resume does not go through [`schedule_next`](Self::schedule_next).
    pub fn bind_current_region(&self) {
        if !self.config().guard_pages {
            return;
        }
        let guard = self.lock();
        let base = guard.current_thread().region_base();
        unsafe {
            self.guard_region().bind(self.arch(), base);
        }
    }
}
