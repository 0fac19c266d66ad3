//! The kernel lock.
//!
//! Taking the lock raises BASEPRI to the kernel mask, so no interrupt that may
//! touch kernel state can run, and then takes a spin mutex around the
//! scheduler state. On a single core the mutex is never contended; it exists
//! so that ownership of the state is tied to a guard value.
//!
//! The lock is released in one of two ways:
//!
//! - dropping the [`KernelGuard`], the normal case;
//! - [`KernelLock::force_unlock`] after [`KernelGuard::detach`], when the
//!   release happens in another call frame, as on the context switch path.

use crate::arch::Arch;
use crate::errors::{halt, FatalError};
use crate::stats::TimeMeasurement;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use portable_atomic::{AtomicBool, Ordering};

/// BASEPRI value that masks nothing.
const BASEPRI_OPEN: u8 = 0;

/// Kernel lock around the scheduler state `S`.
pub struct KernelLock<S> {
    state: spin::Mutex<S>,
    basepri_kernel: u8,
    measuring: AtomicBool,
    critical: spin::Mutex<TimeMeasurement>,
}

impl<S> KernelLock<S> {
    pub const fn new(state: S, basepri_kernel: u8) -> Self {
        Self {
            state: spin::Mutex::new(state),
            basepri_kernel,
            measuring: AtomicBool::new(false),
            critical: spin::Mutex::new(TimeMeasurement::new()),
        }
    }

    /// Acquire the lock.
    ///
    /// Halts with `SV#4` in debug builds if the lock is already held, which on
    /// a single core can only mean a nested acquisition.
    pub fn lock<'a, A: Arch>(&'a self, arch: &'a A) -> KernelGuard<'a, A, S> {
        arch.set_basepri(self.basepri_kernel);
        if cfg!(debug_assertions) && self.state.is_locked() {
            halt(FatalError::LockStateViolation);
        }
        KernelGuard {
            lock: self,
            arch,
            inner: ManuallyDrop::new(self.state.lock()),
        }
    }

    /// Acquire the lock unless it is already held.
    ///
    /// On failure BASEPRI is put back to what it was.
    pub fn try_lock<'a, A: Arch>(&'a self, arch: &'a A) -> Option<KernelGuard<'a, A, S>> {
        let previous = arch.basepri();
        arch.set_basepri(self.basepri_kernel);
        match self.state.try_lock() {
            Some(inner) => Some(KernelGuard {
                lock: self,
                arch,
                inner: ManuallyDrop::new(inner),
            }),
            None => {
                arch.set_basepri(previous);
                None
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Release a lock whose guard was detached.
    ///
    /// Halts with `SV#5` in debug builds if the lock is not held.
    ///
    /// # Safety
    ///
    /// The guard that acquired the lock must have been passed to
    /// [`KernelGuard::detach`], and no reference obtained through it may be
    /// used afterwards.
    pub unsafe fn force_unlock<A: Arch>(&self, arch: &A) {
        self.check_held();
        unsafe {
            self.state.force_unlock();
        }
        self.finish_release(arch);
    }

    /// Start measuring the critical section the current holder is in.
    pub(crate) fn start_measurement(&self, now: u32) {
        self.critical.lock().start(now);
        self.measuring.store(true, Ordering::Release);
    }

    /// Statistics of measured critical sections.
    pub fn critical_stats(&self) -> TimeMeasurement {
        *self.critical.lock()
    }

    fn check_held(&self) {
        if cfg!(debug_assertions) && !self.state.is_locked() {
            halt(FatalError::UnlockStateViolation);
        }
    }

    fn finish_release<A: Arch>(&self, arch: &A) {
        if self.measuring.swap(false, Ordering::AcqRel) {
            self.critical.lock().stop(arch.cycle_count());
        }
        arch.set_basepri(BASEPRI_OPEN);
    }
}

/// Proof that the kernel lock is held. Releases it on drop.
#[must_use = "dropping the guard releases the kernel lock immediately"]
pub struct KernelGuard<'a, A: Arch, S> {
    lock: &'a KernelLock<S>,
    arch: &'a A,
    inner: ManuallyDrop<spin::MutexGuard<'a, S>>,
}

impl<'a, A: Arch, S> KernelGuard<'a, A, S> {
    /// Give up the guard without releasing the lock.
    ///
    /// The lock stays held with BASEPRI raised until
    /// [`KernelLock::force_unlock`] is called.
    pub fn detach(self) {
        let _ = ManuallyDrop::new(self);
    }
}

impl<A: Arch, S> Deref for KernelGuard<'_, A, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner
    }
}

impl<A: Arch, S> DerefMut for KernelGuard<'_, A, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<A: Arch, S> Drop for KernelGuard<'_, A, S> {
    fn drop(&mut self) {
        self.lock.check_held();
        // Safety: `inner` is dropped exactly once, here
        unsafe {
            ManuallyDrop::drop(&mut self.inner);
        }
        self.lock.finish_release(self.arch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimArch;

    #[test]
    fn test_lock_masks_and_unmasks() {
        let arch = SimArch::new();
        let lock = KernelLock::new(0u32, 0x20);

        {
            let mut guard = lock.lock(&arch);
            *guard += 1;
            assert_eq!(arch.basepri(), 0x20);
            assert!(lock.is_locked());
        }

        assert_eq!(arch.basepri(), 0);
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(&arch), 1);
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let arch = SimArch::new();
        let lock = KernelLock::new((), 0x20);

        let guard = lock.lock(&arch);
        assert!(lock.try_lock(&arch).is_none());
        // the failed attempt must not lower the mask of the holder
        assert_eq!(arch.basepri(), 0x20);
        drop(guard);

        assert!(lock.try_lock(&arch).is_some());
    }

    #[test]
    fn test_detach_then_force_unlock() {
        let arch = SimArch::new();
        let lock = KernelLock::new((), 0x20);

        lock.lock(&arch).detach();
        assert!(lock.is_locked());
        assert_eq!(arch.basepri(), 0x20);

        unsafe {
            lock.force_unlock(&arch);
        }
        assert!(!lock.is_locked());
        assert_eq!(arch.basepri(), 0);
    }

    #[test]
    fn test_measurement_recorded_on_release() {
        let arch = SimArch::new();
        arch.enable_cycle_counter();
        let lock = KernelLock::new((), 0x20);

        let guard = lock.lock(&arch);
        lock.start_measurement(arch.cycle_count());
        drop(guard);

        let stats = lock.critical_stats();
        assert_eq!(stats.n, 1);
        assert_eq!(stats.last, 7);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "SV#4")]
    fn test_nested_lock_halts() {
        let arch = SimArch::new();
        let lock = KernelLock::new((), 0x20);
        let _outer = lock.lock(&arch);
        let _inner = lock.lock(&arch);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "SV#5")]
    fn test_unlock_without_lock_halts() {
        let arch = SimArch::new();
        let lock = KernelLock::new((), 0x20);
        unsafe {
            lock.force_unlock(&arch);
        }
    }
}
