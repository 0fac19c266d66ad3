//! Kernel instance of the port layer.
//!
//! A [`Kernel`] owns the architecture handle, the kernel lock around the
//! scheduler, the guard region binding and the syscall dispatcher. The
//! switch engine ([`crate::switch`]) and the privilege gateway
//! ([`crate::gateway`]) add their operations to it.

use crate::arch::{Arch, SystemHandler};
use crate::config::{PortConfig, DWT_UNLOCK_KEY};
use crate::context::{ThreadContext, EXC_RETURN_THREAD};
use crate::lock::{KernelGuard, KernelLock};
use crate::mpu::{MpuCtrl, RegionAttributes, RegionBinding};
use crate::sched::Scheduler;
use crate::stats::TimeMeasurement;
use crate::syscall::{HaltOnUnregistered, SyscallDispatch};
use portable_atomic::{AtomicBool, Ordering};

/// Kernel registered for the exception handlers.
static GLOBAL_KERNEL: spin::Once<&'static dyn PortHooks> = spin::Once::new();

/// Main kernel handle of the port layer.
///
/// # Type Parameters
///
/// * `A` - Architecture implementation
/// * `S` - Scheduler implementation
/// * `D` - Syscall dispatcher, replaces the default one entirely
pub struct Kernel<A: Arch, S: Scheduler, D: SyscallDispatch = HaltOnUnregistered> {
    arch: A,
    config: PortConfig,
    lock: KernelLock<S>,
    guard: RegionBinding,
    dispatcher: D,
    /// Whether `init` has run at least once
    initialized: AtomicBool,
}

impl<A: Arch, S: Scheduler, D: SyscallDispatch> Kernel<A, S, D> {
    /// Create a new kernel instance.
    ///
    /// # Arguments
    ///
    /// * `arch` - Handle to the core
    /// * `scheduler` - Scheduler state, moved under the kernel lock
    /// * `dispatcher` - Syscall dispatcher
    /// * `config` - Port configuration
    pub const fn new(arch: A, scheduler: S, dispatcher: D, config: PortConfig) -> Self {
        Self {
            arch,
            lock: KernelLock::new(scheduler, config.basepri_kernel()),
            guard: RegionBinding::new(config.guard_region),
            config,
            dispatcher,
            initialized: AtomicBool::new(false),
        }
    }

    /// Port initialization.
    ///
    /// Programs priority grouping, the DWT cycle counter, the SVCall and
    /// PendSV priorities, the guard region on the main stack and the MPU.
    /// Interrupts are left suspended; call [`enable`](Self::enable) once the
    /// rest of the system is up.
    ///
    /// Runs once in production. A second call re-applies the same
    /// configuration.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            log::warn!("port already initialized, applying configuration again");
        }

        let arch = &self.arch;
        let config = &self.config;

        // Known interrupt baseline
        self.suspend();

        arch.set_priority_grouping(config.prigroup_init());
        log::debug!("priority grouping {}", config.prigroup_init());

        arch.enable_trace();
        if config.dwt_unlock {
            unsafe {
                arch.unlock_dwt(DWT_UNLOCK_KEY);
            }
        }
        arch.enable_cycle_counter();

        let svcall = config.priority_mask(config.svcall_priority);
        let pendsv = config.priority_mask(config.pendsv_priority);
        arch.set_system_priority(SystemHandler::SVCall, svcall);
        arch.set_system_priority(SystemHandler::PendSV, pendsv);
        log::debug!("SVCall priority {:#04x}, PendSV priority {:#04x}", svcall, pendsv);

        if config.guard_pages {
            let base = arch.main_stack_base();
            unsafe {
                self.guard
                    .configure(arch, base, RegionAttributes::guard(config.guard_size));
            }
            log::debug!(
                "guard region {} at {:#x}, {} bytes",
                config.guard_region,
                base,
                config.guard_size
            );
        }

        if config.uses_mpu() {
            unsafe {
                arch.mpu_enable(MpuCtrl::PRIVDEFENA);
            }
            log::debug!("MPU enabled");
        }
    }

    /// Check if the kernel has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Mask every interrupt that may touch kernel state.
    pub fn suspend(&self) {
        self.arch.set_basepri(self.config.basepri_kernel());
    }

    /// Unmask all interrupts.
    pub fn enable(&self) {
        self.arch.set_basepri(0);
    }

    /// Acquire the kernel lock.
    pub fn lock(&self) -> KernelGuard<'_, A, S> {
        self.lock.lock(&self.arch)
    }

    /// Acquire the kernel lock unless somebody holds it.
    pub fn try_lock(&self) -> Option<KernelGuard<'_, A, S>> {
        self.lock.try_lock(&self.arch)
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Cycle statistics of syscall critical sections.
    pub fn critical_stats(&self) -> TimeMeasurement {
        self.lock.critical_stats()
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// The guard region binding.
    pub fn guard_region(&self) -> &RegionBinding {
        &self.guard
    }

    pub(crate) fn kernel_lock(&self) -> &KernelLock<S> {
        &self.lock
    }
}

/// Entry points the exception handlers reach through the registered kernel.
pub trait PortHooks: Sync {
    /// [`Kernel::schedule_next`] with the lock handed to the epilogue.
    ///
    /// Returns the context addresses of the old and new thread.
    fn schedule_next_raw(&self) -> Option<(*mut ThreadContext, *mut ThreadContext)>;

    /// Release the lock after the epilogue restored the new thread.
    ///
    /// # Safety
    ///
    /// Only after `schedule_next_raw` returned `Some`, once per switch.
    unsafe fn switch_done(&self);

    /// [`Kernel::handle_syscall`]; returns the `EXC_RETURN` to leave with.
    ///
    /// # Safety
    ///
    /// Handler mode of an `svc` raised by the current thread, `uctxp` being
    /// its stacked frame.
    unsafe fn syscall_entry(
        &self,
        uctxp: usize,
        number: u32,
        exc_return: u32,
        entry: usize,
    ) -> u32;

    /// [`Kernel::run_syscall`].
    ///
    /// # Safety
    ///
    /// Only from the trampoline entered through `syscall_entry`.
    unsafe fn syscall_run(&self, number: u32);

    /// [`Kernel::leave_syscall`].
    ///
    /// # Safety
    ///
    /// Handler mode of the `svc 0` ending a syscall.
    unsafe fn syscall_return(&self) -> u32;
}

impl<A: Arch, S: Scheduler, D: SyscallDispatch> PortHooks for Kernel<A, S, D> {
    fn schedule_next_raw(&self) -> Option<(*mut ThreadContext, *mut ThreadContext)> {
        let mut token = self.schedule_next()?;
        let contexts = token.contexts();
        token.detach();
        Some(contexts)
    }

    unsafe fn switch_done(&self) {
        unsafe {
            self.unlock_after_switch();
        }
    }

    unsafe fn syscall_entry(
        &self,
        uctxp: usize,
        number: u32,
        exc_return: u32,
        entry: usize,
    ) -> u32 {
        unsafe {
            self.handle_syscall(uctxp, number, exc_return, entry);
        }
        EXC_RETURN_THREAD
    }

    unsafe fn syscall_run(&self, number: u32) {
        unsafe {
            self.run_syscall(number);
        }
    }

    unsafe fn syscall_return(&self) -> u32 {
        unsafe { self.leave_syscall() }
    }
}

impl<A: Arch, S: Scheduler, D: SyscallDispatch> Kernel<A, S, D>
where
    Self: 'static,
{
    /// Make this kernel the one the PendSV and SVC handlers drive.
    ///
    /// Only the first registration takes effect.
    ///
    /// # Safety
    ///
    /// `init` must have run, and the scheduler's current thread must be the
    /// code calling this.
    pub unsafe fn register_global(&'static self) {
        let registered = GLOBAL_KERNEL.call_once(|| self as &'static dyn PortHooks);
        if !core::ptr::eq(
            *registered as *const dyn PortHooks as *const (),
            self as *const Self as *const (),
        ) {
            log::warn!("another kernel is already registered");
        }
    }
}

/// The registered kernel, if any.
pub fn global() -> Option<&'static dyn PortHooks> {
    GLOBAL_KERNEL.get().copied()
}
