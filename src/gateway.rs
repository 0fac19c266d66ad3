//! Privilege transition gateway.
//!
//! A thread starts trusted, running privileged code on its own process stack.
//! [`Kernel::unprivileged_jump`] moves it to restricted mode for good:
//!
//! ```text
//!   trusted stack                     unprivileged stack
//!   +-----------+ <- s_psp            +-----------+ <- psp
//!   |  LinkCtx  |  control | 1        |  ExtCtx   |  pc, xpsr, fpscr
//!   +-----------+ <- PSP at svc 1     +-----------+ <- PSP after return
//! ```
//!
//! `svc 1` stacks its own exception frame on top of the link context. Its
//! handler body, [`consume_link_ctx`], writes CONTROL, points PSP at the
//! prepared exception frame and drops the link context, so the trusted stack
//! is back at `s_psp` when the thread resumes unprivileged at `pc`.
//!
//! Syscalls run on that trusted stack, privileged, in thread mode:
//!
//! 1. `svc n`: [`Kernel::handle_syscall`] notes the caller's frame, builds a
//!    frame at the trusted stack pointer that enters the syscall trampoline
//!    and returns into it with privilege.
//! 2. The trampoline calls [`Kernel::run_syscall`], which dispatches on the
//!    caller's frame with the kernel lock released and interrupts open.
//! 3. `svc 0`: [`Kernel::leave_syscall`] restores the caller's CONTROL and
//!    PSP and returns into the caller's frame.

use crate::arch::Arch;
use crate::context::{self, ExtCtx, LinkCtx, SyscallContext, CONTROL_NPRIV};
use crate::errors::{halt, FatalError};
use crate::kernel::Kernel;
use crate::lock::KernelGuard;
use crate::sched::Scheduler;
use crate::syscall::SyscallDispatch;

/// `svc` number that ends a syscall.
pub const SVC_RETURN: u32 = 0;

/// `svc` number reserved for entering unprivileged mode.
pub const SVC_UNPRIVILEGED: u32 = 1;

/// What consuming a link context did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRelease {
    /// Trusted stack pointer with the link context removed.
    pub trusted_psp: usize,
    /// Exception frame PSP now points at.
    pub ectxp: usize,
    /// CONTROL value written.
    pub control: u32,
}

/// Where a syscall was set up to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallEntry {
    /// Stack pointer the syscall frame was built under.
    pub trusted_psp: usize,
    /// Frame PSP now points at, entering the trampoline.
    pub frame: usize,
}

/// Body of the `svc 1` handler.
///
/// Reads the [`LinkCtx`] at `lctxp`, writes its CONTROL value and sets PSP to
/// its exception frame, so the exception return enters that frame.
///
/// # Safety
///
/// Must run in handler mode of the `svc 1` raised by
/// [`Kernel::unprivileged_jump`], with `lctxp` the address of the link context
/// it placed, just above the hardware-stacked frame of the `svc` itself.
pub unsafe fn consume_link_ctx<A: Arch>(arch: &A, lctxp: usize) -> LinkRelease {
    let (link, trusted_psp) = unsafe { context::pop_link_ctx(lctxp) };
    unsafe {
        arch.set_control(link.control);
        arch.set_psp(link.ectxp as usize);
    }
    LinkRelease {
        trusted_psp,
        ectxp: link.ectxp as usize,
        control: link.control,
    }
}

impl<A: Arch, S: Scheduler, D: SyscallDispatch> Kernel<A, S, D> {
    /// Drop the calling thread to unprivileged mode, entering `pc` with the
    /// stack pointer at `psp`.
    ///
    /// The current PSP becomes the thread's trusted stack pointer and is
    /// recorded in its context before privilege is dropped. Never returns;
    /// if the `svc` ever comes back the system halts with tag `"svc"`.
    pub fn unprivileged_jump(&self, pc: usize, psp: usize) -> ! {
        let arch = self.arch();
        let s_psp = arch.psp();
        let frame = ExtCtx::thread_start(pc);
        #[cfg(feature = "full-fpu")]
        let frame = frame.with_fpscr(arch.fpscr());

        {
            let mut guard = self.lock();
            let thread = guard.current_thread_mut();
            log::trace!("thread {} leaving privileged mode", thread.id());
            let syscall = &mut thread.context_mut().syscall;
            syscall.psp = s_psp;
            syscall.unprivileged = true;
        }

        unsafe {
            let ectxp = context::push_ext_ctx(psp, frame);
            let lctxp = context::push_link_ctx(
                s_psp,
                LinkCtx {
                    control: arch.control() | CONTROL_NPRIV,
                    ectxp,
                },
            );
            arch.set_psp(lctxp as usize);
            arch.svc_unprivileged();
        }

        halt(FatalError::ElevationReturned)
    }

    /// Kernel lock as taken on syscall entry.
    ///
    /// Starts critical-section time measurement; the measurement ends when
    /// the guard is released.
    pub fn syscall_lock(&self) -> KernelGuard<'_, A, S> {
        let guard = self.lock();
        self.kernel_lock().start_measurement(self.arch().cycle_count());
        guard
    }

    /// Trusted stack pointer of the current thread.
    pub fn syscall_stack_pointer(&self, guard: &KernelGuard<'_, A, S>) -> usize {
        guard.current_thread().context().syscall.psp
    }

    /// Route syscall `number` through the kernel's dispatcher.
    pub fn dispatch_syscall(&self, ctx: &mut ExtCtx, number: u32) {
        self.dispatcher().dispatch(ctx, number);
    }

    /// Body of the `svc n` handler for syscall numbers.
    ///
    /// Under the syscall lock, records the caller's frame at `uctxp` with its
    /// `exc_return` and CONTROL, then looks up the trusted stack pointer. An
    /// unprivileged thread uses the one recorded by
    /// [`unprivileged_jump`](Self::unprivileged_jump); a privileged thread
    /// stays on its own stack below the caller's frame. With the lock
    /// released, a frame entering `entry` with `number` in `r0` is built
    /// there and PSP points at it, with privilege for thread mode. Leave the
    /// handler with [`EXC_RETURN_THREAD`](crate::context::EXC_RETURN_THREAD).
    ///
    /// Halts with tag `"svc"` if the thread is already inside a syscall.
    ///
    /// # Safety
    ///
    /// Must run in handler mode of an `svc` raised by the current thread,
    /// `uctxp` being the frame the hardware stacked for it.
    pub unsafe fn handle_syscall(
        &self,
        uctxp: usize,
        number: u32,
        exc_return: u32,
        entry: usize,
    ) -> SyscallEntry {
        let arch = self.arch();
        let control = arch.control();
        let trusted_psp = {
            let mut guard = self.syscall_lock();
            log::trace!("syscall {} from thread {}", number, guard.current());
            let trusted_psp = if guard.current_thread().context().syscall.unprivileged {
                self.syscall_stack_pointer(&guard)
            } else {
                uctxp
            };
            let syscall = &mut guard.current_thread_mut().context_mut().syscall;
            if syscall.in_progress() {
                halt(FatalError::NestedSyscall);
            }
            syscall.caller = uctxp;
            syscall.exc_return = exc_return;
            syscall.control = control;
            trusted_psp
        };

        let frame = ExtCtx {
            r0: number,
            ..ExtCtx::thread_start(entry)
        };
        #[cfg(feature = "full-fpu")]
        let frame = frame.with_fpscr(arch.fpscr());

        let sctxp = unsafe { context::push_ext_ctx(trusted_psp, frame) } as usize;
        unsafe {
            arch.set_control(control & !CONTROL_NPRIV);
            arch.set_psp(sctxp);
        }
        SyscallEntry {
            trusted_psp,
            frame: sctxp,
        }
    }

    /// Body of the syscall trampoline.
    ///
    /// Dispatches `number` on the caller's frame recorded by
    /// [`handle_syscall`](Self::handle_syscall). The frame is accessed with
    /// the layout the hardware stacked it in, so a handler writing FPU words
    /// of a basic frame changes nothing beyond it.
    ///
    /// # Safety
    ///
    /// Must run in the current thread between `handle_syscall` and
    /// [`leave_syscall`](Self::leave_syscall), with the kernel lock released.
    pub unsafe fn run_syscall(&self, number: u32) {
        let syscall = self.current_syscall();
        if !syscall.in_progress() {
            halt(FatalError::NoSyscallInProgress);
        }
        let mut ctx = unsafe { context::load_stacked(syscall.caller, syscall.exc_return) };
        self.dispatch_syscall(&mut ctx, number);
        unsafe {
            context::store_stacked(syscall.caller, syscall.exc_return, &ctx);
        }
    }

    /// Body of the `svc 0` handler.
    ///
    /// Restores the CONTROL and PSP the current thread's syscall was entered
    /// with and returns the `EXC_RETURN` to leave with. Halts with tag
    /// `"svc"` if no syscall is in progress, so an `svc 0` from anywhere else
    /// cannot pick its own return state.
    ///
    /// # Safety
    ///
    /// Must run in handler mode of the `svc 0` issued by the trampoline.
    pub unsafe fn leave_syscall(&self) -> u32 {
        let syscall = {
            let mut guard = self.lock();
            let syscall = &mut guard.current_thread_mut().context_mut().syscall;
            if !syscall.in_progress() {
                halt(FatalError::NoSyscallInProgress);
            }
            let done = *syscall;
            syscall.caller = 0;
            done
        };
        let arch = self.arch();
        unsafe {
            arch.set_control(syscall.control);
            arch.set_psp(syscall.caller);
        }
        syscall.exc_return
    }

    fn current_syscall(&self) -> SyscallContext {
        self.lock().current_thread().context().syscall
    }
}
