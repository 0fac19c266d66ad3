//! Test helper utilities and common functionality.

use crate::arch::sim::SimArch;
use crate::config::PortConfig;
use crate::arch::Arch;
use crate::context::{self, ExtCtx, EXC_RETURN_THREAD};
use crate::kernel::{Kernel, PortHooks};
use crate::sched::{priority, PriorityScheduler};
use crate::syscall::{SyscallDispatch, SyscallTable};
use std::boxed::Box;
use std::string::String;

/// Base of the simulated main stack.
pub(crate) const MAIN_STACK_BASE: usize = 0x2000_0000;

/// Syscall number the test table serves.
pub(crate) const SYS_ADD: u32 = 2;

/// Address the simulated syscall trampoline pretends to live at.
pub(crate) const SYSCALL_ENTRY: usize = 0x0800_0400;

pub(crate) type SimKernel<D> = Kernel<SimArch, PriorityScheduler<4>, D>;
pub(crate) type TestKernel = SimKernel<SyscallTable<4>>;

const STACK_WORDS: usize = 512;

/// Heap-backed, 8-byte aligned scratch stack.
pub(crate) struct TestStack {
    mem: *mut [u64; STACK_WORDS],
}

impl TestStack {
    pub(crate) fn new() -> Self {
        Self {
            mem: Box::into_raw(Box::new([0u64; STACK_WORDS])),
        }
    }

    pub(crate) fn base(&self) -> usize {
        self.mem as usize
    }

    /// One past the highest word, where a full descending stack starts.
    pub(crate) fn top(&self) -> usize {
        self.base() + STACK_WORDS * core::mem::size_of::<u64>()
    }
}

impl Drop for TestStack {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.mem));
        }
    }
}

fn sys_add(ctx: &mut ExtCtx) {
    let [a, b, _, _] = ctx.args();
    ctx.set_return(a.wrapping_add(b));
}

/// Configuration with every protection feature on, whatever the Cargo features.
pub(crate) fn test_config() -> PortConfig {
    PortConfig::from_features()
        .with_guard_pages(true)
        .with_syscall(true)
        .with_dwt_unlock(false)
}

/// Kernel on a fresh simulated core, main thread at normal priority.
pub(crate) fn test_kernel() -> TestKernel {
    let syscalls = SyscallTable::new()
        .with(SYS_ADD, sys_add)
        .expect("empty table accepts a syscall");
    kernel_with(syscalls)
}

/// Same as [`test_kernel`] with `dispatcher` serving syscalls.
pub(crate) fn kernel_with<D: SyscallDispatch>(dispatcher: D) -> SimKernel<D> {
    Kernel::new(
        SimArch::new().with_main_stack_base(MAIN_STACK_BASE),
        PriorityScheduler::new(priority::NORMAL, MAIN_STACK_BASE),
        dispatcher,
        test_config(),
    )
}

/// What a simulated syscall observed.
pub(crate) struct SyscallTrace {
    /// Address of the frame that entered the trampoline
    pub(crate) trusted_frame: usize,
    /// Frame the trampoline was entered with
    pub(crate) trampoline: ExtCtx,
    /// CONTROL while the trampoline ran
    pub(crate) control_in_syscall: u32,
    /// PSP and CONTROL the caller resumed with, and its frame
    pub(crate) resumed: crate::arch::sim::ResumeState,
}

/// Issues syscall `number` with `args` from the current thread on the
/// simulated core, the way `SVC_Handler`, the trampoline and `svc 0` drive it.
pub(crate) fn simulate_syscall<D: SyscallDispatch>(
    kernel: &SimKernel<D>,
    number: u32,
    args: [u32; 4],
) -> SyscallTrace {
    let hooks: &dyn PortHooks = kernel;
    let arch = kernel.arch();
    let [r0, r1, r2, r3] = args;
    let caller = ExtCtx {
        r0,
        r1,
        r2,
        r3,
        ..ExtCtx::thread_start(0x0800_3001)
    };
    let uctxp = unsafe { context::push_ext_ctx(arch.psp(), caller) } as usize;

    let exc_return = unsafe {
        arch.set_psp(uctxp);
        hooks.syscall_entry(uctxp, number, EXC_RETURN_THREAD, SYSCALL_ENTRY)
    };
    assert_eq!(exc_return, EXC_RETURN_THREAD);
    arch.exception_return();
    let entered = arch.resumed().expect("entered the trampoline");
    let trusted_frame = entered.psp - core::mem::size_of::<ExtCtx>();

    unsafe {
        hooks.syscall_run(entered.frame.r0);
    }

    // `svc 0` from the trampoline stacks a frame of its own
    unsafe {
        let sctxp = context::push_ext_ctx(arch.psp(), ExtCtx::default());
        arch.set_psp(sctxp as usize);
    }
    let exc_return = unsafe { hooks.syscall_return() };
    assert_eq!(exc_return, EXC_RETURN_THREAD);
    arch.exception_return();

    SyscallTrace {
        trusted_frame,
        trampoline: entered.frame,
        control_in_syscall: entered.control,
        resumed: arch.resumed().expect("returned to the caller"),
    }
}

/// Runs `f`, which must halt, and returns the halt tag.
pub(crate) fn halt_tag<F: FnOnce()>(f: F) -> String {
    let payload = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .expect_err("expected the port to halt");
    if let Some(tag) = payload.downcast_ref::<String>() {
        tag.clone()
    } else if let Some(tag) = payload.downcast_ref::<&str>() {
        String::from(*tag)
    } else {
        String::new()
    }
}

/// Simple linear congruential generator for property testing.
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    pub(crate) fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        min + (self.next_u64() % (max - min))
    }

    pub(crate) fn gen_bool(&mut self) -> bool {
        self.next_u64() & 1 == 0
    }
}
