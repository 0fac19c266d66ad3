#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(unreachable_pub)]

//! ARMv7-M port layer for a preemptive real-time kernel.
//!
//! This crate sits directly below the scheduler. It captures and restores
//! thread execution state, runs the context switch tail of the PendSV
//! interrupt, moves threads from privileged to unprivileged mode and keeps a
//! per-thread MPU guard region bound to whichever thread is running.
//!
//! # Target Platform
//!
//! - **Architecture**: ARMv7-M / ARMv7E-M (Cortex-M3, M4, M7)
//! - **Environment**: Bare-metal, `thumbv7em-none-eabihf` with the default
//!   features; `thumbv7m-none-eabi` / `thumbv7em-none-eabi` need
//!   `default-features = false` since those cores or ABIs have no FPU
//!
//! # Features
//!
//! - `full-fpu`: FPU registers are part of the saved frames (default).
//!   Emits `vmrs`/`vstmdb`, so it requires an FPU target
//!   (`thumbv7em-none-eabihf`)
//! - `guard-pages`: MPU guard region follows the running thread (default)
//! - `syscall`: unprivileged threads and syscall gateway enabled (default)
//! - `cortex-m7`: unlock the DWT before enabling the cycle counter
//! - `std-shim`: expose the simulated architecture for host testing
//!
//! # Quick Start
//!
//! ```ignore
//! use armv7m_port::sched::priority;
//! use armv7m_port::{CortexM, HaltOnUnregistered, Kernel, PortConfig, PriorityScheduler};
//!
//! static KERNEL: Kernel<CortexM, PriorityScheduler<8>> = Kernel::new(
//!     CortexM,
//!     PriorityScheduler::new(priority::NORMAL, MAIN_STACK_BASE),
//!     HaltOnUnregistered,
//!     PortConfig::from_features(),
//! );
//!
//! fn kernel_main() -> ! {
//!     KERNEL.init();
//!     unsafe { KERNEL.register_global() };
//!     KERNEL.enable();
//!     KERNEL.unprivileged_jump(app_entry as usize, APP_STACK_TOP);
//! }
//! ```
//!
//! # Architecture
//!
//! - [`context`]: exception, link and callee-saved frame layouts
//! - [`mpu`]: guard region binding
//! - [`switch`]: IRQ-tail context switch engine
//! - [`gateway`] and [`syscall`]: privilege transitions and syscall dispatch
//! - [`kernel`]: the [`Kernel`] instance and port initialization

pub mod arch;
pub mod config;
pub mod context;
pub mod errors;
pub mod gateway;
pub mod kernel;
pub mod lock;
pub mod mpu;
pub mod sched;
pub mod stats;
pub mod switch;
pub mod syscall;
pub mod thread;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests;

#[cfg(all(not(test), target_os = "none"))]
use core::panic::PanicInfo;

// Every fatal port condition ends up here: mask everything and park the core.
#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("cpsid i", options(nomem, nostack));
    }
    loop {
        #[cfg(target_arch = "arm")]
        unsafe {
            core::arch::asm!("wfi", options(nomem, nostack));
        }
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}

// ============================================================================
// Public API
// ============================================================================

// Architecture abstraction
pub use arch::Arch;
#[cfg(target_arch = "arm")]
pub use arch::CortexM;

// Kernel
pub use kernel::{Kernel, PortHooks};
pub use config::PortConfig;

// Frames
pub use context::{ExtCtx, IntCtx, LinkCtx, ThreadContext};

// Switching and privilege transitions
pub use gateway::{LinkRelease, SyscallEntry};
pub use switch::{SwitchPair, SwitchToken};

// Syscalls
pub use syscall::{HaltOnUnregistered, SyscallDispatch, SyscallTable};

// Scheduler interface
pub use sched::{PriorityScheduler, Scheduler};
pub use thread::{Thread, ThreadId, ThreadState};

// Errors
pub use errors::{halt, FatalError, PortError, PortResult};
