//! Hardware abstraction for the port layer.
//!
//! Everything the port needs from the core is behind the [`Arch`] trait: the
//! special registers (PSP, CONTROL, FPSCR, BASEPRI), the system control block,
//! the MPU and the DWT cycle counter. The real implementation talks to an
//! ARMv7-M core; the simulated one records register state for host tests.

use crate::mpu::{MpuCtrl, RegionAttributes};

/// System exceptions whose priority the port programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemHandler {
    /// Supervisor call, exception 11
    SVCall,
    /// Pendable service request, exception 14
    PendSV,
}

impl SystemHandler {
    /// Exception number as seen in `IPSR`.
    pub const fn exception_number(self) -> u32 {
        match self {
            SystemHandler::SVCall => 11,
            SystemHandler::PendSV => 14,
        }
    }
}

/// Architecture abstraction trait.
///
/// Methods take `&self` so a simulated core can keep its register file in the
/// implementing value; the real core is a zero-sized handle.
///
/// # Safety
///
/// Writing PSP, CONTROL or the MPU changes what the running code can access
/// and where it returns to. Those methods are `unsafe` and document what the
/// caller must guarantee.
pub trait Arch: Sync {
    /// Current process stack pointer.
    fn psp(&self) -> usize;

    /// Set the process stack pointer.
    ///
    /// # Safety
    ///
    /// `psp` must point into a valid, 8-byte aligned stack for the thread that
    /// runs next on the process stack.
    unsafe fn set_psp(&self, psp: usize);

    /// Current CONTROL register.
    fn control(&self) -> u32;

    /// Set the CONTROL register.
    ///
    /// # Safety
    ///
    /// Setting `nPRIV` drops privilege for thread mode; the caller must be able
    /// to continue without it.
    unsafe fn set_control(&self, control: u32);

    /// Current floating point status and control register.
    #[cfg(feature = "full-fpu")]
    fn fpscr(&self) -> u32;

    /// Current BASEPRI.
    fn basepri(&self) -> u8;

    /// Set BASEPRI, masking every interrupt at or below that priority.
    fn set_basepri(&self, basepri: u8);

    /// Program `AIRCR.PRIGROUP`.
    fn set_priority_grouping(&self, prigroup: u32);

    /// Program a system handler priority, already in register encoding.
    fn set_system_priority(&self, handler: SystemHandler, priority: u8);

    /// Configure an MPU region completely.
    ///
    /// # Safety
    ///
    /// The region must not revoke access the currently executing code relies on.
    unsafe fn mpu_configure_region(&self, region: u8, base: usize, attributes: RegionAttributes);

    /// Move an already configured MPU region to a new base address.
    ///
    /// # Safety
    ///
    /// Same as [`Arch::mpu_configure_region`].
    unsafe fn mpu_set_region_address(&self, region: u8, base: usize);

    /// Enable the MPU with the given control flags.
    ///
    /// # Safety
    ///
    /// Every region the running code needs must be configured first.
    unsafe fn mpu_enable(&self, ctrl: MpuCtrl);

    /// Set `DEMCR.TRCENA` so the DWT is powered.
    fn enable_trace(&self);

    /// Write the DWT lock access register.
    ///
    /// # Safety
    ///
    /// Only meaningful on cores that implement `DWT->LAR`.
    unsafe fn unlock_dwt(&self, key: u32);

    /// Set `DWT_CTRL.CYCCNTENA`.
    fn enable_cycle_counter(&self);

    /// Current cycle count.
    fn cycle_count(&self) -> u32;

    /// Raise `svc 1`, the request that consumes a link context and enters
    /// unprivileged mode. On hardware this does not return.
    ///
    /// # Safety
    ///
    /// PSP must point at a valid [`LinkCtx`](crate::context::LinkCtx).
    unsafe fn svc_unprivileged(&self);

    /// Base of the stack used before the scheduler starts.
    fn main_stack_base(&self) -> usize;

    /// Make preceding system register and MPU writes take effect.
    fn sync_barrier(&self);
}

pub mod barriers;

#[cfg(target_arch = "arm")]
pub mod armv7m;
#[cfg(target_arch = "arm")]
pub mod armv7m_vectors;

#[cfg(any(test, feature = "std-shim"))]
pub mod sim;

#[cfg(target_arch = "arm")]
pub use armv7m::CortexM;

// Host builds run against the simulated core
#[cfg(any(test, feature = "std-shim"))]
pub use sim::SimArch;
