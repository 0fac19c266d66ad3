//! Simulated ARMv7-M core for host testing.
//!
//! Registers are plain atomics, the MPU and the DWT are recorded rather than
//! enforced. `svc 1` stacks an exception frame the way the hardware does, runs
//! the same link-context consumption the real SVC handler runs, then performs
//! a simulated exception return so tests can look at the state the
//! unprivileged thread would start with.

use super::{Arch, SystemHandler};
use crate::context::{self, ExtCtx};
use crate::gateway::{self, LinkRelease};
use crate::mpu::{MpuCtrl, RegionAttributes};
use core::mem::size_of;
use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

const MPU_REGIONS: usize = 8;

/// A configured MPU region as the simulator saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimRegion {
    pub base: usize,
    pub attributes: RegionAttributes,
}

/// Register state right after the simulated exception return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeState {
    pub frame: ExtCtx,
    pub control: u32,
    pub psp: usize,
}

struct SimMpu {
    regions: [Option<SimRegion>; MPU_REGIONS],
    ctrl: Option<MpuCtrl>,
    writes: usize,
}

/// Simulated core.
pub struct SimArch {
    psp: AtomicUsize,
    control: AtomicU32,
    fpscr: AtomicU32,
    basepri: AtomicU8,
    prigroup: AtomicU32,
    svcall_priority: AtomicU8,
    pendsv_priority: AtomicU8,
    trace_enabled: AtomicBool,
    dwt_lar: AtomicU32,
    cyccnt_enabled: AtomicBool,
    cycles: AtomicU32,
    main_stack_base: AtomicUsize,
    mpu: spin::Mutex<SimMpu>,
    svc_count: AtomicUsize,
    last_link: spin::Mutex<Option<LinkRelease>>,
    resumed: spin::Mutex<Option<ResumeState>>,
}

/// Cycles the simulated counter advances per read.
const CYCLES_PER_READ: u32 = 7;

impl SimArch {
    pub const fn new() -> Self {
        Self {
            psp: AtomicUsize::new(0),
            control: AtomicU32::new(0),
            fpscr: AtomicU32::new(0),
            basepri: AtomicU8::new(0),
            prigroup: AtomicU32::new(0),
            svcall_priority: AtomicU8::new(0),
            pendsv_priority: AtomicU8::new(0),
            trace_enabled: AtomicBool::new(false),
            dwt_lar: AtomicU32::new(0),
            cyccnt_enabled: AtomicBool::new(false),
            cycles: AtomicU32::new(0),
            main_stack_base: AtomicUsize::new(0x2000_0000),
            mpu: spin::Mutex::new(SimMpu {
                regions: [None; MPU_REGIONS],
                ctrl: None,
                writes: 0,
            }),
            svc_count: AtomicUsize::new(0),
            last_link: spin::Mutex::new(None),
            resumed: spin::Mutex::new(None),
        }
    }

    pub fn with_main_stack_base(self, base: usize) -> Self {
        self.main_stack_base.store(base, Ordering::Relaxed);
        self
    }

    pub fn with_fpscr(self, fpscr: u32) -> Self {
        self.fpscr.store(fpscr, Ordering::Relaxed);
        self
    }

    pub fn mpu_region(&self, region: u8) -> Option<SimRegion> {
        self.mpu.lock().regions.get(region as usize).copied().flatten()
    }

    pub fn mpu_ctrl(&self) -> Option<MpuCtrl> {
        self.mpu.lock().ctrl
    }

    /// Number of MPU descriptor writes so far.
    pub fn mpu_writes(&self) -> usize {
        self.mpu.lock().writes
    }

    pub fn prigroup(&self) -> u32 {
        self.prigroup.load(Ordering::Acquire)
    }

    pub fn system_priority(&self, handler: SystemHandler) -> u8 {
        match handler {
            SystemHandler::SVCall => self.svcall_priority.load(Ordering::Acquire),
            SystemHandler::PendSV => self.pendsv_priority.load(Ordering::Acquire),
        }
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled.load(Ordering::Acquire)
    }

    pub fn cycle_counter_enabled(&self) -> bool {
        self.cyccnt_enabled.load(Ordering::Acquire)
    }

    pub fn dwt_lar(&self) -> u32 {
        self.dwt_lar.load(Ordering::Acquire)
    }

    pub fn svc_count(&self) -> usize {
        self.svc_count.load(Ordering::Acquire)
    }

    /// Result of the last link-context consumption.
    pub fn last_link(&self) -> Option<LinkRelease> {
        *self.last_link.lock()
    }

    /// State after the last simulated exception return.
    pub fn resumed(&self) -> Option<ResumeState> {
        *self.resumed.lock()
    }

    /// Pops the exception frame at PSP the way exception return does.
    pub fn exception_return(&self) {
        let (frame, psp) = unsafe { context::pop_ext_ctx(self.psp()) };
        self.psp.store(psp, Ordering::Release);
        *self.resumed.lock() = Some(ResumeState {
            frame,
            control: self.control(),
            psp,
        });
    }
}

impl Default for SimArch {
    fn default() -> Self {
        Self::new()
    }
}

impl Arch for SimArch {
    fn psp(&self) -> usize {
        self.psp.load(Ordering::Acquire)
    }

    unsafe fn set_psp(&self, psp: usize) {
        self.psp.store(psp, Ordering::Release);
    }

    fn control(&self) -> u32 {
        self.control.load(Ordering::Acquire)
    }

    unsafe fn set_control(&self, control: u32) {
        self.control.store(control, Ordering::Release);
    }

    #[cfg(feature = "full-fpu")]
    fn fpscr(&self) -> u32 {
        self.fpscr.load(Ordering::Acquire)
    }

    fn basepri(&self) -> u8 {
        self.basepri.load(Ordering::Acquire)
    }

    fn set_basepri(&self, basepri: u8) {
        self.basepri.store(basepri, Ordering::Release);
    }

    fn set_priority_grouping(&self, prigroup: u32) {
        self.prigroup.store(prigroup & 0x7, Ordering::Release);
    }

    fn set_system_priority(&self, handler: SystemHandler, priority: u8) {
        match handler {
            SystemHandler::SVCall => self.svcall_priority.store(priority, Ordering::Release),
            SystemHandler::PendSV => self.pendsv_priority.store(priority, Ordering::Release),
        }
    }

    unsafe fn mpu_configure_region(&self, region: u8, base: usize, attributes: RegionAttributes) {
        let mut mpu = self.mpu.lock();
        mpu.regions[region as usize] = Some(SimRegion { base, attributes });
        mpu.writes += 1;
    }

    unsafe fn mpu_set_region_address(&self, region: u8, base: usize) {
        let mut mpu = self.mpu.lock();
        // RBAR alone leaves RASR as it was, including an empty region
        let attributes = mpu.regions[region as usize]
            .map(|r| r.attributes)
            .unwrap_or_else(RegionAttributes::empty);
        mpu.regions[region as usize] = Some(SimRegion { base, attributes });
        mpu.writes += 1;
    }

    unsafe fn mpu_enable(&self, ctrl: MpuCtrl) {
        self.mpu.lock().ctrl = Some(ctrl | MpuCtrl::ENABLE);
    }

    fn enable_trace(&self) {
        self.trace_enabled.store(true, Ordering::Release);
    }

    unsafe fn unlock_dwt(&self, key: u32) {
        self.dwt_lar.store(key, Ordering::Release);
    }

    fn enable_cycle_counter(&self) {
        self.cyccnt_enabled.store(true, Ordering::Release);
    }

    fn cycle_count(&self) -> u32 {
        if self.cyccnt_enabled.load(Ordering::Acquire) {
            self.cycles.fetch_add(CYCLES_PER_READ, Ordering::AcqRel)
        } else {
            0
        }
    }

    unsafe fn svc_unprivileged(&self) {
        self.svc_count.fetch_add(1, Ordering::AcqRel);
        // Exception entry stacks the caller's frame right below the link context
        let entry_sp = unsafe { context::push_ext_ctx(self.psp(), ExtCtx::default()) } as usize;
        self.psp.store(entry_sp, Ordering::Release);
        let lctxp = entry_sp + size_of::<ExtCtx>();
        let release = unsafe { gateway::consume_link_ctx(self, lctxp) };
        *self.last_link.lock() = Some(release);
        self.exception_return();
    }

    fn main_stack_base(&self) -> usize {
        self.main_stack_base.load(Ordering::Acquire)
    }

    fn sync_barrier(&self) {
        crate::arch::barriers::MemoryBarriers::sync();
    }
}
