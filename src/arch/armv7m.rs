//! ARMv7-M implementation of [`Arch`].
//!
//! Special registers are accessed with `mrs`/`msr`, the system control block,
//! DWT and MPU through volatile accesses at their architectural addresses.
//!
//! # Reference
//!
//! ARMv7-M Architecture Reference Manual, B3.2 (SCB), C1.8 (DWT), B3.5 (MPU)

use super::{Arch, SystemHandler};
use crate::arch::barriers::MemoryBarriers;
use crate::mpu::{MpuCtrl, RegionAttributes};
use core::arch::asm;
use core::ptr::{read_volatile, write_volatile};

// System control block
const SCB_AIRCR: usize = 0xE000_ED0C; // Application Interrupt and Reset Control
const SCB_SHPR_BASE: usize = 0xE000_ED18; // System Handler Priority, byte per exception 4..15

const AIRCR_VECTKEY: u32 = 0x05FA << 16;
const AIRCR_VECTKEY_MASK: u32 = 0xFFFF << 16;
const AIRCR_PRIGROUP_MASK: u32 = 0x7 << 8;

// Debug / trace
const DCB_DEMCR: usize = 0xE000_EDFC; // Debug Exception and Monitor Control
const DEMCR_TRCENA: u32 = 1 << 24;

const DWT_CTRL: usize = 0xE000_1000;
const DWT_CYCCNT: usize = 0xE000_1004;
const DWT_LAR: usize = 0xE000_1FB0; // Lock Access, Cortex-M7 only
const DWT_CTRL_CYCCNTENA: u32 = 1 << 0;

// Memory protection unit
const MPU_CTRL: usize = 0xE000_ED94;
const MPU_RNR: usize = 0xE000_ED98;
const MPU_RBAR: usize = 0xE000_ED9C;
const MPU_RASR: usize = 0xE000_EDA0;

extern "C" {
    /// Lowest address of the stack `main()` runs on, provided by the linker script.
    static __main_thread_stack_base__: u32;
}

/// Handle to the ARMv7-M core the code is running on.
pub struct CortexM;

#[inline(always)]
unsafe fn reg_read(addr: usize) -> u32 {
    unsafe { read_volatile(addr as *const u32) }
}

#[inline(always)]
unsafe fn reg_write(addr: usize, value: u32) {
    unsafe { write_volatile(addr as *mut u32, value) }
}

#[inline(always)]
unsafe fn reg_modify(addr: usize, clear: u32, set: u32) {
    unsafe { reg_write(addr, (reg_read(addr) & !clear) | set) }
}

impl Arch for CortexM {
    fn psp(&self) -> usize {
        let psp: u32;
        unsafe {
            asm!("mrs {}, psp", out(reg) psp, options(nomem, nostack, preserves_flags));
        }
        psp as usize
    }

    unsafe fn set_psp(&self, psp: usize) {
        unsafe {
            asm!("msr psp, {}", in(reg) psp as u32, options(nostack, preserves_flags));
        }
    }

    fn control(&self) -> u32 {
        let control: u32;
        unsafe {
            asm!("mrs {}, control", out(reg) control, options(nomem, nostack, preserves_flags));
        }
        control
    }

    unsafe fn set_control(&self, control: u32) {
        unsafe {
            asm!(
                "msr control, {}",
                "isb",
                in(reg) control,
                options(nostack, preserves_flags)
            );
        }
    }

    #[cfg(feature = "full-fpu")]
    fn fpscr(&self) -> u32 {
        let fpscr: u32;
        unsafe {
            asm!("vmrs {}, fpscr", out(reg) fpscr, options(nomem, nostack));
        }
        fpscr
    }

    fn basepri(&self) -> u8 {
        let basepri: u32;
        unsafe {
            asm!("mrs {}, basepri", out(reg) basepri, options(nomem, nostack, preserves_flags));
        }
        basepri as u8
    }

    fn set_basepri(&self, basepri: u8) {
        // Memory clobber on purpose: accesses must not move across the mask change.
        unsafe {
            asm!("msr basepri, {}", in(reg) basepri as u32, options(nostack, preserves_flags));
        }
    }

    fn set_priority_grouping(&self, prigroup: u32) {
        unsafe {
            reg_modify(
                SCB_AIRCR,
                AIRCR_VECTKEY_MASK | AIRCR_PRIGROUP_MASK,
                AIRCR_VECTKEY | ((prigroup << 8) & AIRCR_PRIGROUP_MASK),
            );
        }
    }

    fn set_system_priority(&self, handler: SystemHandler, priority: u8) {
        let addr = SCB_SHPR_BASE + (handler.exception_number() as usize - 4);
        unsafe {
            write_volatile(addr as *mut u8, priority);
        }
    }

    unsafe fn mpu_configure_region(&self, region: u8, base: usize, attributes: RegionAttributes) {
        unsafe {
            reg_write(MPU_RNR, region as u32);
            reg_write(MPU_RBAR, base as u32);
            reg_write(MPU_RASR, attributes.bits());
        }
    }

    unsafe fn mpu_set_region_address(&self, region: u8, base: usize) {
        unsafe {
            reg_write(MPU_RNR, region as u32);
            reg_write(MPU_RBAR, base as u32);
        }
    }

    unsafe fn mpu_enable(&self, ctrl: MpuCtrl) {
        unsafe {
            reg_write(MPU_CTRL, (ctrl | MpuCtrl::ENABLE).bits());
        }
        MemoryBarriers::sync();
    }

    fn enable_trace(&self) {
        unsafe {
            reg_modify(DCB_DEMCR, 0, DEMCR_TRCENA);
        }
    }

    unsafe fn unlock_dwt(&self, key: u32) {
        unsafe {
            reg_write(DWT_LAR, key);
        }
    }

    fn enable_cycle_counter(&self) {
        unsafe {
            reg_modify(DWT_CTRL, 0, DWT_CTRL_CYCCNTENA);
        }
    }

    fn cycle_count(&self) -> u32 {
        unsafe { reg_read(DWT_CYCCNT) }
    }

    unsafe fn svc_unprivileged(&self) {
        unsafe {
            asm!("svc 1");
        }
    }

    fn main_stack_base(&self) -> usize {
        unsafe { core::ptr::addr_of!(__main_thread_stack_base__) as usize }
    }

    fn sync_barrier(&self) {
        MemoryBarriers::sync();
    }
}
