//! Memory and instruction barriers for ARMv7-M.
//!
//! MPU and system register writes only take effect for the following
//! instructions after a `dsb; isb` pair. On host builds the barriers map onto
//! compiler/CPU fences so ordering-sensitive code still reads the same.

#[cfg(not(target_arch = "arm"))]
use portable_atomic::Ordering;

pub struct MemoryBarriers;

impl MemoryBarriers {
    #[inline(always)]
    pub fn data_sync() {
        #[cfg(target_arch = "arm")]
        unsafe {
            core::arch::asm!("dsb", options(nostack, preserves_flags));
        }

        #[cfg(not(target_arch = "arm"))]
        core::sync::atomic::fence(Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn instruction() {
        #[cfg(target_arch = "arm")]
        unsafe {
            core::arch::asm!("isb", options(nostack, preserves_flags));
        }

        #[cfg(not(target_arch = "arm"))]
        core::sync::atomic::compiler_fence(Ordering::SeqCst);
    }

    /// `dsb; isb`, required after reprogramming the MPU or CONTROL.
    #[inline(always)]
    pub fn sync() {
        Self::data_sync();
        Self::instruction();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barriers_run_on_host() {
        MemoryBarriers::data_sync();
        MemoryBarriers::instruction();
        MemoryBarriers::sync();
    }
}
