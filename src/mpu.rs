//! MPU guard region binding.
//!
//! One MPU region is reserved as a guard at the base of the running thread's
//! working area. Its size and attributes are fixed when the port initializes;
//! every committed context switch only moves its base address.

use crate::arch::Arch;
use portable_atomic::{AtomicUsize, Ordering};

bitflags::bitflags! {
    /// `MPU_RASR` attribute and size bits.
    pub struct RegionAttributes: u32 {
        const ENABLE = 1 << 0;
        /// `SIZE` field, region size is `2^(SIZE + 1)` bytes
        const SIZE_MASK = 0x1F << 1;
        const SIZE_32 = 4 << 1;
        const SIZE_64 = 5 << 1;
        const SIZE_128 = 6 << 1;
        const SIZE_256 = 7 << 1;
        /// No access, privileged or not
        const AP_NA_NA = 0 << 24;
        const AP_RW_NA = 1 << 24;
        const AP_RW_RO = 2 << 24;
        const AP_RW_RW = 3 << 24;
        const AP_RO_NA = 5 << 24;
        const AP_MASK = 7 << 24;
        /// Normal memory, TEX=1 C=0 B=0
        const NON_CACHEABLE = 1 << 19;
        const SHAREABLE = 1 << 18;
        const EXECUTE_NEVER = 1 << 28;
    }
}

impl RegionAttributes {
    /// `SIZE` field for a power-of-two region of `bytes` bytes.
    pub fn size(bytes: u32) -> Self {
        debug_assert!(bytes.is_power_of_two() && bytes >= 32);
        Self::from_bits_truncate(((bytes.trailing_zeros() - 1) & 0x1F) << 1)
    }

    /// Attributes of the thread guard: no access, non-cacheable, enabled.
    pub fn guard(bytes: u32) -> Self {
        Self::AP_NA_NA | Self::NON_CACHEABLE | Self::size(bytes) | Self::ENABLE
    }
}

bitflags::bitflags! {
    /// `MPU_CTRL` bits.
    pub struct MpuCtrl: u32 {
        const ENABLE = 1 << 0;
        /// Keep the MPU on during HardFault and NMI
        const HFNMIENA = 1 << 1;
        /// Privileged code falls back to the default memory map outside declared regions
        const PRIVDEFENA = 1 << 2;
    }
}

/// The (region → base) assignment of the guard region.
///
/// Only the kernel updates it, with the kernel lock held, so the binding and
/// the running-thread pointer always change as one unit.
pub struct RegionBinding {
    region: u8,
    base: AtomicUsize,
}

impl RegionBinding {
    pub const fn new(region: u8) -> Self {
        Self {
            region,
            base: AtomicUsize::new(0),
        }
    }

    /// MPU region number this binding drives.
    pub fn region(&self) -> u8 {
        self.region
    }

    /// Base address currently bound.
    pub fn base(&self) -> usize {
        self.base.load(Ordering::Acquire)
    }

    /// Programs the full region descriptor and records `base` as bound.
    ///
    /// # Safety
    ///
    /// The region must not cover memory the currently running code uses.
    pub unsafe fn configure<A: Arch>(&self, arch: &A, base: usize, attributes: RegionAttributes) {
        unsafe {
            arch.mpu_configure_region(self.region, base, attributes);
        }
        arch.sync_barrier();
        self.base.store(base, Ordering::Release);
    }

    /// Moves the region to `base`, keeping its size and attributes.
    ///
    /// # Safety
    ///
    /// `base` must be the working-area base of the thread about to run, so the
    /// guard only ever covers that thread's stack limit.
    pub unsafe fn bind<A: Arch>(&self, arch: &A, base: usize) {
        unsafe {
            arch.mpu_set_region_address(self.region, base);
        }
        arch.sync_barrier();
        self.base.store(base, Ordering::Release);
    }
}
