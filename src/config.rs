//! Port configuration.
//!
//! Compile-time defaults come from Cargo features; [`PortConfig`] carries them
//! at runtime so a kernel instance (or a test) can override individual knobs.

/// Number of implemented NVIC priority bits on the reference parts.
pub const PRIORITY_BITS: u8 = 4;

/// Default MPU region reserved for the thread guard.
pub const GUARD_MPU_REGION: u8 = 7;

/// Default guard size in bytes, the smallest ARMv7-M MPU region.
pub const GUARD_SIZE: u32 = 32;

/// Key written to `DWT->LAR` to unlock the DWT on Cortex-M7.
pub const DWT_UNLOCK_KEY: u32 = 0xC5AC_CE55;

/// Runtime view of the port configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// Implemented priority bits (`__NVIC_PRIO_BITS`).
    pub priority_bits: u8,
    /// Logical priority of the SVCall handler.
    pub svcall_priority: u8,
    /// Logical priority of the PendSV handler.
    pub pendsv_priority: u8,
    /// Whether the guard region follows the running thread.
    pub guard_pages: bool,
    /// MPU region number used for the guard.
    pub guard_region: u8,
    /// Guard size in bytes, a power of two no smaller than 32.
    pub guard_size: u32,
    /// Whether unprivileged threads and syscalls are in use.
    pub use_syscall: bool,
    /// Whether the DWT must be unlocked before enabling CYCCNT.
    pub dwt_unlock: bool,
}

impl PortConfig {
    /// Configuration selected by the enabled Cargo features.
    pub const fn from_features() -> Self {
        Self {
            priority_bits: PRIORITY_BITS,
            svcall_priority: 1,
            pendsv_priority: (1 << PRIORITY_BITS) - 1,
            guard_pages: cfg!(feature = "guard-pages"),
            guard_region: GUARD_MPU_REGION,
            guard_size: GUARD_SIZE,
            use_syscall: cfg!(feature = "syscall"),
            dwt_unlock: cfg!(feature = "cortex-m7"),
        }
    }

    pub const fn with_guard_pages(mut self, enabled: bool) -> Self {
        self.guard_pages = enabled;
        self
    }

    pub const fn with_syscall(mut self, enabled: bool) -> Self {
        self.use_syscall = enabled;
        self
    }

    pub const fn with_guard_region(mut self, region: u8) -> Self {
        self.guard_region = region;
        self
    }

    pub const fn with_dwt_unlock(mut self, enabled: bool) -> Self {
        self.dwt_unlock = enabled;
        self
    }

    /// `PRIGROUP` value programmed at init: every implemented bit is preemption priority.
    pub const fn prigroup_init(&self) -> u32 {
        7 - self.priority_bits as u32
    }

    /// Converts a logical priority into the left-aligned register encoding.
    pub const fn priority_mask(&self, priority: u8) -> u8 {
        priority << (8 - self.priority_bits)
    }

    /// BASEPRI value that masks every interrupt allowed to touch kernel state.
    ///
    /// SVCall stays above this level so a syscall can be issued with the lock held.
    pub const fn basepri_kernel(&self) -> u8 {
        self.priority_mask(self.svcall_priority + 1)
    }

    /// Whether init has to switch the MPU on at all.
    pub const fn uses_mpu(&self) -> bool {
        self.guard_pages || self.use_syscall
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::from_features()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_encoding() {
        let config = PortConfig::from_features();
        assert_eq!(config.prigroup_init(), 3);
        assert_eq!(config.priority_mask(1), 0x10);
        assert_eq!(config.priority_mask(15), 0xF0);
        assert_eq!(config.basepri_kernel(), 0x20);
    }

    #[test]
    fn test_svcall_not_masked_by_kernel_lock() {
        let config = PortConfig::default();
        assert!(config.priority_mask(config.svcall_priority) < config.basepri_kernel());
        assert!(config.priority_mask(config.pendsv_priority) > config.basepri_kernel());
    }

    #[test]
    fn test_builder_overrides() {
        let config = PortConfig::from_features()
            .with_guard_pages(false)
            .with_syscall(false);
        assert!(!config.uses_mpu());

        let config = config.with_syscall(true).with_guard_region(3);
        assert!(config.uses_mpu());
        assert_eq!(config.guard_region, 3);
    }
}
