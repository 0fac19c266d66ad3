//! Critical-section time accounting.
//!
//! Syscall entries start a measurement when they take the kernel lock and the
//! matching release stops it, using the DWT cycle counter as time base.

/// Cycle statistics of one kind of critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeMeasurement {
    /// Shortest measured section
    pub best: u32,
    /// Longest measured section
    pub worst: u32,
    /// Most recent section
    pub last: u32,
    /// Number of completed measurements
    pub n: u32,
    /// Sum of every measured section
    pub cumulative: u64,
    started_at: u32,
}

impl TimeMeasurement {
    pub const fn new() -> Self {
        Self {
            best: u32::MAX,
            worst: 0,
            last: 0,
            n: 0,
            cumulative: 0,
            started_at: 0,
        }
    }

    pub fn start(&mut self, now: u32) {
        self.started_at = now;
    }

    /// Closes the running measurement. The counter is free running, so a
    /// single wrap between start and stop is accounted for.
    pub fn stop(&mut self, now: u32) {
        let elapsed = now.wrapping_sub(self.started_at);
        self.last = elapsed;
        self.n = self.n.wrapping_add(1);
        self.cumulative += elapsed as u64;
        self.best = self.best.min(elapsed);
        self.worst = self.worst.max(elapsed);
    }

    /// Mean section length, `None` before the first measurement.
    pub fn average(&self) -> Option<u32> {
        if self.n == 0 {
            None
        } else {
            Some((self.cumulative / self.n as u64) as u32)
        }
    }
}

impl Default for TimeMeasurement {
    fn default() -> Self {
        Self::new()
    }
}
