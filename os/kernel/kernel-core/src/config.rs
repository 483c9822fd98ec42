//! Boot-time tunables of the kernel core.

use kernel_hal::{CoreId, MAX_CORES};

/// Default values of every [`KernelConfig`] field.
pub mod defaults {
    pub const CORES: usize = 1;
    pub const SCHEDULING_CORE: u32 = 0;
    pub const MAX_THREADS: usize = 1024;

    /// Ticks shared by all runnable threads of one epoch.
    pub const QUANTUM_BUDGET: u32 = 100;
    pub const QUANTUM_MIN: u32 = 10;
    pub const QUANTUM_MAX: u32 = 50;

    /// A thread stays on its last core unless that core carries this many
    /// percent more threads than the least loaded eligible core.
    pub const MIGRATION_HYSTERESIS_PERCENT: u32 = 10;

    pub const STACK_PAGES: usize = 4;
    pub const TLS_PAGES: usize = 1;

    /// Invalidations up to this many pages are serviced in interrupt context.
    pub const DIRECT_INVALIDATE_PAGES: usize = 16;

    /// Wait entries per macro-wait; bounded by the syscall register layout.
    pub const MAX_WAIT_ENTRIES: usize = 4;

    /// Mailbox slots; bounded by the 64-bit ownership mask.
    pub const MAILBOX_CAPACITY_LIMIT: usize = 64;

    /// High-frequency timer ticks per scheduler tick.
    pub const TICK_LENGTH: u64 = 1_000;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub cores: usize,
    pub scheduling_core: CoreId,
    pub max_threads: usize,
    pub quantum_budget: u32,
    pub quantum_min: u32,
    pub quantum_max: u32,
    pub migration_hysteresis_percent: u32,
    pub stack_pages: usize,
    pub tls_pages: usize,
    pub direct_invalidate_pages: usize,
    pub max_wait_entries: usize,
    pub mailbox_capacity_limit: usize,
    pub tick_length: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cores: defaults::CORES,
            scheduling_core: CoreId(defaults::SCHEDULING_CORE),
            max_threads: defaults::MAX_THREADS,
            quantum_budget: defaults::QUANTUM_BUDGET,
            quantum_min: defaults::QUANTUM_MIN,
            quantum_max: defaults::QUANTUM_MAX,
            migration_hysteresis_percent: defaults::MIGRATION_HYSTERESIS_PERCENT,
            stack_pages: defaults::STACK_PAGES,
            tls_pages: defaults::TLS_PAGES,
            direct_invalidate_pages: defaults::DIRECT_INVALIDATE_PAGES,
            max_wait_entries: defaults::MAX_WAIT_ENTRIES,
            mailbox_capacity_limit: defaults::MAILBOX_CAPACITY_LIMIT,
            tick_length: defaults::TICK_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one core is required")]
    NoCores,
    #[error("{0} cores requested, at most 64 supported")]
    TooManyCores(usize),
    #[error("scheduling core {0:?} is not among the configured cores")]
    SchedulingCoreOutOfRange(CoreId),
    #[error("quantum clamp {min}..={max} is empty or zero")]
    InvalidQuantumClamp { min: u32, max: u32 },
    #[error("wait entry limit {0} outside 1..=4")]
    InvalidWaitEntryLimit(usize),
    #[error("mailbox capacity limit {0} outside 1..=64")]
    InvalidMailboxLimit(usize),
    #[error("tick length must be non-zero")]
    ZeroTickLength,
}

impl KernelConfig {
    /// A default configuration for `cores` cores.
    #[must_use]
    pub fn with_cores(cores: usize) -> Self {
        Self {
            cores,
            ..Self::default()
        }
    }

    /// Checks the configuration for values the kernel cannot run with.
    ///
    /// # Errors
    /// The first problem found.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.cores == 0 {
            return Err(ConfigError::NoCores);
        }
        if self.cores > MAX_CORES {
            return Err(ConfigError::TooManyCores(self.cores));
        }
        if self.scheduling_core.index() >= self.cores {
            return Err(ConfigError::SchedulingCoreOutOfRange(self.scheduling_core));
        }
        if self.quantum_min == 0 || self.quantum_min > self.quantum_max {
            return Err(ConfigError::InvalidQuantumClamp {
                min: self.quantum_min,
                max: self.quantum_max,
            });
        }
        if self.max_wait_entries == 0 || self.max_wait_entries > defaults::MAX_WAIT_ENTRIES {
            return Err(ConfigError::InvalidWaitEntryLimit(self.max_wait_entries));
        }
        if self.mailbox_capacity_limit == 0
            || self.mailbox_capacity_limit > defaults::MAILBOX_CAPACITY_LIMIT
        {
            return Err(ConfigError::InvalidMailboxLimit(self.mailbox_capacity_limit));
        }
        if self.tick_length == 0 {
            return Err(ConfigError::ZeroTickLength);
        }
        Ok(())
    }

    /// Quantum handed to each of `runnable` threads entering a new epoch.
    #[must_use]
    pub fn quantum_for(&self, runnable: usize) -> u32 {
        let runnable = u32::try_from(runnable.max(1)).unwrap_or(u32::MAX);
        (self.quantum_budget / runnable).clamp(self.quantum_min, self.quantum_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(KernelConfig::default().validate(), Ok(()));
        assert_eq!(KernelConfig::with_cores(64).validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(KernelConfig::with_cores(0).validate(), Err(ConfigError::NoCores));
        assert_eq!(
            KernelConfig::with_cores(65).validate(),
            Err(ConfigError::TooManyCores(65))
        );

        let mut c = KernelConfig::with_cores(2);
        c.scheduling_core = CoreId(2);
        assert_eq!(
            c.validate(),
            Err(ConfigError::SchedulingCoreOutOfRange(CoreId(2)))
        );

        let mut c = KernelConfig::default();
        c.quantum_min = 60;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidQuantumClamp { .. })
        ));

        let mut c = KernelConfig::default();
        c.mailbox_capacity_limit = 65;
        assert_eq!(c.validate(), Err(ConfigError::InvalidMailboxLimit(65)));
    }

    #[test]
    fn quantum_is_clamped() {
        let c = KernelConfig::default();
        assert_eq!(c.quantum_for(1), 50);
        assert_eq!(c.quantum_for(2), 50);
        assert_eq!(c.quantum_for(3), 33);
        assert_eq!(c.quantum_for(5), 20);
        assert_eq!(c.quantum_for(10), 10);
        assert_eq!(c.quantum_for(40), 10);
    }
}
