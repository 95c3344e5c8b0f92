//! Resource value objects with compile-time unit safety

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Memory size value object with compile-time unit safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[repr(transparent)]
#[serde(transparent)]
pub struct MemorySize(u64); // bytes

impl MemorySize {
    /// Create from bytes
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from megabytes
    #[must_use]
    pub const fn from_mb(mb: u64) -> Self {
        Self(mb.saturating_mul(1024).saturating_mul(1024))
    }

    /// Get value in bytes
    #[must_use]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Get value in megabytes
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_mb(self) -> f64 {
        self.0 as f64 / (1024.0 * 1024.0)
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MB: u64 = 1024 * 1024;

        if self.0 >= MB {
            write!(f, "{:.2} MB", self.as_mb())
        } else {
            write!(f, "{} bytes", self.0)
        }
    }
}

/// CFS scheduling period in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CpuPeriod(u64);

impl CpuPeriod {
    /// 100ms, the kernel's default period
    pub const DEFAULT: Self = Self(100_000);

    /// Create from microseconds
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Get value in microseconds
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0
    }
}

impl Default for CpuPeriod {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// CPU cores value object: the fraction of one core a container may use
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CpuCores(f64);

impl CpuCores {
    /// Create new CPU cores value
    #[must_use]
    pub const fn new(cores: f64) -> Self {
        Self(cores)
    }

    /// Get value as f64
    #[must_use]
    pub const fn as_f64(self) -> f64 {
        self.0
    }

    /// Convert to a CFS quota for `period`
    ///
    /// The product is truncated toward zero to whole microseconds.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn to_quota(self, period: CpuPeriod) -> u64 {
        (self.0 * period.as_micros() as f64).floor() as u64
    }
}

impl fmt::Display for CpuCores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cores", self.0)
    }
}

/// CPU resource limit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuLimit {
    /// Share of CPU time per period
    pub cores: CpuCores,
    /// Scheduling period
    pub period: CpuPeriod,
}

impl CpuLimit {
    /// Create new CPU limit
    #[must_use]
    pub const fn new(cores: CpuCores, period: CpuPeriod) -> Self {
        Self { cores, period }
    }

    /// Quota to write to `cpu.cfs_quota_us`
    #[must_use]
    pub fn quota_micros(&self) -> u64 {
        self.cores.to_quota(self.period)
    }

    /// Check the limit against the host's core count
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for a zero period, a fraction outside
    /// `(0, core_count]`, or a quota that truncates to zero microseconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn validate(&self, core_count: usize) -> Result<()> {
        if self.period.as_micros() == 0 {
            return Err(Error::invalid_config("CPU period must be greater than 0"));
        }

        let cores = self.cores.as_f64();
        if !cores.is_finite() || cores <= 0.0 {
            return Err(Error::invalid_config(format!(
                "CPU limit must be positive, got: {cores}"
            )));
        }

        if cores > core_count as f64 {
            return Err(Error::invalid_config(format!(
                "CPU limit too high (host has {core_count} cores), got: {cores}"
            )));
        }

        if self.quota_micros() == 0 {
            return Err(Error::invalid_config(format!(
                "CPU limit {cores} rounds to a zero quota for a {}us period",
                self.period.as_micros()
            )));
        }

        Ok(())
    }
}

impl Default for CpuLimit {
    fn default() -> Self {
        Self::new(CpuCores::new(0.5), CpuPeriod::DEFAULT)
    }
}

/// Memory resource limit, applied to memory and to memory+swap alike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimit {
    /// Memory limit
    pub limit: MemorySize,
}

impl MemoryLimit {
    /// Create new memory limit
    #[must_use]
    pub const fn new(limit: MemorySize) -> Self {
        Self { limit }
    }

    /// Reject a zero limit
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] when the limit is zero bytes.
    pub fn validate(&self) -> Result<()> {
        if self.limit.as_bytes() == 0 {
            return Err(Error::invalid_config("Memory limit must be positive"));
        }
        Ok(())
    }
}

impl Default for MemoryLimit {
    fn default() -> Self {
        Self::new(MemorySize::from_bytes(40_000_000))
    }
}

/// Every limit a container runs under
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU quota and period
    pub cpu: CpuLimit,
    /// Memory and memory+swap cap
    pub memory: MemoryLimit,
}

impl ResourceLimits {
    /// Validate all limits
    ///
    /// # Errors
    /// Returns the first [`Error::InvalidConfig`] found.
    pub fn validate(&self, core_count: usize) -> Result<()> {
        self.cpu.validate(core_count)?;
        self.memory.validate()
    }
}

/// Number of CPUs available to this process, at least 1
#[must_use]
pub fn host_core_count() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}
