//! Resource limit implementations
//!
//! This module provides methods for setting CPU and memory limits
//! by writing to cgroup v1 control files

use skiff_core::{CpuLimit, MemoryLimit, ResourceLimits, Result};
use tracing::debug;

use crate::controller::{CgroupGroup, Controller};

impl CgroupGroup {
    /// Set the memory limit for this group
    ///
    /// The same value caps memory and memory+swap, so the container cannot
    /// escape the limit by swapping.
    pub fn set_memory_limit(&self, limit: &MemoryLimit) -> Result<()> {
        let bytes = limit.limit.as_bytes();

        debug!("Setting memory limit to {}", limit.limit);

        self.write("memory.limit_in_bytes", bytes)?;
        self.write("memory.memsw.limit_in_bytes", bytes)
    }

    /// Set the CFS bandwidth limit for this group
    ///
    /// The period is written before the quota: the kernel checks the quota
    /// against the period already in place.
    pub fn set_cpu_limit(&self, limit: &CpuLimit) -> Result<()> {
        let period = limit.period.as_micros();
        let quota = limit.quota_micros();

        debug!(
            "Setting CPU limit to {} (quota={} period={})",
            limit.cores, quota, period
        );

        self.write("cpu.cfs_period_us", period)?;
        self.write("cpu.cfs_quota_us", quota)
    }

    /// Ask the kernel to run the release agent once the group empties
    pub fn enable_release_notification(&self) -> Result<()> {
        self.write("notify_on_release", 1)
    }

    /// Write whichever of `limits` belongs to this group's controller
    pub fn apply(&self, limits: &ResourceLimits) -> Result<()> {
        match self.controller {
            Controller::Memory => self.set_memory_limit(&limits.memory),
            Controller::Cpu => self.set_cpu_limit(&limits.cpu),
        }
    }
}
