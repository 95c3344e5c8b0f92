//! Resource limiter trait for pluggable implementations

use nix::errno::Errno;
use skiff_core::{
    CgroupHierarchy, ContainerId, Error, ErrorKind, ProcessId, ResourceLimits, Result,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cleanup::{self, CleanupReport};
use crate::controller::{CgroupGroup, Controller};

/// Trait for resource limiter backends
///
/// This allows for different implementations:
/// - [`CgroupV1`] - Production cgroup v1 hierarchy
/// - [`MockLimiter`] - Testing without filesystem
pub trait ResourceLimiter: Send + Sync {
    /// Create the container's groups, write its limits and move `pid` in
    ///
    /// Either every controller is fully configured or an error is returned.
    /// Groups created before a failure are left for [`Self::cleanup`].
    ///
    /// # Errors
    /// Returns error if a value is invalid, the kernel refuses a write, or a
    /// controller is not available
    fn install_limits(
        &self,
        id: &ContainerId,
        pid: ProcessId,
        limits: &ResourceLimits,
    ) -> Result<CgroupMembership>;

    /// Remove everything [`Self::install_limits`] created for `id`
    ///
    /// Best effort and idempotent; problems are reported, never returned.
    fn cleanup(&self, id: &ContainerId) -> CleanupReport;
}

/// The groups a process joined through [`ResourceLimiter::install_limits`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupMembership {
    /// Container the groups belong to
    pub id: ContainerId,
    /// Process that was moved in
    pub pid: ProcessId,
    /// One directory per controller, in installation order
    pub groups: Vec<(Controller, PathBuf)>,
}

impl CgroupMembership {
    /// Directory of the group under `controller`, if one was joined
    #[must_use]
    pub fn path(&self, controller: Controller) -> Option<&PathBuf> {
        self.groups
            .iter()
            .find(|(c, _)| *c == controller)
            .map(|(_, path)| path)
    }
}

/// cgroup v1 limiter rooted at a [`CgroupHierarchy`]
#[derive(Debug, Clone)]
pub struct CgroupV1 {
    hierarchy: CgroupHierarchy,
    core_count: usize,
}

impl CgroupV1 {
    /// Create a limiter that validates CPU fractions against `core_count`
    #[must_use]
    pub const fn new(hierarchy: CgroupHierarchy, core_count: usize) -> Self {
        Self {
            hierarchy,
            core_count,
        }
    }

    /// The hierarchy this limiter writes to
    #[must_use]
    pub const fn hierarchy(&self) -> &CgroupHierarchy {
        &self.hierarchy
    }
}

impl ResourceLimiter for CgroupV1 {
    fn install_limits(
        &self,
        id: &ContainerId,
        pid: ProcessId,
        limits: &ResourceLimits,
    ) -> Result<CgroupMembership> {
        // Nothing touches the filesystem until every value is known good
        self.hierarchy.validate()?;
        limits.validate(self.core_count)?;

        let mut groups = Vec::with_capacity(Controller::ALL.len());

        for controller in Controller::ALL {
            let group = CgroupGroup::create(&self.hierarchy, controller, id)?;
            group.apply(limits)?;
            group.enable_release_notification()?;
            group.add_process(pid)?;
            groups.push((controller, group.path().to_path_buf()));
        }

        tracing::info!(
            container_id = %id,
            pid = pid.as_raw(),
            memory_bytes = limits.memory.limit.as_bytes(),
            cpu_quota_us = limits.cpu.quota_micros(),
            cpu_period_us = limits.cpu.period.as_micros(),
            "Resource limits installed"
        );

        Ok(CgroupMembership {
            id: id.clone(),
            pid,
            groups,
        })
    }

    fn cleanup(&self, id: &ContainerId) -> CleanupReport {
        let report = cleanup::cleanup_container(&self.hierarchy, id);

        tracing::debug!(
            container_id = %id,
            removed = report.removed.len(),
            retained = report.retained.len(),
            errors = report.errors.len(),
            "cgroup cleanup finished"
        );

        report
    }
}

/// Mock limiter for testing (doesn't touch filesystem)
///
/// # Example
/// ```
/// use skiff_cgroup::{MockLimiter, ResourceLimiter};
/// use skiff_core::{ContainerId, ProcessId, ResourceLimits};
///
/// let limiter = MockLimiter::new();
/// let id = ContainerId::new("demo").unwrap();
///
/// limiter
///     .install_limits(&id, ProcessId::from_raw(1), &ResourceLimits::default())
///     .unwrap();
/// assert!(limiter.is_installed(&id));
///
/// limiter.cleanup(&id);
/// assert!(!limiter.is_installed(&id));
/// ```
#[derive(Clone, Default)]
pub struct MockLimiter {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    installed: Vec<(ContainerId, ProcessId, ResourceLimits)>,
    cleanups: Vec<ContainerId>,
    fail_with: Option<ErrorKind>,
    call_count: usize,
}

impl MockLimiter {
    /// Create a new mock limiter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following installation fail with an error of `kind`
    #[must_use]
    pub fn failing(kind: ErrorKind) -> Self {
        let limiter = Self::new();
        limiter.state().fail_with = Some(kind);
        limiter
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the number of limiter calls made (for testing)
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state().call_count
    }

    /// Check if limits are currently installed for `id`
    #[must_use]
    pub fn is_installed(&self, id: &ContainerId) -> bool {
        self.state().installed.iter().any(|(i, _, _)| i == id)
    }

    /// Limits and pid recorded for `id` (for testing)
    #[must_use]
    pub fn installed(&self, id: &ContainerId) -> Option<(ProcessId, ResourceLimits)> {
        self.state()
            .installed
            .iter()
            .find(|(i, _, _)| i == id)
            .map(|(_, pid, limits)| (*pid, *limits))
    }

    /// How many times cleanup ran for `id`
    #[must_use]
    pub fn cleanup_count(&self, id: &ContainerId) -> usize {
        self.state().cleanups.iter().filter(|i| *i == id).count()
    }
}

impl std::fmt::Debug for MockLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLimiter").finish_non_exhaustive()
    }
}

fn injected(kind: ErrorKind) -> Error {
    match kind {
        ErrorKind::Configuration => Error::invalid_config("Mock: injected failure"),
        ErrorKind::Privilege => Error::PermissionDenied {
            operation: "Mock: injected failure".to_string(),
        },
        ErrorKind::ResourceUnavailable => Error::ResourceUnavailable {
            resource: "mock".to_string(),
            message: "injected failure".to_string(),
        },
        ErrorKind::Runtime => Error::Syscall {
            operation: "Mock: injected failure".to_string(),
            errno: Errno::EIO,
        },
    }
}

impl ResourceLimiter for MockLimiter {
    fn install_limits(
        &self,
        id: &ContainerId,
        pid: ProcessId,
        limits: &ResourceLimits,
    ) -> Result<CgroupMembership> {
        let mut state = self.state();
        state.call_count += 1;

        if let Some(kind) = state.fail_with {
            return Err(injected(kind));
        }

        state.installed.retain(|(i, _, _)| i != id);
        state.installed.push((id.clone(), pid, *limits));

        tracing::debug!(container_id = %id, pid = pid.as_raw(), "Mock: Installed limits");

        Ok(CgroupMembership {
            id: id.clone(),
            pid,
            groups: Controller::ALL
                .iter()
                .map(|c| (*c, PathBuf::from("/mock").join(c.name()).join(id.as_str())))
                .collect(),
        })
    }

    fn cleanup(&self, id: &ContainerId) -> CleanupReport {
        let mut state = self.state();
        state.call_count += 1;

        let before = state.installed.len();
        state.installed.retain(|(i, _, _)| i != id);
        state.cleanups.push(id.clone());

        tracing::debug!(
            container_id = %id,
            groups_removed = before - state.installed.len(),
            "Mock: Cleaned up"
        );

        CleanupReport::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use skiff_core::{CpuCores, CpuLimit, CpuPeriod, MemoryLimit, MemorySize};

    fn scratch_limiter(dir: &Path) -> CgroupV1 {
        for controller in Controller::ALL {
            fs::create_dir_all(dir.join(controller.name())).unwrap();
        }
        CgroupV1::new(CgroupHierarchy::new(dir, "skiff"), 4)
    }

    #[test]
    fn test_install_writes_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = scratch_limiter(dir.path());
        let id = ContainerId::new("c1").unwrap();
        let limits = ResourceLimits {
            cpu: CpuLimit::new(CpuCores::new(0.5), CpuPeriod::DEFAULT),
            memory: MemoryLimit::new(MemorySize::from_bytes(40_000_000)),
        };

        let membership = limiter
            .install_limits(&id, ProcessId::from_raw(777), &limits)
            .unwrap();

        let mem = dir.path().join("memory/skiff/c1");
        let cpu = dir.path().join("cpu/skiff/c1");
        let read = |p: PathBuf| fs::read_to_string(p).unwrap();

        assert_eq!(read(mem.join("memory.limit_in_bytes")), "40000000");
        assert_eq!(read(mem.join("memory.memsw.limit_in_bytes")), "40000000");
        assert_eq!(read(mem.join("notify_on_release")), "1");
        assert_eq!(read(mem.join("cgroup.procs")), "777");
        assert_eq!(read(cpu.join("cpu.cfs_period_us")), "100000");
        assert_eq!(read(cpu.join("cpu.cfs_quota_us")), "50000");
        assert_eq!(read(cpu.join("notify_on_release")), "1");
        assert_eq!(read(cpu.join("cgroup.procs")), "777");

        assert_eq!(membership.path(Controller::Memory), Some(&mem));
        assert_eq!(membership.groups[0].0, Controller::Memory);
        assert_eq!(membership.groups[1].0, Controller::Cpu);
    }

    #[test]
    fn test_invalid_limits_create_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = scratch_limiter(dir.path());
        let id = ContainerId::new("c1").unwrap();
        let limits = ResourceLimits {
            cpu: CpuLimit::new(CpuCores::new(0.5), CpuPeriod::from_micros(0)),
            memory: MemoryLimit::default(),
        };

        let err = limiter
            .install_limits(&id, ProcessId::from_raw(1), &limits)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!dir.path().join("memory/skiff").exists());
        assert!(!dir.path().join("cpu/skiff").exists());
    }

    #[test]
    fn test_cpu_above_core_count_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = scratch_limiter(dir.path());
        let limits = ResourceLimits {
            cpu: CpuLimit::new(CpuCores::new(8.0), CpuPeriod::DEFAULT),
            memory: MemoryLimit::default(),
        };

        let result = limiter.install_limits(
            &ContainerId::new("c1").unwrap(),
            ProcessId::from_raw(1),
            &limits,
        );
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_install_then_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = scratch_limiter(dir.path());
        let id = ContainerId::new("c1").unwrap();

        limiter
            .install_limits(&id, ProcessId::from_raw(1), &ResourceLimits::default())
            .unwrap();

        let report = limiter.cleanup(&id);
        assert!(report.is_clean());
        assert!(!dir.path().join("cpu/skiff/c1").exists());
        assert!(!dir.path().join("memory/skiff").exists());

        assert!(limiter.cleanup(&id).is_clean());
    }

    #[test]
    fn test_mock_limiter_lifecycle() {
        let limiter = MockLimiter::new();
        let id = ContainerId::new("mock").unwrap();
        let pid = ProcessId::from_raw(123);

        limiter
            .install_limits(&id, pid, &ResourceLimits::default())
            .unwrap();
        assert_eq!(limiter.call_count(), 1);
        assert_eq!(
            limiter.installed(&id),
            Some((pid, ResourceLimits::default()))
        );

        limiter.cleanup(&id);
        limiter.cleanup(&id);
        assert!(!limiter.is_installed(&id));
        assert_eq!(limiter.cleanup_count(&id), 2);
        assert_eq!(limiter.call_count(), 3);
    }

    #[test]
    fn test_mock_limiter_injected_failure() {
        let limiter = MockLimiter::failing(ErrorKind::Privilege);
        let id = ContainerId::new("mock").unwrap();

        let err = limiter
            .install_limits(&id, ProcessId::from_raw(1), &ResourceLimits::default())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Privilege);
        assert!(!limiter.is_installed(&id));
    }
}
