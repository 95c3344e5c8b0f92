//! Launcher-side ownership of a container's cgroup state

use skiff_core::ContainerId;
use tracing::warn;

use crate::backend::ResourceLimiter;
use crate::cleanup::CleanupReport;

/// Guarantees cleanup runs exactly once for one container
///
/// The launcher takes the lease before the bootstrap is spawned, so the
/// groups the bootstrap creates are removed on every path out of the
/// launcher: an explicit [`release`](Self::release) or, failing that, drop.
pub struct CgroupLease<'a, L: ResourceLimiter + ?Sized> {
    limiter: &'a L,
    id: ContainerId,
    released: bool,
}

impl<'a, L: ResourceLimiter + ?Sized> CgroupLease<'a, L> {
    /// Take responsibility for `id`'s cgroup state
    #[must_use]
    pub const fn new(limiter: &'a L, id: ContainerId) -> Self {
        Self {
            limiter,
            id,
            released: false,
        }
    }

    /// Container this lease covers
    #[must_use]
    pub const fn container_id(&self) -> &ContainerId {
        &self.id
    }

    /// Run cleanup now and hand back what it did
    pub fn release(mut self) -> CleanupReport {
        self.released = true;
        self.limiter.cleanup(&self.id)
    }
}

impl<L: ResourceLimiter + ?Sized> Drop for CgroupLease<'_, L> {
    /// Fallback cleanup (if explicit release wasn't called)
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(container_id = %self.id, "cgroup lease not released, cleaning up on drop");
        let report = self.limiter.cleanup(&self.id);
        if !report.is_clean() {
            warn!(
                container_id = %self.id,
                errors = report.errors.len(),
                "cgroup cleanup on drop incomplete"
            );
        }
    }
}

impl<L: ResourceLimiter + ?Sized> std::fmt::Debug for CgroupLease<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgroupLease")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockLimiter;
    use skiff_core::{ProcessId, ResourceLimits};

    #[test]
    fn test_release_cleans_up_once() {
        let limiter = MockLimiter::new();
        let id = ContainerId::new("leased").unwrap();

        let lease = CgroupLease::new(&limiter, id.clone());
        limiter
            .install_limits(&id, ProcessId::from_raw(9), &ResourceLimits::default())
            .unwrap();

        let report = lease.release();
        assert!(report.is_clean());
        assert!(!limiter.is_installed(&id));
        assert_eq!(limiter.cleanup_count(&id), 1);
    }

    #[test]
    fn test_drop_cleans_up() {
        let limiter = MockLimiter::new();
        let id = ContainerId::new("dropped").unwrap();

        {
            let _lease = CgroupLease::new(&limiter, id.clone());
        }

        assert_eq!(limiter.cleanup_count(&id), 1);
    }

    #[test]
    fn test_drop_on_unwind() {
        let limiter = MockLimiter::new();
        let id = ContainerId::new("unwound").unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _lease = CgroupLease::new(&limiter, id.clone());
            panic!("bootstrap wait blew up");
        }));

        assert!(result.is_err());
        assert_eq!(limiter.cleanup_count(&id), 1);
    }
}
