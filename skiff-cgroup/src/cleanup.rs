//! Best-effort removal of a container's cgroup state
//!
//! Per-container groups are removed with `rmdir`, which is how cgroupfs
//! deletes a group together with its control files. The shared controller
//! roots are garbage-collected the same way, and only when they hold no
//! subdirectory: the kernel refuses to remove a non-empty directory, so a
//! concurrent container's live group is never deleted from under it.

use nix::sys::statfs::{statfs, CGROUP_SUPER_MAGIC};
use skiff_core::{CgroupHierarchy, ContainerId, Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::controller::Controller;

/// What one cleanup pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Directories that were removed
    pub removed: Vec<PathBuf>,
    /// Controller roots left in place because another container uses them
    pub retained: Vec<PathBuf>,
    /// Problems encountered; never fatal
    pub errors: Vec<String>,
}

impl CleanupReport {
    /// True when nothing went wrong
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: Self) {
        self.removed.extend(other.removed);
        self.retained.extend(other.retained);
        self.errors.extend(other.errors);
    }

    fn record_error(&mut self, err: &Error) {
        warn!(error = %err, "cgroup cleanup problem");
        self.errors.push(err.to_string());
    }
}

/// Remove `id`'s group under every controller, then collect empty roots
///
/// Absent directories count as already cleaned up, so calling this twice
/// for the same id is not an error.
pub fn cleanup_container(hierarchy: &CgroupHierarchy, id: &ContainerId) -> CleanupReport {
    let mut report = CleanupReport::default();

    for controller in Controller::ALL {
        let path = hierarchy.group_path(controller.name(), id);
        match remove_group(&path) {
            Ok(true) => report.removed.push(path),
            Ok(false) => debug!(path = %path.display(), "cgroup already absent"),
            Err(e) => report.record_error(&e),
        }
    }

    for controller in Controller::ALL {
        let root = hierarchy.controller_root(controller.name());
        report.merge(collect_root(&root));
    }

    report
}

/// Remove one group directory; `Ok(false)` if it did not exist
///
/// Outside cgroupfs (a scratch hierarchy) the control files are ordinary
/// files, so a non-empty directory is removed recursively there.
pub fn remove_group(path: &Path) -> Result<bool> {
    match fs::remove_dir(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed cgroup");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) if is_not_empty(&e) && !on_cgroupfs(path) => fs::remove_dir_all(path)
            .map(|()| true)
            .map_err(|e| Error::io(format!("remove {}", path.display()), e)),
        Err(e) => Err(Error::io(format!("remove {}", path.display()), e)),
    }
}

/// Remove a controller root if no container group is left below it
pub fn collect_root(root: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
        Err(e) => {
            report.record_error(&Error::io(format!("read {}", root.display()), e));
            return report;
        }
    };

    let occupied = entries
        .filter_map(std::result::Result::ok)
        .any(|entry| entry.file_type().is_ok_and(|t| t.is_dir()));

    if occupied {
        debug!(path = %root.display(), "Controller root still in use");
        report.retained.push(root.to_path_buf());
        return report;
    }

    match fs::remove_dir(root) {
        Ok(()) => {
            debug!(path = %root.display(), "Removed empty controller root");
            report.removed.push(root.to_path_buf());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        // Another container created its group after the check
        Err(e) if is_not_empty(&e) || e.raw_os_error() == Some(libc::EBUSY) => {
            report.retained.push(root.to_path_buf());
        }
        Err(e) => report.record_error(&Error::io(format!("remove {}", root.display()), e)),
    }

    report
}

fn is_not_empty(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOTEMPTY)
}

fn on_cgroupfs(path: &Path) -> bool {
    statfs(path).is_ok_and(|stat| stat.filesystem_type() == CGROUP_SUPER_MAGIC)
}
