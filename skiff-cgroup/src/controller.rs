//! Per-container cgroup v1 groups

use skiff_core::{CgroupHierarchy, ContainerId, Error, ProcessId, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A cgroup v1 controller skiff installs limits through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Controller {
    /// `memory` controller
    Memory,
    /// `cpu` (CFS bandwidth) controller
    Cpu,
}

impl Controller {
    /// Controllers in installation order
    pub const ALL: [Self; 2] = [Self::Memory, Self::Cpu];

    /// Directory name of the controller under the cgroup mount
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One container's directory under one controller
///
/// This struct represents `<mount>/<controller>/<namespace>/<id>`.
/// It provides methods to:
/// - Create the directory (idempotent)
/// - Write control files
/// - Move a process into the group
#[derive(Debug, Clone)]
pub struct CgroupGroup {
    /// Which controller the group belongs to
    pub(crate) controller: Controller,

    /// Full path to this group directory
    /// example: /sys/fs/cgroup/cpu/skiff/3f2a...
    pub(crate) path: PathBuf,
}

impl CgroupGroup {
    /// Create (or reuse) the group for `id` under `controller`
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The controller is not mounted under the hierarchy's mount point
    /// - A non-directory already occupies the group path
    /// - Directory creation fails
    pub fn create(
        hierarchy: &CgroupHierarchy,
        controller: Controller,
        id: &ContainerId,
    ) -> Result<Self> {
        let mount = hierarchy.mount.join(controller.name());
        if !mount.is_dir() {
            return Err(Error::ResourceUnavailable {
                resource: mount.display().to_string(),
                message: format!("cgroup v1 {controller} controller is not mounted"),
            });
        }

        let path = hierarchy.group_path(controller.name(), id);

        if path.exists() && !path.is_dir() {
            return Err(Error::CGroup {
                message: format!("{} exists and is not a directory", path.display()),
            });
        }

        debug!(
            container_id = %id,
            controller = %controller,
            path = %path.display(),
            "Creating cgroup directory"
        );

        fs::create_dir_all(&path)
            .map_err(|e| Error::io(format!("create {}", path.display()), e))?;

        Ok(Self { controller, path })
    }

    /// The controller this group belongs to
    #[must_use]
    pub const fn controller(&self) -> Controller {
        self.controller
    }

    /// Directory of this group
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a decimal ASCII value to one control file
    pub(crate) fn write(&self, file: &str, value: impl fmt::Display) -> Result<()> {
        let target = self.path.join(file);
        let value = value.to_string();

        debug!(path = %target.display(), value = %value, "Writing cgroup control file");

        fs::write(&target, &value).map_err(|e| {
            // The kernel answers EINVAL for values it will not accept
            if e.raw_os_error() == Some(libc::EINVAL) {
                Error::invalid_config(format!(
                    "{} rejected value {value}",
                    target.display()
                ))
            } else {
                Error::io(format!("write {}", target.display()), e)
            }
        })
    }

    /// Move `pid` into this group
    ///
    /// # Errors
    /// Returns error if `cgroup.procs` cannot be written
    pub fn add_process(&self, pid: ProcessId) -> Result<()> {
        debug!(
            pid = pid.as_raw(),
            controller = %self.controller,
            "Adding process to cgroup"
        );
        self.write("cgroup.procs", pid)
    }
}
