//! Namespace configuration

use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};

/// Which namespaces the bootstrap process is cloned into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Enable PID namespace
    pub pid: bool,

    /// Enable mount namespace
    pub mount: bool,

    /// Enable UTS namespace (hostname)
    pub uts: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self::container()
    }
}

impl NamespaceConfig {
    /// UTS, PID and mount: the isolation every container gets
    #[must_use]
    pub const fn container() -> Self {
        Self {
            pid: true,
            mount: true,
            uts: true,
        }
    }

    /// No new namespaces; the bootstrap shares the launcher's
    #[must_use]
    pub const fn none() -> Self {
        Self {
            pid: false,
            mount: false,
            uts: false,
        }
    }

    /// Convert to clone flags for clone(2)
    #[must_use]
    pub fn to_clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();

        if self.pid {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }

        flags
    }

    /// Get list of enabled namespace names
    #[must_use]
    pub fn enabled_namespaces(&self) -> Vec<&'static str> {
        let mut namespaces = Vec::new();

        if self.pid {
            namespaces.push("pid");
        }
        if self.mount {
            namespaces.push("mnt");
        }
        if self.uts {
            namespaces.push("uts");
        }

        namespaces
    }
}
