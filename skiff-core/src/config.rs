//! Host-level runtime configuration
//!
//! Defaults match a stock cgroup v1 host. A JSON file can override any
//! subset of fields:
//!
//! ```json
//! { "cgroup": { "namespace": "ci-runners" }, "image_dir": "/srv/images/alpine" }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{ContainerId, Error, Result};

/// Location of the shared cgroup v1 controller roots
///
/// The root of controller `c` is `<mount>/<c>/<namespace>`; every container
/// gets one subdirectory below it per controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgroupHierarchy {
    /// Where the v1 controllers are mounted
    pub mount: PathBuf,
    /// Directory grouping all skiff containers under each controller
    pub namespace: String,
}

impl CgroupHierarchy {
    /// Conventional v1 mount point
    pub const DEFAULT_MOUNT: &'static str = "/sys/fs/cgroup";
    /// Default grouping directory
    pub const DEFAULT_NAMESPACE: &'static str = "skiff";

    /// Create a hierarchy rooted at `mount`
    #[must_use]
    pub fn new(mount: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            mount: mount.into(),
            namespace: namespace.into(),
        }
    }

    /// Shared root directory for `controller`
    #[must_use]
    pub fn controller_root(&self, controller: &str) -> PathBuf {
        self.mount.join(controller).join(&self.namespace)
    }

    /// Per-container directory for `controller`
    #[must_use]
    pub fn group_path(&self, controller: &str, id: &ContainerId) -> PathBuf {
        self.controller_root(controller).join(id.as_str())
    }

    /// Reject namespaces that would escape the controller directory
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the namespace is empty or not a
    /// single path component.
    pub fn validate(&self) -> Result<()> {
        let ns = self.namespace.as_str();
        if ns.is_empty() || ns == "." || ns == ".." || ns.contains('/') {
            return Err(Error::invalid_config(format!(
                "cgroup namespace must be a single directory name, got: {ns:?}"
            )));
        }
        Ok(())
    }
}

impl Default for CgroupHierarchy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MOUNT, Self::DEFAULT_NAMESPACE)
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// cgroup controller layout
    pub cgroup: CgroupHierarchy,
    /// Where per-container root copies are created
    pub containers_dir: PathBuf,
    /// Base image copied into a fresh root when none is given
    pub image_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cgroup: CgroupHierarchy::default(),
            containers_dir: PathBuf::from("./containers"),
            image_dir: PathBuf::from("./images/rootfs"),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration, starting from defaults
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        tracing::debug!(path = %path.display(), "Loading runtime configuration");

        let raw = fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("Cannot read config {}: {e}", path.display()))
        })?;

        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::invalid_config(format!("Cannot parse config {}: {e}", path.display()))
        })?;

        config.cgroup.validate()?;
        Ok(config)
    }

    /// Root directory a copied container gets
    #[must_use]
    pub fn container_root(&self, id: &ContainerId) -> PathBuf {
        self.containers_dir.join(id.as_str())
    }
}
