//! Container description and its re-exec wire form
//!
//! The launcher hands the container over to the bootstrap process purely
//! through command-line arguments. [`BootstrapArgs`] is that schema: the
//! launcher renders it with [`BootstrapArgs::to_argv`], and the `child`
//! subcommand parses the same flags back into a [`BootstrapArgs`].

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::CgroupHierarchy;
use crate::resources::ResourceLimits;
use crate::{ContainerId, Error, Result};

/// Everything needed to start one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Unique id, also the hostname and cgroup directory name
    pub id: ContainerId,
    /// CPU and memory limits
    pub limits: ResourceLimits,
    /// Prepared root filesystem the container is confined to
    pub rootfs: PathBuf,
    /// Program to run
    pub command: String,
    /// Arguments to the program
    pub args: Vec<String>,
}

impl ContainerSpec {
    /// Start building a spec for `command`
    #[must_use]
    pub fn builder(command: impl Into<String>) -> ContainerSpecBuilder {
        ContainerSpecBuilder::new(command)
    }

    /// Check everything that can be checked without touching the host
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for invalid limits or an empty command.
    pub fn validate(&self, core_count: usize) -> Result<()> {
        if self.command.is_empty() {
            return Err(Error::invalid_config("Command cannot be empty"));
        }
        self.limits.validate(core_count)
    }
}

/// Builder for [`ContainerSpec`]
#[derive(Debug, Clone)]
#[must_use]
pub struct ContainerSpecBuilder {
    id: Option<ContainerId>,
    limits: ResourceLimits,
    rootfs: Option<PathBuf>,
    command: String,
    args: Vec<String>,
}

impl ContainerSpecBuilder {
    fn new(command: impl Into<String>) -> Self {
        Self {
            id: None,
            limits: ResourceLimits::default(),
            rootfs: None,
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Use a fixed id instead of a generated one
    pub fn id(mut self, id: ContainerId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the container root directory
    pub fn rootfs(mut self, rootfs: impl Into<PathBuf>) -> Self {
        self.rootfs = Some(rootfs.into());
        self
    }

    /// Set the command's arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Finish the spec, generating an id if none was given
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if no root directory was set.
    pub fn build(self) -> Result<ContainerSpec> {
        let rootfs = self
            .rootfs
            .ok_or_else(|| Error::invalid_config("Container root directory is required"))?;

        Ok(ContainerSpec {
            id: self.id.unwrap_or_else(ContainerId::generate),
            limits: self.limits,
            rootfs,
            command: self.command,
            args: self.args,
        })
    }
}

/// The bootstrap's inputs, as carried across the re-exec boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapArgs {
    /// Container to start
    pub spec: ContainerSpec,
    /// Where the controller roots live
    pub hierarchy: CgroupHierarchy,
    /// Forward debug logging
    pub verbose: bool,
}

impl BootstrapArgs {
    /// Name of the hidden subcommand that receives these arguments
    pub const SUBCOMMAND: &'static str = "child";

    /// Render as the argument vector of the re-executed binary
    ///
    /// Every value is passed as its own argument; the user command follows
    /// `--` so its flags are never parsed by the runtime. Paths are passed
    /// as raw bytes, so non-UTF-8 roots arrive unchanged.
    #[must_use]
    pub fn to_argv(&self) -> Vec<OsString> {
        let spec = &self.spec;
        let mut argv: Vec<OsString> = Vec::with_capacity(16 + spec.args.len());

        if self.verbose {
            argv.push("--verbose".into());
        }

        argv.extend([
            Self::SUBCOMMAND.into(),
            "--id".into(),
            spec.id.as_str().into(),
            "--memory".into(),
            spec.limits.memory.limit.as_bytes().to_string().into(),
            "--cpu".into(),
            spec.limits.cpu.cores.as_f64().to_string().into(),
            "--cpu-period".into(),
            spec.limits.cpu.period.as_micros().to_string().into(),
            "--rootfs".into(),
            spec.rootfs.clone().into_os_string(),
            "--cgroup-mount".into(),
            self.hierarchy.mount.clone().into_os_string(),
            "--cgroup-namespace".into(),
            self.hierarchy.namespace.as_str().into(),
            "--".into(),
            spec.command.as_str().into(),
        ]);
        argv.extend(spec.args.iter().map(OsString::from));
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CpuCores, CpuLimit, CpuPeriod, MemoryLimit, MemorySize};

    fn sample_spec() -> ContainerSpec {
        ContainerSpec::builder("/bin/sh")
            .id(ContainerId::new("abc123").unwrap())
            .rootfs("/var/lib/skiff/abc123")
            .args(["-c", "echo hi"])
            .limits(ResourceLimits {
                cpu: CpuLimit::new(CpuCores::new(0.25), CpuPeriod::from_micros(50_000)),
                memory: MemoryLimit::new(MemorySize::from_mb(64)),
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_generates_id() {
        let spec = ContainerSpec::builder("/bin/true").rootfs("/tmp").build().unwrap();
        assert_eq!(spec.id.as_str().len(), 32);
        assert!(spec.args.is_empty());
        assert_eq!(spec.limits, ResourceLimits::default());
    }

    #[test]
    fn test_builder_requires_rootfs() {
        let result = ContainerSpec::builder("/bin/true").build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let mut spec = sample_spec();
        spec.command.clear();
        assert!(spec.validate(4).is_err());
    }

    #[test]
    fn test_to_argv_layout() {
        let args = BootstrapArgs {
            spec: sample_spec(),
            hierarchy: CgroupHierarchy::default(),
            verbose: false,
        };

        let argv = args.to_argv();
        assert_eq!(argv[0], "child");

        let separator = argv.iter().position(|a| a == "--").unwrap();
        assert_eq!(&argv[separator + 1..], ["/bin/sh", "-c", "echo hi"]);

        let value_of = |flag: &str| {
            let i = argv.iter().position(|a| a == flag).unwrap();
            argv[i + 1].clone()
        };
        assert_eq!(value_of("--id"), "abc123");
        assert_eq!(value_of("--memory"), "67108864");
        assert_eq!(value_of("--cpu"), "0.25");
        assert_eq!(value_of("--cpu-period"), "50000");
        assert_eq!(value_of("--rootfs"), "/var/lib/skiff/abc123");
        assert_eq!(value_of("--cgroup-mount"), "/sys/fs/cgroup");
        assert_eq!(value_of("--cgroup-namespace"), "skiff");
    }

    #[test]
    fn test_to_argv_verbose_is_global() {
        let args = BootstrapArgs {
            spec: sample_spec(),
            hierarchy: CgroupHierarchy::default(),
            verbose: true,
        };

        let argv = args.to_argv();
        assert_eq!(argv[0], "--verbose");
        assert_eq!(argv[1], "child");
    }

    #[test]
    fn test_spec_serde() {
        let spec = sample_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back: ContainerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
