//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use skiff_core::{
    BootstrapArgs, CgroupHierarchy, ContainerId, ContainerSpec, CpuCores, CpuLimit, CpuPeriod,
    MemoryLimit, MemorySize, ResourceLimits, Result,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "skiff")]
#[command(about = "Minimal single-host container runtime", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command in a new container
    Run(RunArgs),

    /// Bootstrap a container from inside its namespaces
    #[command(hide = true)]
    Child(ChildArgs),
}

/// Limit flags shared by `run` and `child`
#[derive(Args, Debug, Clone, Copy)]
pub struct LimitArgs {
    /// Memory limit in bytes, applied to memory and memory+swap
    #[arg(long, default_value_t = 40_000_000)]
    pub memory: u64,

    /// CPU limit as a fraction of one core (e.g. 0.5)
    #[arg(long, default_value_t = 0.5)]
    pub cpu: f64,

    /// CFS scheduling period in microseconds
    #[arg(long = "cpu-period", default_value_t = 100_000)]
    pub cpu_period: u64,
}

impl LimitArgs {
    pub fn to_limits(self) -> ResourceLimits {
        ResourceLimits {
            cpu: CpuLimit::new(CpuCores::new(self.cpu), CpuPeriod::from_micros(self.cpu_period)),
            memory: MemoryLimit::new(MemorySize::from_bytes(self.memory)),
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container ID (generated when omitted)
    #[arg(short, long)]
    pub id: Option<ContainerId>,

    #[command(flatten)]
    pub limits: LimitArgs,

    /// Use this prepared root directory as is
    #[arg(long, conflicts_with = "image")]
    pub rootfs: Option<PathBuf>,

    /// Copy this base image into a fresh root (overrides the config file)
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// JSON runtime configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Command to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ChildArgs {
    /// Container ID
    #[arg(long)]
    pub id: ContainerId,

    #[command(flatten)]
    pub limits: LimitArgs,

    /// Root directory to confine to
    #[arg(long)]
    pub rootfs: PathBuf,

    /// Where the cgroup v1 controllers are mounted
    #[arg(long = "cgroup-mount", default_value = CgroupHierarchy::DEFAULT_MOUNT)]
    pub cgroup_mount: PathBuf,

    /// Directory grouping all containers under each controller
    #[arg(long = "cgroup-namespace", default_value = CgroupHierarchy::DEFAULT_NAMESPACE)]
    pub cgroup_namespace: String,

    /// Command to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

impl ChildArgs {
    /// Rebuild what the launcher rendered with [`BootstrapArgs::to_argv`]
    pub fn into_bootstrap(self, verbose: bool) -> Result<BootstrapArgs> {
        let mut command = self.command.into_iter();
        let program = command.next().unwrap_or_default();

        let spec = ContainerSpec::builder(program)
            .id(self.id)
            .limits(self.limits.to_limits())
            .rootfs(self.rootfs)
            .args(command)
            .build()?;

        Ok(BootstrapArgs {
            spec,
            hierarchy: CgroupHierarchy::new(self.cgroup_mount, self.cgroup_namespace),
            verbose,
        })
    }
}
