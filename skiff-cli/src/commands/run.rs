//! Run command implementation

use anyhow::{Context, Result};
use skiff_cgroup::CgroupV1;
use skiff_core::resources::host_core_count;
use skiff_core::{ContainerId, ContainerSpec, RuntimeConfig};
use skiff_namespace::{Launcher, PreparedRoot};
use tracing::{debug, info, warn};

use crate::cli::RunArgs;

pub fn execute(args: RunArgs, verbose: bool) -> Result<i32> {
    let mut config = RuntimeConfig::load(args.config.as_deref())?;
    if let Some(image) = args.image {
        config.image_dir = image;
    }

    let id = args.id.unwrap_or_else(ContainerId::generate);
    let rootfs = args
        .rootfs
        .clone()
        .unwrap_or_else(|| config.container_root(&id));

    let mut command = args.command.into_iter();
    let program = command.next().unwrap_or_default();
    let spec = ContainerSpec::builder(program)
        .id(id)
        .limits(args.limits.to_limits())
        .rootfs(rootfs)
        .args(command)
        .build()?;

    // Nothing on the host may change before this passes
    let core_count = host_core_count();
    spec.validate(core_count)?;
    config.cgroup.validate()?;

    info!(
        container_id = %spec.id,
        memory = %spec.limits.memory.limit,
        cpu = spec.limits.cpu.cores.as_f64(),
        cpu_period_us = spec.limits.cpu.period.as_micros(),
        "Starting container"
    );

    let prepared = if args.rootfs.is_some() {
        debug!(rootfs = %spec.rootfs.display(), "Using prepared root");
        None
    } else {
        Some(
            PreparedRoot::copy_from_image(&config.image_dir, &spec.rootfs)
                .context("Failed to prepare container root")?,
        )
    };

    let limiter = CgroupV1::new(config.cgroup.clone(), core_count);
    let result = Launcher::new(&limiter, config.cgroup, core_count)
        .with_verbose(verbose)
        .launch(&spec);

    // The copy goes only after the launcher has cleaned up the cgroups
    if let Some(root) = prepared {
        if let Err(e) = root.remove() {
            warn!(container_id = %spec.id, error = %e, "Could not remove container root");
        }
    }

    Ok(result?)
}
