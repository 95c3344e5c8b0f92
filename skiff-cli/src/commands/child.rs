//! Hidden `child` command: the bootstrap side of a container
//!
//! Only the launcher starts this, as PID 1 of fresh namespaces.

use anyhow::{Context, Result};
use skiff_cgroup::CgroupV1;
use skiff_core::BootstrapArgs;
use skiff_core::resources::host_core_count;
use skiff_namespace::{Bootstrap, SyscallHost, SyscallMounter};
use tracing::debug;

use crate::cli::ChildArgs;

pub fn execute(args: ChildArgs, verbose: bool) -> Result<i32> {
    let BootstrapArgs { spec, hierarchy, .. } = args
        .into_bootstrap(verbose)
        .context("Invalid bootstrap arguments")?;

    debug!(container_id = %spec.id, rootfs = %spec.rootfs.display(), "Bootstrap starting");

    let limiter = CgroupV1::new(hierarchy, host_core_count());
    let code = Bootstrap::new(&spec, &limiter, &SyscallHost, &SyscallMounter).run()?;
    Ok(code)
}
