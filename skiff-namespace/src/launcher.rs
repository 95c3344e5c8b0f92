//! Starting a container from the host side
//!
//! The launcher clones a child into new UTS, PID and mount namespaces and
//! has it exec the runtime binary again as the bootstrap. Because the
//! namespaces are requested at clone time, the bootstrap is PID 1 of its
//! PID namespace.
//!
//! This module uses `unsafe` for clone(2), which is inherently unsafe
//! but necessary for proper PID namespace isolation.

#![allow(unsafe_code)]

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sched::clone;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execv, pipe2, write, Pid};
use skiff_cgroup::{CgroupLease, ResourceLimiter};
use skiff_core::{
    exit, BootstrapArgs, CgroupHierarchy, ContainerEvent, ContainerSpec, Error, Result,
};
use std::ffi::{CString, OsString};
use std::fs::File;
use std::io::Read;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

use crate::config::NamespaceConfig;
use crate::signals;

/// Program re-executed as the bootstrap
pub const SELF_EXE: &str = "/proc/self/exe";

const STACK_SIZE: usize = 1024 * 1024;

/// Host-side container starter
pub struct Launcher<'a, L: ResourceLimiter + ?Sized> {
    limiter: &'a L,
    hierarchy: CgroupHierarchy,
    namespaces: NamespaceConfig,
    program: PathBuf,
    core_count: usize,
    verbose: bool,
}

impl<'a, L: ResourceLimiter + ?Sized> Launcher<'a, L> {
    /// Create a launcher that cleans up through `limiter`
    ///
    /// `hierarchy` is handed to the bootstrap so both sides agree on where
    /// the controller roots live.
    #[must_use]
    pub fn new(limiter: &'a L, hierarchy: CgroupHierarchy, core_count: usize) -> Self {
        Self {
            limiter,
            hierarchy,
            namespaces: NamespaceConfig::container(),
            program: PathBuf::from(SELF_EXE),
            core_count,
            verbose: false,
        }
    }

    /// Request a different namespace set
    #[must_use]
    pub const fn with_namespaces(mut self, namespaces: NamespaceConfig) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Exec `program` instead of the running binary
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Pass `--verbose` on to the bootstrap
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Argument vector the bootstrap is started with, `argv[0]` included
    #[must_use]
    pub fn bootstrap_argv(&self, spec: &ContainerSpec) -> Vec<OsString> {
        let args = BootstrapArgs {
            spec: spec.clone(),
            hierarchy: self.hierarchy.clone(),
            verbose: self.verbose,
        };

        let mut argv = vec![self.program.clone().into_os_string()];
        argv.extend(args.to_argv());
        argv
    }

    /// Run `spec` to completion and return the bootstrap's exit code
    ///
    /// Cleanup of the container's cgroups runs exactly once on every path
    /// out, and never changes the returned code.
    ///
    /// # Errors
    /// Returns error if the spec is invalid (nothing is created then) or the
    /// bootstrap could not be started.
    pub fn launch(&self, spec: &ContainerSpec) -> Result<i32> {
        spec.validate(self.core_count)?;
        self.hierarchy.validate()?;

        let lease = CgroupLease::new(self.limiter, spec.id.clone());

        let result = self.spawn(spec).and_then(|child| {
            ContainerEvent::Started {
                id: spec.id.clone(),
                pid: child.as_raw(),
                timestamp: SystemTime::now(),
            }
            .emit_trace();

            let _forwarding = signals::forward_to(child);
            wait_for(child)
        });

        let report = lease.release();
        ContainerEvent::CleanedUp {
            id: spec.id.clone(),
            removed: report.removed.len(),
            errors: report.errors.len(),
            timestamp: SystemTime::now(),
        }
        .emit_trace();

        match &result {
            Ok(code) => ContainerEvent::Exited {
                id: spec.id.clone(),
                exit_code: *code,
                timestamp: SystemTime::now(),
            },
            Err(e) => ContainerEvent::StartupFailed {
                id: spec.id.clone(),
                message: e.to_string(),
                timestamp: SystemTime::now(),
            },
        }
        .emit_trace();

        result
    }

    /// Clone the bootstrap and confirm it reached exec
    fn spawn(&self, spec: &ContainerSpec) -> Result<Pid> {
        let argv = self.bootstrap_argv(spec);
        let program = to_cstring(self.program.as_os_str().as_bytes())?;
        let c_argv = argv
            .iter()
            .map(|a| to_cstring(a.as_bytes()))
            .collect::<Result<Vec<_>>>()?;

        let flags = self.namespaces.to_clone_flags();
        info!(
            container_id = %spec.id,
            namespaces = ?self.namespaces.enabled_namespaces(),
            program = %self.program.display(),
            "Starting bootstrap"
        );

        // The pipe closes on a successful exec; an errno arrives otherwise
        let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| Error::errno("pipe2", e))?;

        let mut stack = vec![0u8; STACK_SIZE];
        let child_fn = Box::new(|| exec_bootstrap(&program, &c_argv, &status_write));

        let child = unsafe {
            clone(
                child_fn,
                &mut stack,
                flags,
                Some(Signal::SIGCHLD as libc::c_int),
            )
        }
        .map_err(|e| {
            error!(container_id = %spec.id, error = %e, "clone failed");
            Error::errno("clone", e)
        })?;

        drop(status_write);

        debug!(container_id = %spec.id, pid = child.as_raw(), "Bootstrap cloned");

        match read_exec_errno(status_read) {
            Ok(None) => Ok(child),
            Ok(Some(errno)) => {
                // Reap the child that never reached the bootstrap
                let _ = waitpid(child, None);
                Err(Error::Launch {
                    message: format!("exec of {} failed: {errno}", self.program.display()),
                })
            }
            Err(e) => {
                let _ = waitpid(child, None);
                Err(e)
            }
        }
    }
}

impl<L: ResourceLimiter + ?Sized> std::fmt::Debug for Launcher<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("hierarchy", &self.hierarchy)
            .field("namespaces", &self.namespaces)
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

fn to_cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|e| Error::invalid_config(format!("Argument contains NUL: {e}")))
}

/// Runs in the cloned child: exec, or report why not
fn exec_bootstrap(program: &CString, argv: &[CString], status: &OwnedFd) -> isize {
    let Err(errno) = execv(program, argv);
    let _ = write(status, &(errno as i32).to_ne_bytes());
    exit::RUNTIME_FAILURE as isize
}

fn read_exec_errno(status: OwnedFd) -> Result<Option<Errno>> {
    let mut pipe = File::from(status);
    let mut buf = [0u8; 4];
    let mut filled = 0;

    while filled < buf.len() {
        match pipe.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::io("read exec status", e)),
        }
    }

    Ok(match filled {
        0 => None,
        4 => Some(Errno::from_raw(i32::from_ne_bytes(buf))),
        _ => Some(Errno::UnknownErrno),
    })
}

/// Parent side: wait for the bootstrap and turn its status into an exit code
fn wait_for(child: Pid) -> Result<i32> {
    debug!(pid = child.as_raw(), "Waiting for bootstrap to exit");

    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, exit_code)) => {
                info!(pid = child.as_raw(), exit_code, "Bootstrap exited");
                return Ok(exit_code);
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                warn!(pid = child.as_raw(), ?signal, "Bootstrap terminated by signal");
                // Exit codes for signals: 128 + signal number
                return Ok(exit::from_signal(signal as i32));
            }
            Ok(status) => {
                debug!("Bootstrap status: {:?}", status);
                // Continue waiting for exit
            }
            Err(Errno::EINTR) => {
                // Interrupted by signal, continue waiting
                debug!("Wait interrupted by signal, continuing...");
            }
            Err(e) => {
                error!("Wait failed: {}", e);
                return Err(Error::Launch {
                    message: format!("Wait failed: {e}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_cgroup::MockLimiter;
    use skiff_core::{ContainerId, CpuCores, CpuLimit, CpuPeriod, ResourceLimits};

    fn spec(id: &str) -> ContainerSpec {
        ContainerSpec::builder("/bin/echo")
            .id(ContainerId::new(id).unwrap())
            .args(["hello"])
            .rootfs("/srv/containers/x")
            .build()
            .unwrap()
    }

    fn launcher(limiter: &MockLimiter) -> Launcher<'_, MockLimiter> {
        Launcher::new(limiter, CgroupHierarchy::new("/tmp/cg", "skiff-test"), 1)
            .with_namespaces(NamespaceConfig::none())
    }

    #[test]
    fn test_bootstrap_argv() {
        let limiter = MockLimiter::new();
        let argv = launcher(&limiter).with_verbose(true).bootstrap_argv(&spec("argv"));

        assert_eq!(argv[0], SELF_EXE);
        assert_eq!(argv[1], "--verbose");
        assert_eq!(argv[2], BootstrapArgs::SUBCOMMAND);
        assert_eq!(&argv[argv.len() - 3..], ["--", "/bin/echo", "hello"]);
        assert!(argv.iter().any(|a| a == "skiff-test"));
    }

    #[test]
    fn test_invalid_spec_never_spawns_or_cleans() {
        let limiter = MockLimiter::new();
        let mut spec = spec("bad");
        spec.limits = ResourceLimits {
            cpu: CpuLimit::new(CpuCores::new(0.5), CpuPeriod::from_micros(0)),
            ..ResourceLimits::default()
        };

        let err = launcher(&limiter).launch(&spec).unwrap_err();

        assert_eq!(err.exit_code(), exit::INVALID_CONFIG);
        assert_eq!(limiter.call_count(), 0);
    }

    #[test]
    fn test_exit_code_is_passed_through_and_cleanup_runs() {
        let limiter = MockLimiter::new();
        let spec = spec("passthrough");

        // /bin/false ignores the bootstrap arguments and exits 1
        let code = launcher(&limiter)
            .with_program("/bin/false")
            .launch(&spec)
            .unwrap();

        assert_eq!(code, 1);
        assert_eq!(limiter.cleanup_count(&spec.id), 1);
    }

    #[test]
    fn test_success_still_cleans_up_once() {
        let limiter = MockLimiter::new();
        let spec = spec("success");

        let code = launcher(&limiter)
            .with_program("/bin/true")
            .launch(&spec)
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(limiter.cleanup_count(&spec.id), 1);
    }

    #[test]
    fn test_exec_failure_is_startup_error() {
        let limiter = MockLimiter::new();
        let spec = spec("noexec");

        let err = launcher(&limiter)
            .with_program("/nonexistent/skiff")
            .launch(&spec)
            .unwrap_err();

        assert!(matches!(err, Error::Launch { .. }));
        assert!(exit::is_startup_failure(err.exit_code()));
        assert_eq!(limiter.cleanup_count(&spec.id), 1);
    }
}
