//! The in-namespace half of a container
//!
//! The bootstrap runs as PID 1 of the new PID namespace. It walks a fixed
//! sequence of states:
//!
//! ```text
//! Start -> LimitsInstalled -> HostnameSet -> RootConfined -> Mounted -> Running
//!                                                                         |
//!                                                           Succeeded / Failed
//! ```
//!
//! Reaching `RootConfined` includes making the mount tree private, so the
//! mounts that follow stay inside the container's mount namespace.
//!
//! Any error before `Running` ends in `Failed`, and its exit code falls in
//! the reserved startup-failure range. Once the command runs, its exit code
//! is the bootstrap's exit code.

use nix::unistd::{sethostname, Pid};
use skiff_cgroup::ResourceLimiter;
use skiff_core::{exit, ContainerSpec, Error, ProcessId, Result};
use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use tracing::{debug, error, info, warn};

use crate::mount::{self, Mounter};
use crate::rootfs;
use crate::signals;

/// Host-wide operations the bootstrap performs on itself
pub trait HostOps {
    /// Set the UTS hostname
    ///
    /// # Errors
    /// Returns error if the kernel refuses the name
    fn set_hostname(&self, name: &str) -> Result<()>;

    /// chroot into `root` and chdir to `/`
    ///
    /// # Errors
    /// Returns error if either call fails
    fn confine_root(&self, root: &Path) -> Result<()>;
}

/// [`HostOps`] through the kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallHost;

impl HostOps for SyscallHost {
    fn set_hostname(&self, name: &str) -> Result<()> {
        debug!(hostname = %name, "Setting hostname");
        sethostname(name).map_err(|e| Error::errno(format!("sethostname {name}"), e))
    }

    fn confine_root(&self, root: &Path) -> Result<()> {
        rootfs::confine(root)
    }
}

/// Where the bootstrap is in its sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Nothing done yet
    Start,
    /// Own pid moved into the container's cgroups
    LimitsInstalled,
    /// Hostname set to the container id
    HostnameSet,
    /// Mount tree made private, chroot into the container root done
    RootConfined,
    /// proc and tmpfs attached
    Mounted,
    /// User command started
    Running,
    /// User command ran to completion, whatever its exit code
    Succeeded,
    /// Setup failed before the command could run
    Failed,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::LimitsInstalled => "limits_installed",
            Self::HostnameSet => "hostname_set",
            Self::RootConfined => "root_confined",
            Self::Mounted => "mounted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Drives one container from `Start` to a terminal state
pub struct Bootstrap<'a, L: ?Sized, H: ?Sized, M: ?Sized> {
    spec: &'a ContainerSpec,
    limiter: &'a L,
    host: &'a H,
    mounter: &'a M,
    mount_root: PathBuf,
    state: BootstrapState,
}

impl<'a, L, H, M> Bootstrap<'a, L, H, M>
where
    L: ResourceLimiter + ?Sized,
    H: HostOps + ?Sized,
    M: Mounter + ?Sized,
{
    /// Prepare to bootstrap `spec`
    ///
    /// Mounts are placed under `/`, which is the container root once
    /// confinement has happened.
    #[must_use]
    pub fn new(spec: &'a ContainerSpec, limiter: &'a L, host: &'a H, mounter: &'a M) -> Self {
        Self {
            spec,
            limiter,
            host,
            mounter,
            mount_root: PathBuf::from("/"),
            state: BootstrapState::Start,
        }
    }

    /// Place the mounts under `root` instead of `/`
    #[must_use]
    pub fn with_mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mount_root = root.into();
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> BootstrapState {
        self.state
    }

    fn advance(&mut self, next: BootstrapState) {
        debug!(
            container_id = %self.spec.id,
            from = %self.state,
            to = %next,
            "Bootstrap state change"
        );
        self.state = next;
    }

    /// Run the whole sequence
    ///
    /// Returns the user command's exit code once it has run. Mounts that
    /// fail to detach afterwards are logged and leave that code unchanged;
    /// the tree is private, so they go away with the mount namespace.
    ///
    /// # Errors
    /// Returns the setup error that stopped the sequence; the state is then
    /// [`BootstrapState::Failed`].
    pub fn run(&mut self) -> Result<i32> {
        match self.drive() {
            Ok(code) => {
                self.advance(BootstrapState::Succeeded);
                Ok(code)
            }
            Err(e) => {
                error!(
                    container_id = %self.spec.id,
                    state = %self.state,
                    error = %e,
                    "Container setup failed"
                );
                self.advance(BootstrapState::Failed);
                Err(e)
            }
        }
    }

    fn drive(&mut self) -> Result<i32> {
        let spec = self.spec;
        let mounter = self.mounter;

        self.limiter
            .install_limits(&spec.id, ProcessId::current(), &spec.limits)?;
        self.advance(BootstrapState::LimitsInstalled);

        self.host.set_hostname(spec.id.as_str())?;
        self.advance(BootstrapState::HostnameSet);

        // Must precede every mount, or they propagate to the host
        mounter.make_private(Path::new("/"))?;
        self.host.confine_root(&spec.rootfs)?;
        self.advance(BootstrapState::RootConfined);

        let mount_root = self.mount_root.clone();
        let scoped = mount::with_mounts(mounter, &mount_root, || {
            self.advance(BootstrapState::Mounted);
            self.advance(BootstrapState::Running);
            run_command(spec)
        })?;

        for e in &scoped.unmount_errors {
            warn!(
                container_id = %spec.id,
                error = %e,
                event = "unmount_failed",
                "Mount left attached until the namespace exits"
            );
        }

        scoped.value
    }
}

impl<L: ?Sized, H: ?Sized, M: ?Sized> fmt::Debug for Bootstrap<'_, L, H, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("id", &self.spec.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Run the user command with inherited stdio and wait for it
///
/// A command that cannot be found or executed yields 127 or 126 rather than
/// an error: the container did start, its command did not.
pub fn run_command(spec: &ContainerSpec) -> Result<i32> {
    info!(
        container_id = %spec.id,
        command = %spec.command,
        args = ?spec.args,
        "Running command"
    );

    let mut child = match Command::new(&spec.command).args(&spec.args).spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            error!(command = %spec.command, "Command not found");
            return Ok(exit::COMMAND_NOT_FOUND);
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied
            || e.raw_os_error() == Some(libc::ENOEXEC) =>
        {
            error!(command = %spec.command, error = %e, "Command not executable");
            return Ok(exit::COMMAND_NOT_EXECUTABLE);
        }
        Err(e) => return Err(Error::io(format!("spawn {}", spec.command), e)),
    };

    #[allow(clippy::cast_possible_wrap)]
    let _forwarding = signals::forward_to(Pid::from_raw(child.id() as i32));

    let status = child
        .wait()
        .map_err(|e| Error::io(format!("wait for {}", spec.command), e))?;

    Ok(exit_code_of(status))
}

/// Shell-style exit code: the process's own code, or 128 + signal
#[must_use]
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => exit::from_signal(signal),
        (None, None) => exit::RUNTIME_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_cgroup::MockLimiter;
    use skiff_core::{ContainerId, ErrorKind};
    use std::sync::Mutex;

    use crate::mount::{MountCall, RecordingMounter, TMPFS_DIR};

    #[derive(Default)]
    struct RecordingHost {
        hostname: Mutex<Option<String>>,
        confined: Mutex<Option<PathBuf>>,
        refuse_chroot: bool,
    }

    impl HostOps for RecordingHost {
        fn set_hostname(&self, name: &str) -> Result<()> {
            *self.hostname.lock().unwrap() = Some(name.to_string());
            Ok(())
        }

        fn confine_root(&self, root: &Path) -> Result<()> {
            if self.refuse_chroot {
                return Err(Error::errno("chroot", nix::errno::Errno::EPERM));
            }
            *self.confined.lock().unwrap() = Some(root.to_path_buf());
            Ok(())
        }
    }

    fn spec(command: &str, args: &[&str]) -> ContainerSpec {
        ContainerSpec::builder(command)
            .id(ContainerId::new("boot").unwrap())
            .args(args.iter().copied())
            .rootfs("/srv/containers/boot")
            .build()
            .unwrap()
    }

    #[test]
    fn test_full_sequence_reports_command_exit_code() {
        let root = tempfile::tempdir().unwrap();
        let spec = spec("/bin/sh", &["-c", "exit 3"]);
        let limiter = MockLimiter::new();
        let host = RecordingHost::default();
        let mounter = RecordingMounter::new();

        let mut bootstrap =
            Bootstrap::new(&spec, &limiter, &host, &mounter).with_mount_root(root.path());
        assert_eq!(bootstrap.state(), BootstrapState::Start);

        let code = bootstrap.run().unwrap();

        assert_eq!(code, 3);
        assert_eq!(bootstrap.state(), BootstrapState::Succeeded);
        assert_eq!(
            limiter.installed(&spec.id).map(|(pid, _)| pid),
            Some(ProcessId::current())
        );
        assert_eq!(host.hostname.lock().unwrap().as_deref(), Some("boot"));
        assert_eq!(
            host.confined.lock().unwrap().as_deref(),
            Some(Path::new("/srv/containers/boot"))
        );
        assert_eq!(
            mounter.calls(),
            vec![
                MountCall::MakePrivate(PathBuf::from("/")),
                MountCall::Mount(root.path().join("proc")),
                MountCall::Mount(root.path().join(TMPFS_DIR)),
                MountCall::Unmount(root.path().join(TMPFS_DIR)),
                MountCall::Unmount(root.path().join("proc")),
            ]
        );
    }

    #[test]
    fn test_limit_failure_stops_before_hostname() {
        let spec = spec("/bin/true", &[]);
        let limiter = MockLimiter::failing(ErrorKind::Privilege);
        let host = RecordingHost::default();
        let mounter = RecordingMounter::new();

        let mut bootstrap = Bootstrap::new(&spec, &limiter, &host, &mounter);
        let err = bootstrap.run().unwrap_err();

        assert_eq!(err.exit_code(), exit::PERMISSION_DENIED);
        assert!(exit::is_startup_failure(err.exit_code()));
        assert_eq!(bootstrap.state(), BootstrapState::Failed);
        assert!(host.hostname.lock().unwrap().is_none());
        assert!(mounter.calls().is_empty());
    }

    #[test]
    fn test_chroot_refused_mounts_nothing() {
        let spec = spec("/bin/true", &[]);
        let limiter = MockLimiter::new();
        let host = RecordingHost {
            refuse_chroot: true,
            ..RecordingHost::default()
        };
        let mounter = RecordingMounter::new();

        let mut bootstrap = Bootstrap::new(&spec, &limiter, &host, &mounter);
        let err = bootstrap.run().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Privilege);
        assert_eq!(bootstrap.state(), BootstrapState::Failed);
        assert_eq!(host.hostname.lock().unwrap().as_deref(), Some("boot"));
        assert_eq!(mounter.calls(), vec![MountCall::MakePrivate(PathBuf::from("/"))]);
        assert!(mounter.attached().is_empty());
    }

    #[test]
    fn test_private_propagation_failure_stops_before_chroot() {
        let spec = spec("/bin/true", &[]);
        let limiter = MockLimiter::new();
        let host = RecordingHost::default();
        let mounter = RecordingMounter::new().fail_mount_at("/");

        let mut bootstrap = Bootstrap::new(&spec, &limiter, &host, &mounter);
        let err = bootstrap.run().unwrap_err();

        assert!(exit::is_startup_failure(err.exit_code()));
        assert_eq!(bootstrap.state(), BootstrapState::Failed);
        assert!(host.confined.lock().unwrap().is_none());
        assert!(mounter.calls().is_empty());
    }

    #[test]
    fn test_tmpfs_failure_unwinds_proc() {
        let root = tempfile::tempdir().unwrap();
        let spec = spec("/bin/true", &[]);
        let limiter = MockLimiter::new();
        let host = RecordingHost::default();
        let mounter = RecordingMounter::new().fail_mount_at(root.path().join(TMPFS_DIR));

        let mut bootstrap =
            Bootstrap::new(&spec, &limiter, &host, &mounter).with_mount_root(root.path());
        let err = bootstrap.run().unwrap_err();

        assert!(exit::is_startup_failure(err.exit_code()));
        assert_eq!(bootstrap.state(), BootstrapState::Failed);
        assert!(mounter.attached().is_empty());
    }

    #[test]
    fn test_missing_command_is_127() {
        let root = tempfile::tempdir().unwrap();
        let spec = spec("/nonexistent/command", &[]);
        let limiter = MockLimiter::new();
        let host = RecordingHost::default();
        let mounter = RecordingMounter::new();

        let mut bootstrap =
            Bootstrap::new(&spec, &limiter, &host, &mounter).with_mount_root(root.path());

        assert_eq!(bootstrap.run().unwrap(), exit::COMMAND_NOT_FOUND);
        assert_eq!(bootstrap.state(), BootstrapState::Succeeded);
        assert!(mounter.attached().is_empty());
    }

    #[test]
    fn test_non_executable_command_is_126() {
        let root = tempfile::tempdir().unwrap();
        let script = root.path().join("not-executable");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let spec = spec(script.to_str().unwrap(), &[]);
        assert_eq!(run_command(&spec).unwrap(), exit::COMMAND_NOT_EXECUTABLE);
    }

    #[test]
    fn test_signal_exit_code() {
        let spec = spec("/bin/sh", &["-c", "kill -9 $$"]);
        assert_eq!(run_command(&spec).unwrap(), 137);
    }

    #[test]
    fn test_unmount_error_keeps_command_code() {
        let root = tempfile::tempdir().unwrap();
        let spec = spec("/bin/sh", &["-c", "exit 0"]);
        let limiter = MockLimiter::new();
        let host = RecordingHost::default();
        let mounter = RecordingMounter::new().fail_unmount_at(root.path().join("proc"));

        let mut bootstrap =
            Bootstrap::new(&spec, &limiter, &host, &mounter).with_mount_root(root.path());

        assert_eq!(bootstrap.run().unwrap(), 0);
        assert_eq!(bootstrap.state(), BootstrapState::Succeeded);
        assert_eq!(
            mounter.calls().last(),
            Some(&MountCall::Unmount(root.path().join("proc")))
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BootstrapState::RootConfined.to_string(), "root_confined");
        assert_eq!(BootstrapState::Failed.to_string(), "failed");
    }
}
