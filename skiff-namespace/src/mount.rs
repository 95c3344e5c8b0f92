//! Mount orchestration for the container root
//!
//! [`with_mounts`] attaches `proc` and a scratch `tmpfs`, runs a body, and
//! detaches both again in reverse order. Every mount is held by a
//! [`MountGuard`], so an early return or a panic inside the body still
//! unmounts.
//!
//! Before anything is mounted, the bootstrap makes its whole mount tree
//! private with [`Mounter::make_private`]. Without that, a host whose `/` is
//! a shared mount (the systemd default) would see the container's mounts
//! appear in its own mount table.

use nix::mount::{mount, umount, MsFlags};
use skiff_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Mount point of the scratch tmpfs, relative to the container root
pub const TMPFS_DIR: &str = "tmpfs_container";

/// One filesystem to attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Source passed to mount(2)
    pub source: &'static str,
    /// Mount point
    pub target: PathBuf,
    /// Filesystem type
    pub fstype: &'static str,
    /// Mount flags
    pub flags: MsFlags,
}

impl MountSpec {
    /// `proc` at `<root>/proc`, without setuid, devices or exec
    #[must_use]
    pub fn proc(root: &Path) -> Self {
        Self {
            source: "proc",
            target: root.join("proc"),
            fstype: "proc",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        }
    }

    /// In-memory scratch space at `<root>/tmpfs_container`
    #[must_use]
    pub fn tmpfs(root: &Path) -> Self {
        Self {
            source: TMPFS_DIR,
            target: root.join(TMPFS_DIR),
            fstype: "tmpfs",
            flags: MsFlags::empty(),
        }
    }
}

/// Attaches and detaches filesystems
///
/// - [`SyscallMounter`] - mount(2) and umount(2)
/// - [`RecordingMounter`] - records calls, for tests
pub trait Mounter {
    /// Attach `spec`
    ///
    /// # Errors
    /// Returns error if the kernel refuses the mount
    fn mount(&self, spec: &MountSpec) -> Result<()>;

    /// Detach whatever is mounted at `target`
    ///
    /// # Errors
    /// Returns error if the kernel refuses the unmount
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Recursively mark the mounts under `target` private, so later mount
    /// events stay in the current mount namespace
    ///
    /// # Errors
    /// Returns error if the kernel refuses the propagation change
    fn make_private(&self, target: &Path) -> Result<()>;
}

/// Mounts through the kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallMounter;

impl Mounter for SyscallMounter {
    fn mount(&self, spec: &MountSpec) -> Result<()> {
        debug!(
            source = spec.source,
            target = %spec.target.display(),
            fstype = spec.fstype,
            "Mounting"
        );

        mount(
            Some(spec.source),
            spec.target.as_path(),
            Some(spec.fstype),
            spec.flags,
            None::<&str>,
        )
        .map_err(|e| {
            Error::errno(
                format!("mount {} at {}", spec.fstype, spec.target.display()),
                e,
            )
        })
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        debug!(target = %target.display(), "Unmounting");

        umount(target).map_err(|e| Error::Mount {
            target: target.display().to_string(),
            message: e.desc().to_string(),
        })
    }

    fn make_private(&self, target: &Path) -> Result<()> {
        debug!(target = %target.display(), "Making mount tree private");

        mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )
        .map_err(|e| Error::errno(format!("make {} private", target.display()), e))
    }
}

/// A mounted filesystem that is detached when the guard goes away
#[must_use = "dropping the guard unmounts immediately"]
pub struct MountGuard<'a, M: Mounter + ?Sized> {
    mounter: &'a M,
    target: PathBuf,
    mounted: bool,
}

impl<'a, M: Mounter + ?Sized> MountGuard<'a, M> {
    /// Mount `spec` and guard it
    ///
    /// # Errors
    /// Returns error if the mount fails; nothing is attached in that case
    pub fn mount(mounter: &'a M, spec: &MountSpec) -> Result<Self> {
        mounter.mount(spec)?;
        Ok(Self {
            mounter,
            target: spec.target.clone(),
            mounted: true,
        })
    }

    /// Mount point
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Unmount now and report the outcome
    ///
    /// # Errors
    /// Returns error if the unmount fails; it is not retried on drop
    pub fn unmount(mut self) -> Result<()> {
        self.mounted = false;
        self.mounter.unmount(&self.target)
    }
}

impl<M: Mounter + ?Sized> Drop for MountGuard<'_, M> {
    fn drop(&mut self) {
        if !self.mounted {
            return;
        }

        if let Err(e) = self.mounter.unmount(&self.target) {
            warn!(target = %self.target.display(), error = %e, "Unmount on drop failed");
        }
    }
}

impl<M: Mounter + ?Sized> std::fmt::Debug for MountGuard<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountGuard")
            .field("target", &self.target)
            .field("mounted", &self.mounted)
            .finish_non_exhaustive()
    }
}

/// A body's result together with any problems detaching its mounts
#[derive(Debug)]
pub struct Scoped<T> {
    /// What the body returned
    pub value: T,
    /// Unmount failures, tmpfs first; empty when both detached cleanly
    pub unmount_errors: Vec<Error>,
}

/// Run `body` with `proc` and the scratch tmpfs mounted under `root`
///
/// Unmounts tmpfs and then proc on every path out, including a panic in
/// `body`. A failed unmount never replaces the body's value: it is handed
/// back in [`Scoped::unmount_errors`] and the caller decides what it means.
///
/// # Errors
/// Returns error if either mount fails. When tmpfs fails, proc has already
/// been unmounted again.
pub fn with_mounts<M, T, F>(mounter: &M, root: &Path, body: F) -> Result<Scoped<T>>
where
    M: Mounter + ?Sized,
    F: FnOnce() -> T,
{
    let proc_guard = MountGuard::mount(mounter, &MountSpec::proc(root))?;

    let tmpfs = MountSpec::tmpfs(root);
    fs::create_dir_all(&tmpfs.target)
        .map_err(|e| Error::io(format!("create {}", tmpfs.target.display()), e))?;
    let tmpfs_guard = MountGuard::mount(mounter, &tmpfs)?;

    let value = body();

    let unmount_errors = [tmpfs_guard.unmount(), proc_guard.unmount()]
        .into_iter()
        .filter_map(std::result::Result::err)
        .collect();

    Ok(Scoped {
        value,
        unmount_errors,
    })
}

/// A call seen by [`RecordingMounter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    /// mount at this target
    Mount(PathBuf),
    /// unmount of this target
    Unmount(PathBuf),
    /// propagation of this subtree set to private
    MakePrivate(PathBuf),
}

/// Mounter that only records calls (doesn't touch the kernel)
///
/// Failures can be injected per mount point.
#[derive(Clone, Default)]
pub struct RecordingMounter {
    state: Arc<Mutex<RecordingState>>,
}

#[derive(Default)]
struct RecordingState {
    calls: Vec<MountCall>,
    fail_mount: Option<PathBuf>,
    fail_unmount: Option<PathBuf>,
}

impl RecordingMounter {
    /// Create a new recording mounter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse to mount at `target`, or to make it private
    #[must_use]
    pub fn fail_mount_at(self, target: impl Into<PathBuf>) -> Self {
        self.state().fail_mount = Some(target.into());
        self
    }

    /// Refuse to unmount `target`
    #[must_use]
    pub fn fail_unmount_at(self, target: impl Into<PathBuf>) -> Self {
        self.state().fail_unmount = Some(target.into());
        self
    }

    /// Every call so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<MountCall> {
        self.state().calls.clone()
    }

    /// Targets still mounted, oldest first
    #[must_use]
    pub fn attached(&self) -> Vec<PathBuf> {
        let mut attached = Vec::new();
        for call in &self.state().calls {
            match call {
                MountCall::Mount(t) => attached.push(t.clone()),
                MountCall::Unmount(t) => attached.retain(|a| a != t),
                MountCall::MakePrivate(_) => {}
            }
        }
        attached
    }
}

impl std::fmt::Debug for RecordingMounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingMounter").finish_non_exhaustive()
    }
}

impl Mounter for RecordingMounter {
    fn mount(&self, spec: &MountSpec) -> Result<()> {
        let mut state = self.state();
        if state.fail_mount.as_ref() == Some(&spec.target) {
            return Err(Error::errno(
                format!("mount {}", spec.target.display()),
                nix::errno::Errno::EPERM,
            ));
        }
        state.calls.push(MountCall::Mount(spec.target.clone()));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let mut state = self.state();
        // The call is recorded even when it fails: umount(2) was attempted
        state.calls.push(MountCall::Unmount(target.to_path_buf()));
        if state.fail_unmount.as_deref() == Some(target) {
            return Err(Error::Mount {
                target: target.display().to_string(),
                message: "Device or resource busy".to_string(),
            });
        }
        Ok(())
    }

    fn make_private(&self, target: &Path) -> Result<()> {
        let mut state = self.state();
        if state.fail_mount.as_deref() == Some(target) {
            return Err(Error::errno(
                format!("make {} private", target.display()),
                nix::errno::Errno::EINVAL,
            ));
        }
        state.calls.push(MountCall::MakePrivate(target.to_path_buf()));
        Ok(())
    }
}
