//! Container root directories: preparation on the host, confinement inside

use skiff_core::{Error, Result};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Make `root` the process's filesystem root and move into it
///
/// chroot is one-way: there is no path back to the host tree afterwards.
///
/// # Errors
/// Returns [`Error::PermissionDenied`] without `CAP_SYS_CHROOT`, or a
/// resource error if `root` does not exist.
pub fn confine(root: &Path) -> Result<()> {
    debug!(root = %root.display(), "Confining to container root");

    unix::fs::chroot(root).map_err(|e| Error::io(format!("chroot {}", root.display()), e))?;
    std::env::set_current_dir("/").map_err(|e| Error::io("chdir /", e))?;

    Ok(())
}

/// A container root copied from a base image, removed again on drop
#[derive(Debug)]
pub struct PreparedRoot {
    path: PathBuf,
    removed: bool,
}

impl PreparedRoot {
    /// Copy `image` into the fresh directory `dest` with rsync
    ///
    /// Permissions, ACLs, extended attributes and symlinks are preserved.
    /// A partial copy is removed before an error is returned.
    ///
    /// # Errors
    /// Returns error if `image` is not a directory, `dest` already exists,
    /// rsync is missing, or the copy fails
    pub fn copy_from_image(image: &Path, dest: &Path) -> Result<Self> {
        if !image.is_dir() {
            return Err(Error::ResourceUnavailable {
                resource: image.display().to_string(),
                message: "base image directory does not exist".to_string(),
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("create {}", parent.display()), e))?;
        }

        fs::create_dir(dest).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Error::invalid_config(format!("{} already exists", dest.display()))
            } else {
                Error::io(format!("create {}", dest.display()), e)
            }
        })?;

        // From here on the guard owns dest
        let root = Self {
            path: dest.to_path_buf(),
            removed: false,
        };

        // Trailing slash: copy the image's contents, not the directory itself
        let mut source = OsString::from(image.as_os_str());
        source.push("/");

        info!(
            image = %image.display(),
            dest = %dest.display(),
            "Copying base image into container root"
        );

        let output = Command::new("rsync")
            .arg("-raAX")
            .arg("--links")
            .arg(&source)
            .arg(dest)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::ResourceUnavailable {
                    resource: "rsync".to_string(),
                    message: "rsync is required to prepare a container root".to_string(),
                },
                _ => Error::io("spawn rsync", e),
            })?;

        if !output.status.success() {
            return Err(Error::ResourceUnavailable {
                resource: image.display().to_string(),
                message: format!(
                    "rsync exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(root)
    }

    /// The prepared directory
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the copy now
    ///
    /// # Errors
    /// Returns error if the tree cannot be removed
    pub fn remove(mut self) -> Result<()> {
        self.removed = true;
        remove_tree(&self.path)
    }
}

impl Drop for PreparedRoot {
    fn drop(&mut self) {
        if self.removed {
            return;
        }

        if let Err(e) = remove_tree(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Could not remove container root");
        }
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed container root");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!("remove {}", path.display()), e)),
    }
}
