//! Error types for Skiff

use nix::errno::Errno;
use std::io;
use thiserror::Error;

use crate::exit;

/// Broad failure classes, each owning one exit code of the startup range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid values, detected before any kernel side effect
    Configuration,
    /// The kernel refused an operation for lack of privilege
    Privilege,
    /// A host resource is missing or unusable (controller mount, directory)
    ResourceUnavailable,
    /// Anything else that stopped the container from starting
    Runtime,
}

impl ErrorKind {
    /// Exit code reserved for this class of startup failure
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Configuration => exit::INVALID_CONFIG,
            Self::Privilege => exit::PERMISSION_DENIED,
            Self::ResourceUnavailable => exit::RESOURCE_UNAVAILABLE,
            Self::Runtime => exit::RUNTIME_FAILURE,
        }
    }
}

/// Skiff error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `CGroup` operation failed
    #[error("CGroup error: {message}")]
    CGroup {
        /// Error message
        message: String,
    },

    /// Mount or unmount failed
    #[error("Mount error on {target}: {message}")]
    Mount {
        /// Mount point
        target: String,
        /// Error message
        message: String,
    },

    /// Permission denied
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// A host resource does not exist or cannot be used
    #[error("Resource unavailable: {resource}: {message}")]
    ResourceUnavailable {
        /// Resource that was missing
        resource: String,
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// The bootstrap process could not be started
    #[error("Launch failed: {message}")]
    Launch {
        /// Error message
        message: String,
    },

    /// A system call failed
    #[error("{operation} failed: {errno}")]
    Syscall {
        /// Operation that failed
        operation: String,
        /// Raw errno
        errno: Errno,
    },

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),
}

impl Error {
    /// Shorthand for [`Error::InvalidConfig`]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Classify a failed syscall by its errno
    pub fn errno(operation: impl Into<String>, errno: Errno) -> Self {
        let operation = operation.into();
        match errno {
            Errno::EPERM | Errno::EACCES => Self::PermissionDenied {
                operation: format!("{operation}: {errno}"),
            },
            Errno::ENOENT | Errno::ENODEV | Errno::ENOTDIR => Self::ResourceUnavailable {
                resource: operation,
                message: errno.desc().to_string(),
            },
            _ => Self::Syscall { operation, errno },
        }
    }

    /// Classify a failed filesystem operation
    pub fn io(operation: impl Into<String>, err: io::Error) -> Self {
        let operation = operation.into();
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                operation: format!("{operation}: {err}"),
            },
            io::ErrorKind::NotFound => Self::ResourceUnavailable {
                resource: operation,
                message: err.to_string(),
            },
            _ => match err.raw_os_error() {
                Some(raw) => Self::Syscall {
                    operation,
                    errno: Errno::from_raw(raw),
                },
                None => Self::Io(err),
            },
        }
    }

    /// Failure class of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig { .. } => ErrorKind::Configuration,
            Self::PermissionDenied { .. } => ErrorKind::Privilege,
            Self::ResourceUnavailable { .. } | Self::CGroup { .. } | Self::Mount { .. } => {
                ErrorKind::ResourceUnavailable
            }
            Self::Syscall { errno, .. } | Self::System(errno) => errno_kind(*errno),
            Self::Launch { .. } | Self::Io(_) => ErrorKind::Runtime,
        }
    }

    /// Exit code the process reports when this error stops a container
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

const fn errno_kind(errno: Errno) -> ErrorKind {
    match errno {
        Errno::EPERM | Errno::EACCES => ErrorKind::Privilege,
        Errno::ENOENT | Errno::ENODEV | Errno::ENOTDIR => ErrorKind::ResourceUnavailable,
        Errno::EINVAL => ErrorKind::Configuration,
        _ => ErrorKind::Runtime,
    }
}

/// Result type alias for Skiff operations
pub type Result<T> = std::result::Result<T, Error>;
