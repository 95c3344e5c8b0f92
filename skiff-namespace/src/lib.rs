//! Namespace isolation and the container bootstrap sequence
//!
//! This crate provides both halves of a container's start:
//! - Launcher - clones the bootstrap into new UTS, PID and mount namespaces
//! - Bootstrap - installs limits, sets the hostname, confines the root and
//!   runs the command with `proc` and a scratch `tmpfs` mounted
//! - Mount orchestration with guaranteed, reverse-order unmounting
//! - Root filesystem confinement and preparation from a base image

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod bootstrap;
pub mod config;
pub mod launcher;
pub mod mount;
pub mod rootfs;
pub mod signals;

pub use bootstrap::{Bootstrap, BootstrapState, HostOps, SyscallHost};
pub use config::NamespaceConfig;
pub use launcher::Launcher;
pub use mount::{with_mounts, MountGuard, MountSpec, Mounter, RecordingMounter, SyscallMounter};
pub use rootfs::PreparedRoot;
