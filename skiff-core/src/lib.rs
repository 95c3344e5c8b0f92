//! Skiff Core - Foundation types shared by the launcher and the bootstrap
//!
//! This crate provides the container description, resource value objects,
//! runtime configuration and the error taxonomy used throughout Skiff.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod events;
pub mod exit;
pub mod resources;
pub mod spec;
pub mod types;

pub use config::{CgroupHierarchy, RuntimeConfig};
pub use error::{Error, ErrorKind, Result};
pub use events::ContainerEvent;
pub use resources::{CpuCores, CpuLimit, CpuPeriod, MemoryLimit, MemorySize, ResourceLimits};
pub use spec::{BootstrapArgs, ContainerSpec, ContainerSpecBuilder};
pub use types::{ContainerId, ProcessId};
