//! cgroup v1 resource limits with pluggable backends
//!
//! This crate provides a trait-based abstraction over the cgroup v1 `cpu` and
//! `memory` controllers for container resource limits, including the
//! production limiter, a mock for tests, and the cleanup that removes a
//! container's groups once it has exited.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
pub mod cleanup;
pub mod controller;
pub mod lease;
pub mod limits;

pub use backend::{CgroupMembership, CgroupV1, MockLimiter, ResourceLimiter};
pub use cleanup::CleanupReport;
pub use controller::{CgroupGroup, Controller};
pub use lease::CgroupLease;

// Re-export commonly used types
pub use skiff_core::{CgroupHierarchy, CpuLimit, MemoryLimit, ResourceLimits};
