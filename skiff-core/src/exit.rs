//! Exit-code convention
//!
//! The `run` command reports the contained program's exit code unchanged,
//! except for the reserved range below, which means the container never
//! started. Codes 126, 127 and `128 + n` follow the shell convention for a
//! command that could not be executed, was not found, or died from signal `n`.

use std::ops::RangeInclusive;

/// Invalid values; nothing was created
pub const INVALID_CONFIG: i32 = 121;
/// Clone, chroot or a cgroup write was refused
pub const PERMISSION_DENIED: i32 = 122;
/// Controller not mounted, directory creation failed
pub const RESOURCE_UNAVAILABLE: i32 = 123;
/// Any other failure before the command ran
pub const RUNTIME_FAILURE: i32 = 125;
/// The contained command exists but cannot be executed
pub const COMMAND_NOT_EXECUTABLE: i32 = 126;
/// The contained command does not exist
pub const COMMAND_NOT_FOUND: i32 = 127;
/// Added to the signal number of a signal-terminated process
pub const SIGNAL_BASE: i32 = 128;

/// Codes reserved for "the container never started"
pub const STARTUP_FAILURE: RangeInclusive<i32> = INVALID_CONFIG..=RUNTIME_FAILURE;

/// Whether `code` lies in the reserved startup-failure range
#[must_use]
pub fn is_startup_failure(code: i32) -> bool {
    STARTUP_FAILURE.contains(&code)
}

/// Exit code for a process terminated by `signal`
#[must_use]
pub const fn from_signal(signal: i32) -> i32 {
    SIGNAL_BASE + signal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_range() {
        assert!(!is_startup_failure(120));
        assert!(is_startup_failure(INVALID_CONFIG));
        assert!(is_startup_failure(RUNTIME_FAILURE));
        assert!(!is_startup_failure(COMMAND_NOT_EXECUTABLE));
    }
}
