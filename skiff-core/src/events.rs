//! Container lifecycle events with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::ContainerId;

/// Events emitted during one container's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerEvent {
    /// Bootstrap process created in its new namespaces
    Started {
        /// Container ID
        id: ContainerId,
        /// Host PID of the bootstrap process
        pid: i32,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// The container never reached its command
    StartupFailed {
        /// Container ID
        id: ContainerId,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Bootstrap process exited
    Exited {
        /// Container ID
        id: ContainerId,
        /// Exit code
        exit_code: i32,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Host-side cgroup state removed
    CleanedUp {
        /// Container ID
        id: ContainerId,
        /// Directories removed
        removed: usize,
        /// Problems reported (never fatal)
        errors: usize,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },
}

impl ContainerEvent {
    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::Started { id, pid, .. } => {
                tracing::info!(
                    container_id = %id,
                    pid,
                    event = "started",
                    "Container started"
                );
            }
            Self::StartupFailed { id, message, .. } => {
                tracing::error!(
                    container_id = %id,
                    message = %message,
                    event = "startup_failed",
                    "Container failed to start"
                );
            }
            Self::Exited { id, exit_code, .. } => {
                tracing::info!(
                    container_id = %id,
                    exit_code,
                    event = "exited",
                    "Container exited"
                );
            }
            Self::CleanedUp {
                id,
                removed,
                errors,
                ..
            } => {
                if *errors == 0 {
                    tracing::debug!(
                        container_id = %id,
                        removed,
                        event = "cleaned_up",
                        "Container cleaned up"
                    );
                } else {
                    tracing::warn!(
                        container_id = %id,
                        removed,
                        errors,
                        event = "cleaned_up",
                        "Container cleanup incomplete"
                    );
                }
            }
        }
    }
}

impl fmt::Display for ContainerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { id, pid, .. } => write!(f, "Container {id} started as pid {pid}"),
            Self::StartupFailed { id, message, .. } => {
                write!(f, "Container {id} failed to start: {message}")
            }
            Self::Exited { id, exit_code, .. } => {
                write!(f, "Container {id} exited with code {exit_code}")
            }
            Self::CleanedUp {
                id,
                removed,
                errors,
                ..
            } => write!(
                f,
                "Container {id} cleaned up ({removed} removed, {errors} errors)"
            ),
        }
    }
}

// Custom SystemTime serialization
mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(since_epoch.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let id = ContainerId::new("test").unwrap();
        let event = ContainerEvent::Exited {
            id,
            exit_code: 3,
            timestamp: SystemTime::now(),
        };

        assert_eq!(event.to_string(), "Container test exited with code 3");
    }

    #[test]
    fn test_event_serde() {
        let id = ContainerId::new("test").unwrap();
        let event = ContainerEvent::CleanedUp {
            id,
            removed: 2,
            errors: 0,
            timestamp: SystemTime::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"cleaned_up""#));

        let deserialized: ContainerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.to_string(), event.to_string());
    }
}
