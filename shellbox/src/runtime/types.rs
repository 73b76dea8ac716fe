//! Core data types for runtime lifecycle management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime identifier (ULID format for sortability).
pub type RuntimeId = String;

/// Generate a new ULID-based runtime ID.
pub fn generate_runtime_id() -> RuntimeId {
    ulid::Ulid::new().to_string()
}

/// Lifecycle status of a sandbox runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    /// Created, not yet booted.
    Idle,
    /// Boot in progress.
    Booting,
    /// Engine initialized; operations are available.
    Ready,
    /// Boot failed; terminal for this instance.
    Error,
}

impl RuntimeStatus {
    /// Whether `boot()` may start from this status.
    pub fn can_boot(self) -> bool {
        self == RuntimeStatus::Idle
    }

    pub fn is_ready(self) -> bool {
        self == RuntimeStatus::Ready
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RuntimeStatus::Idle => "idle",
            RuntimeStatus::Booting => "booting",
            RuntimeStatus::Ready => "ready",
            RuntimeStatus::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Snapshot of a runtime's identity and state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub id: RuntimeId,
    pub status: RuntimeStatus,
    pub created_at: DateTime<Utc>,
    /// Boot error detail, present only when status is `Error`.
    pub error: Option<String>,
}
