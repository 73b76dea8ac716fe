//! Boot status projection.
//!
//! Collapses the runtime state machine and the provisioning flag into the
//! single phase a front end shows the user. Pure function of its inputs; the
//! caller re-projects whenever either input changes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeStatus;

/// User-facing boot phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiPhase {
    /// Sandbox is coming up.
    Booting,
    /// Sandbox is up, tooling is still being provisioned.
    Installing,
    /// Shell is ready to use.
    Ready,
    /// Boot or provisioning failed.
    Error,
}

impl UiPhase {
    /// Short label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            UiPhase::Booting => "Booting sandbox...",
            UiPhase::Installing => "Installing tools...",
            UiPhase::Ready => "Ready",
            UiPhase::Error => "Failed to start",
        }
    }
}

impl fmt::Display for UiPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Project runtime status and the provisioning flag into a [`UiPhase`].
///
/// An errored runtime always projects to [`UiPhase::Error`], regardless of
/// how far provisioning got.
pub fn project(status: RuntimeStatus, setup_complete: bool) -> UiPhase {
    match (status, setup_complete) {
        (RuntimeStatus::Error, _) => UiPhase::Error,
        (RuntimeStatus::Idle | RuntimeStatus::Booting, _) => UiPhase::Booting,
        (RuntimeStatus::Ready, false) => UiPhase::Installing,
        (RuntimeStatus::Ready, true) => UiPhase::Ready,
    }
}
