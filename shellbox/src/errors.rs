//! Error taxonomy shared across the crate.

use thiserror::Error;

use crate::bootstrap::Stage;

/// Result alias using [`ShellboxError`].
pub type ShellboxResult<T> = std::result::Result<T, ShellboxError>;

/// Errors that can occur in shellbox operations.
#[derive(Error, Debug)]
pub enum ShellboxError {
    /// Engine could not initialize (e.g. isolation preconditions unmet).
    /// Fatal to the session; no retry path.
    #[error("boot error: {0}")]
    Boot(String),

    /// Mounting the template tree failed.
    #[error("mount error: {0}")]
    Mount(String),

    /// A provisioning step failed. Carries the offending stage.
    #[error("bootstrap failed at {stage}: {message}")]
    Bootstrap { stage: Stage, message: String },

    /// A provisioning step exceeded its deadline.
    #[error("bootstrap step {stage} timed out after {seconds}s")]
    BootstrapTimeout { stage: Stage, seconds: u64 },

    /// Process could not start, or runtime was not ready to spawn.
    #[error("spawn error: {0}")]
    Spawn(String),

    /// Operation invoked against a component in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Handle used after the runtime was disposed.
    #[error("runtime disposed: {0}")]
    Disposed(String),

    /// Engine-internal failure (process plumbing, pty allocation).
    #[error("engine error: {0}")]
    Engine(String),

    /// Assistant or relay HTTP call failed. Local to one chat turn.
    #[error("remote call failed: {0}")]
    RemoteCall(String),

    /// Message store rejected an operation.
    #[error("store error: {0}")]
    Store(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
