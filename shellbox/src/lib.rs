//! Shellbox - sandboxed shell sessions over a pluggable execution engine.
//!
//! A [`runtime::SandboxRuntime`] wraps an [`engine::Engine`] (real host
//! processes or a scripted mock) behind a small state machine. On top of it,
//! [`bootstrap::Provisioner`] runs the one-shot tool provisioning sequence,
//! [`shell::ShellSession`] manages the single interactive shell, and
//! [`terminal::TerminalAdapter`] bridges the shell to a rendered terminal
//! widget. [`chat`] holds the assistant HTTP boundary and chat history.
//!
//! ```no_run
//! use std::sync::Arc;
//! use shellbox::bootstrap::{BootstrapConfig, Provisioner};
//! use shellbox::engine::host::HostEngine;
//! use shellbox::runtime::SandboxRuntime;
//!
//! # async fn boot() -> shellbox::ShellboxResult<()> {
//! let engine = Arc::new(HostEngine::new(None)?);
//! let runtime = Arc::new(SandboxRuntime::new(engine));
//! runtime.boot().await?;
//!
//! let provisioner = Provisioner::new(Arc::clone(&runtime), BootstrapConfig::default());
//! provisioner.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod chat;
pub mod engine;
pub mod errors;
pub mod runtime;
pub mod shell;
pub mod status;
pub mod terminal;

pub use errors::{ShellboxError, ShellboxResult};
pub use runtime::{RuntimeId, RuntimeInfo, RuntimeStatus, SandboxRuntime};
pub use status::{project, UiPhase};

// The core handles cross task boundaries; keep them Send + Sync.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SandboxRuntime>();
    assert_send_sync::<bootstrap::Provisioner>();
    assert_send_sync::<shell::ShellSession>();
    assert_send_sync::<terminal::TerminalAdapter>();
};
