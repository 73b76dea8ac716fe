//! Public runtime handle wrapping an injected engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::types::{RuntimeId, RuntimeInfo, RuntimeStatus, generate_runtime_id};
use crate::engine::{Engine, FileTree, ProcessHandle, SpawnSpec};
use crate::errors::{ShellboxError, ShellboxResult};

struct RuntimeState {
    status: RuntimeStatus,
    error: Option<String>,
}

/// Handle to one sandbox instance.
///
/// Owns the engine for its lifetime; explicitly constructed and injected into
/// the components that need it, never ambient. `boot()` is idempotent: a call
/// while booting or ready is a no-op, and a recorded boot failure is terminal
/// for the instance.
pub struct SandboxRuntime {
    id: RuntimeId,
    engine: Arc<dyn Engine>,
    state: RwLock<RuntimeState>,
    created_at: DateTime<Utc>,
    shutdown: CancellationToken,
}

impl SandboxRuntime {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            id: generate_runtime_id(),
            engine,
            state: RwLock::new(RuntimeState {
                status: RuntimeStatus::Idle,
                error: None,
            }),
            created_at: Utc::now(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &RuntimeId {
        &self.id
    }

    pub fn status(&self) -> RuntimeStatus {
        self.state.read().status
    }

    pub fn info(&self) -> RuntimeInfo {
        let state = self.state.read();
        RuntimeInfo {
            id: self.id.clone(),
            status: state.status,
            created_at: self.created_at,
            error: state.error.clone(),
        }
    }

    /// The sandbox root as seen by processes inside it.
    pub fn home_dir(&self) -> String {
        self.engine.home_dir()
    }

    /// Initialize the execution environment.
    ///
    /// No-op while `Booting` or `Ready`. A previous boot failure is returned
    /// again without touching the engine; there is no retry path short of a
    /// new runtime instance.
    pub async fn boot(&self) -> ShellboxResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(ShellboxError::Disposed(
                "boot() called after dispose()".into(),
            ));
        }
        {
            let mut state = self.state.write();
            match state.status {
                RuntimeStatus::Booting | RuntimeStatus::Ready => return Ok(()),
                RuntimeStatus::Error => {
                    let detail = state
                        .error
                        .clone()
                        .unwrap_or_else(|| "previous boot failed".into());
                    return Err(ShellboxError::Boot(detail));
                }
                RuntimeStatus::Idle => state.status = RuntimeStatus::Booting,
            }
        }

        tracing::info!(runtime_id = %self.id, "booting sandbox runtime");
        match self.engine.boot().await {
            Ok(()) => {
                self.state.write().status = RuntimeStatus::Ready;
                tracing::info!(runtime_id = %self.id, "sandbox runtime ready");
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.write();
                state.status = RuntimeStatus::Error;
                state.error = Some(e.to_string());
                tracing::error!(runtime_id = %self.id, error = %e, "sandbox boot failed");
                Err(e)
            }
        }
    }

    /// Mount a file tree at the workspace root. Idempotent per distinct tree.
    pub async fn mount(&self, tree: &FileTree) -> ShellboxResult<()> {
        self.require_ready("mount")?;
        self.engine.mount(tree).await
    }

    /// Spawn a process inside the sandbox.
    pub async fn spawn(&self, spec: SpawnSpec) -> ShellboxResult<ProcessHandle> {
        if !self.status().is_ready() {
            return Err(ShellboxError::Spawn(format!(
                "runtime {} is not ready (status: {})",
                self.id,
                self.status()
            )));
        }
        self.engine.spawn(spec).await
    }

    pub async fn write_file(&self, path: &str, contents: &[u8]) -> ShellboxResult<()> {
        self.require_ready("write_file")?;
        self.engine.write_file(path, contents).await
    }

    pub async fn read_dir(&self, path: &str) -> ShellboxResult<Vec<String>> {
        self.require_ready("read_dir")?;
        self.engine.read_dir(path).await
    }

    /// Release the engine instance. Idempotent.
    pub async fn dispose(&self) -> ShellboxResult<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();
        self.engine.shutdown().await?;
        self.state.write().status = RuntimeStatus::Idle;
        tracing::info!(runtime_id = %self.id, "sandbox runtime disposed");
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn require_ready(&self, op: &str) -> ShellboxResult<()> {
        let status = self.status();
        if status.is_ready() {
            Ok(())
        } else {
            Err(ShellboxError::InvalidState(format!(
                "{op} requires a ready runtime (status: {status})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    #[tokio::test]
    async fn boot_transitions_to_ready() {
        let rt = SandboxRuntime::new(Arc::new(MockEngine::new()));
        assert_eq!(rt.status(), RuntimeStatus::Idle);
        rt.boot().await.unwrap();
        assert_eq!(rt.status(), RuntimeStatus::Ready);
    }

    #[tokio::test]
    async fn boot_twice_is_noop() {
        let rt = SandboxRuntime::new(Arc::new(MockEngine::new()));
        rt.boot().await.unwrap();
        rt.boot().await.unwrap();
        assert_eq!(rt.status(), RuntimeStatus::Ready);
    }

    #[tokio::test]
    async fn boot_failure_is_terminal() {
        let rt = SandboxRuntime::new(Arc::new(
            MockEngine::new().with_boot_error("isolation preconditions unmet"),
        ));
        let err = rt.boot().await.unwrap_err();
        assert!(matches!(err, ShellboxError::Boot(_)));
        assert_eq!(rt.status(), RuntimeStatus::Error);

        // Re-entry surfaces the recorded failure, never re-boots.
        let err = rt.boot().await.unwrap_err();
        assert!(matches!(err, ShellboxError::Boot(_)));
        assert!(rt.info().error.is_some());
    }

    #[tokio::test]
    async fn spawn_before_ready_fails() {
        let rt = SandboxRuntime::new(Arc::new(MockEngine::new()));
        let err = rt.spawn(SpawnSpec::new("true")).await.unwrap_err();
        assert!(matches!(err, ShellboxError::Spawn(_)));
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let rt = SandboxRuntime::new(Arc::new(MockEngine::new()));
        rt.boot().await.unwrap();
        rt.dispose().await.unwrap();
        rt.dispose().await.unwrap();
        assert!(rt.is_disposed());
        assert!(matches!(
            rt.boot().await.unwrap_err(),
            ShellboxError::Disposed(_)
        ));
    }
}
