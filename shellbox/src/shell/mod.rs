//! Shell session manager.
//!
//! [`ShellSession`] owns the single interactive shell inside a sandbox
//! runtime. Starting the shell is gated on three independent preconditions
//! (runtime ready, provisioning complete, terminal adapter ready); any caller
//! may poke [`ShellSession::start`] whenever one of them flips and the first
//! call with all three satisfied wins. The session survives widget remounts:
//! output is fanned out through a broadcast channel so a fresh adapter can be
//! bound with [`ShellSession::bind`] without respawning the shell.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::bootstrap::{template, Provisioner};
use crate::engine::{ProcessController, ProcessHandle, SpawnSpec};
use crate::errors::{ShellboxError, ShellboxResult};
use crate::runtime::SandboxRuntime;
use crate::terminal::{ProcessBinding, TerminalAdapter};

const OUTPUT_FANOUT_CAPACITY: usize = 256;

// ============================================================================
// CONFIG
// ============================================================================

/// Shell program and rc-file settings.
///
/// The program must accept bash-style `--rcfile <path> -i` arguments; the rc
/// file is written to the sandbox home directory before the first spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub program: String,
    /// Rc file name, created under the sandbox home directory.
    pub rc_file: String,
    /// Extra arguments appended after the standard interactive flags.
    pub extra_args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
            rc_file: ".shellrc".to_string(),
            extra_args: Vec::new(),
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

struct LiveShell {
    input: mpsc::Sender<Vec<u8>>,
    controller: ProcessController,
    output_tx: broadcast::Sender<Vec<u8>>,
    exit: Option<oneshot::Receiver<i32>>,
    relay_cancel: CancellationToken,
}

/// Manager for the sandbox's single interactive shell.
pub struct ShellSession {
    runtime: Arc<SandboxRuntime>,
    provisioner: Arc<Provisioner>,
    config: ShellConfig,
    live: tokio::sync::Mutex<Option<LiveShell>>,
}

impl ShellSession {
    pub fn new(
        runtime: Arc<SandboxRuntime>,
        provisioner: Arc<Provisioner>,
        config: ShellConfig,
    ) -> Self {
        Self {
            runtime,
            provisioner,
            config,
            live: tokio::sync::Mutex::new(None),
        }
    }

    /// Start the shell if every precondition holds, or silently do nothing.
    ///
    /// Returns `Ok(true)` when this call spawned the shell, `Ok(false)` when
    /// it no-opped (precondition missing, or a shell is already live). The
    /// precondition check and the spawn happen under one lock, so concurrent
    /// callers produce exactly one shell process.
    pub async fn start(&self, adapter: &TerminalAdapter) -> ShellboxResult<bool> {
        let mut live = self.live.lock().await;

        if let Some(shell) = live.as_ref() {
            // Shell already running; a ready, unbound adapter means the
            // widget remounted, so rebind instead of respawning.
            if adapter.is_ready() && !adapter.is_connected() {
                Self::bind_live(shell, adapter)?;
            }
            return Ok(false);
        }

        if !self.runtime.status().is_ready() {
            tracing::debug!("shell start skipped: runtime not ready");
            return Ok(false);
        }
        if !self.provisioner.setup_complete() {
            tracing::debug!("shell start skipped: provisioning incomplete");
            return Ok(false);
        }
        if !adapter.is_ready() {
            tracing::debug!("shell start skipped: terminal not ready");
            return Ok(false);
        }

        let shell = self.spawn_shell(adapter).await?;
        Self::bind_live(&shell, adapter)?;
        *live = Some(shell);
        Ok(true)
    }

    /// Bind a freshly mounted terminal adapter to the live shell.
    ///
    /// Returns `Ok(false)` when there is no live shell or the adapter is not
    /// ready yet. Output produced while no adapter was bound is dropped.
    pub async fn bind(&self, adapter: &TerminalAdapter) -> ShellboxResult<bool> {
        let live = self.live.lock().await;
        let Some(shell) = live.as_ref() else {
            return Ok(false);
        };
        if !adapter.is_ready() {
            return Ok(false);
        }
        Self::bind_live(shell, adapter)?;
        Ok(true)
    }

    /// Forward new terminal geometry to the shell. No-op when no shell is
    /// running.
    pub async fn resize(&self, cols: u16, rows: u16) -> ShellboxResult<()> {
        let live = self.live.lock().await;
        match live.as_ref() {
            Some(shell) => shell.controller.resize(cols, rows),
            None => Ok(()),
        }
    }

    /// Write bytes to the shell's stdin.
    pub async fn write(&self, bytes: impl Into<Vec<u8>>) -> ShellboxResult<()> {
        let live = self.live.lock().await;
        let shell = live
            .as_ref()
            .ok_or_else(|| ShellboxError::InvalidState("no shell is running".into()))?;
        shell
            .input
            .send(bytes.into())
            .await
            .map_err(|_| ShellboxError::InvalidState("shell stdin is closed".into()))
    }

    pub async fn is_running(&self) -> bool {
        self.live.lock().await.is_some()
    }

    /// Wait for the shell to exit and return its exit code. The live slot is
    /// cleared once the shell is gone.
    pub async fn wait(&self) -> ShellboxResult<i32> {
        let exit = {
            let mut live = self.live.lock().await;
            let shell = live
                .as_mut()
                .ok_or_else(|| ShellboxError::InvalidState("no shell is running".into()))?;
            shell.exit.take().ok_or_else(|| {
                ShellboxError::InvalidState("shell exit already awaited".into())
            })?
        };
        let code = exit
            .await
            .map_err(|_| ShellboxError::Spawn("shell exited without a status".into()))?;
        self.clear().await;
        Ok(code)
    }

    /// Kill the shell if one is running. Idempotent.
    pub async fn shutdown(&self) {
        let mut live = self.live.lock().await;
        if let Some(shell) = live.take() {
            shell.controller.kill();
            shell.relay_cancel.cancel();
        }
    }

    async fn clear(&self) {
        let mut live = self.live.lock().await;
        if let Some(shell) = live.take() {
            shell.relay_cancel.cancel();
        }
    }

    async fn spawn_shell(&self, adapter: &TerminalAdapter) -> ShellboxResult<LiveShell> {
        let home = self.runtime.home_dir();
        let rc_path = format!("{home}/{}", self.config.rc_file);

        // The rc file lives one level above the workspace, which resolves to
        // the sandbox home directory.
        self.runtime
            .write_file(
                &format!("../{}", self.config.rc_file),
                template::SHELL_RC.as_bytes(),
            )
            .await?;

        let (cols, rows) = adapter.geometry();
        let mut args = vec!["--rcfile".to_string(), rc_path, "-i".to_string()];
        args.extend(self.config.extra_args.iter().cloned());

        let spec = SpawnSpec::new(&self.config.program)
            .args(args)
            .env("HOME", &home)
            .tty(true)
            .geometry(cols, rows);
        tracing::info!(command = %spec.display_line(), cols, rows, "starting shell");

        let mut handle: ProcessHandle = self.runtime.spawn(spec).await?;
        let mut output = handle.take_output().ok_or_else(|| {
            ShellboxError::Spawn("shell output stream unavailable".into())
        })?;

        let (output_tx, _) = broadcast::channel(OUTPUT_FANOUT_CAPACITY);
        let relay_cancel = CancellationToken::new();
        let relay_tx = output_tx.clone();
        let cancel = relay_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    chunk = output.recv() => match chunk {
                        // No receiver bound is fine; those bytes are dropped.
                        Some(bytes) => {
                            let _ = relay_tx.send(bytes);
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(LiveShell {
            input: handle.input(),
            controller: handle.controller(),
            output_tx,
            exit: handle.take_exit(),
            relay_cancel,
        })
    }

    fn bind_live(shell: &LiveShell, adapter: &TerminalAdapter) -> ShellboxResult<()> {
        adapter.connect_process(ProcessBinding {
            output: shell.output_tx.subscribe(),
            input: shell.input.clone(),
            controller: shell.controller.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapConfig;
    use crate::engine::mock::MockEngine;
    use crate::terminal::MemorySurface;

    async fn provisioned(engine: Arc<MockEngine>) -> (Arc<SandboxRuntime>, Arc<Provisioner>) {
        let runtime = Arc::new(SandboxRuntime::new(engine));
        runtime.boot().await.unwrap();
        let provisioner = Arc::new(Provisioner::new(
            Arc::clone(&runtime),
            BootstrapConfig::default(),
        ));
        provisioner.run().await.unwrap();
        (runtime, provisioner)
    }

    fn ready_adapter(cols: u16, rows: u16) -> (Arc<MemorySurface>, TerminalAdapter) {
        let surface = MemorySurface::new(cols, rows);
        let adapter = TerminalAdapter::new(Arc::clone(&surface));
        adapter.open().unwrap();
        (surface, adapter)
    }

    #[tokio::test]
    async fn start_before_provisioning_is_a_noop() {
        let engine = Arc::new(MockEngine::new());
        let runtime = Arc::new(SandboxRuntime::new(engine.clone()));
        runtime.boot().await.unwrap();
        let provisioner = Arc::new(Provisioner::new(
            Arc::clone(&runtime),
            BootstrapConfig::default(),
        ));
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        let (_surface, adapter) = ready_adapter(80, 24);
        assert!(!session.start(&adapter).await.unwrap());
        assert_eq!(engine.spawn_count("bash"), 0);
    }

    #[tokio::test]
    async fn start_before_terminal_ready_is_a_noop() {
        let engine = Arc::new(MockEngine::new());
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        let adapter = TerminalAdapter::new(MemorySurface::new(80, 24));
        assert!(!session.start(&adapter).await.unwrap());
        assert_eq!(engine.spawn_count("bash"), 0);
    }

    #[tokio::test]
    async fn start_spawns_shell_with_rcfile_and_home() {
        let engine = Arc::new(MockEngine::new());
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        let (_surface, adapter) = ready_adapter(132, 43);
        assert!(session.start(&adapter).await.unwrap());

        let specs: Vec<_> = engine
            .spawned_specs()
            .into_iter()
            .filter(|s| s.program == "bash")
            .collect();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(
            spec.args,
            vec!["--rcfile", "/sandbox/.shellrc", "-i"]
        );
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "HOME" && v == "/sandbox"));
        assert!(spec.tty);
        assert_eq!((spec.cols, spec.rows), (132, 43));

        // The rc file landed in the home directory, outside the workspace.
        let rc = engine.read_file("../.shellrc").unwrap();
        assert!(String::from_utf8(rc).unwrap().contains("DISABLE_TELEMETRY=1"));
    }

    #[tokio::test]
    async fn second_start_does_not_respawn() {
        let engine = Arc::new(MockEngine::new());
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        let (_surface, adapter) = ready_adapter(80, 24);
        assert!(session.start(&adapter).await.unwrap());
        assert!(!session.start(&adapter).await.unwrap());
        assert_eq!(engine.spawn_count("bash"), 1);
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_one_shell() {
        let engine = Arc::new(MockEngine::new());
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = Arc::new(ShellSession::new(
            runtime,
            provisioner,
            ShellConfig::default(),
        ));

        let (_sa, adapter_a) = ready_adapter(80, 24);
        let (_sb, adapter_b) = ready_adapter(80, 24);
        let (a, b) = tokio::join!(session.start(&adapter_a), session.start(&adapter_b));
        assert_ne!(a.unwrap(), b.unwrap());
        assert_eq!(engine.spawn_count("bash"), 1);
    }

    #[tokio::test]
    async fn resize_before_shell_is_a_noop() {
        let engine = Arc::new(MockEngine::new());
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        session.resize(100, 30).await.unwrap();
        assert!(engine.resizes().is_empty());
    }

    #[tokio::test]
    async fn resize_after_start_reaches_the_process() {
        let engine = Arc::new(MockEngine::new());
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        let (_surface, adapter) = ready_adapter(80, 24);
        session.start(&adapter).await.unwrap();
        session.resize(200, 50).await.unwrap();
        assert!(engine.resizes().contains(&(200, 50)));
    }

    #[tokio::test]
    async fn write_reaches_shell_stdin() {
        let engine = Arc::new(MockEngine::new());
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        let (_surface, adapter) = ready_adapter(80, 24);
        assert!(session.start(&adapter).await.unwrap());
        session.write(b"ls\n".to_vec()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(engine.stdin_bytes("bash"), b"ls\n");
    }

    #[tokio::test]
    async fn widget_input_reaches_shell_stdin() {
        let engine = Arc::new(MockEngine::new());
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        let (surface, adapter) = ready_adapter(80, 24);
        assert!(session.start(&adapter).await.unwrap());
        surface.push_input(b"echo hi\r".to_vec()).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(engine.stdin_bytes("bash"), b"echo hi\r");
    }

    #[tokio::test]
    async fn remount_rebinds_without_respawning() {
        let engine = Arc::new(MockEngine::new());
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        let (_surface, adapter) = ready_adapter(80, 24);
        session.start(&adapter).await.unwrap();
        adapter.dispose();

        let (_surface2, adapter2) = ready_adapter(100, 30);
        assert!(session.bind(&adapter2).await.unwrap());
        assert_eq!(engine.spawn_count("bash"), 1);
    }

    #[tokio::test]
    async fn wait_returns_exit_code_and_clears_session() {
        let engine = Arc::new(MockEngine::new().with_exit_code("bash", 7));
        let (runtime, provisioner) = provisioned(engine.clone()).await;
        let session = ShellSession::new(runtime, provisioner, ShellConfig::default());

        let (_surface, adapter) = ready_adapter(80, 24);
        session.start(&adapter).await.unwrap();
        assert_eq!(session.wait().await.unwrap(), 7);
        assert!(!session.is_running().await);
    }
}
