//! Bootstrap sequencer - one-time environment provisioning.
//!
//! The sequence is an explicit state machine:
//!
//! ```text
//! MOUNT -> REORGANIZE -> INSTALL -> VERIFY -> READY
//!                                      |
//!                               FAILED(stage)   (absorbing)
//! ```
//!
//! 1. Mount      - load the fixed template tree at the workspace root
//! 2. Reorganize - create the stable global directory and relocate the
//!                 manifest, lock file, and wrapper script into it
//! 3. Install    - run the package installer against the global directory
//! 4. Verify     - run the installed CLI with `--version`; non-fatal
//!
//! `run()` may be invoked on every trigger: while a run is in flight, or once
//! setup is complete, it is a pure no-op. A recorded failure is returned
//! again without re-running any step. Every step runs under a per-step
//! deadline.

pub mod template;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::SpawnSpec;
use crate::errors::{ShellboxError, ShellboxResult};
use crate::runtime::SandboxRuntime;

// ============================================================================
// STAGES
// ============================================================================

/// Named step of the bootstrap sequence, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Mount,
    Reorganize,
    Install,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Mount => "mount",
            Stage::Reorganize => "reorganize",
            Stage::Install => "install",
            Stage::Verify => "verify",
        };
        write!(f, "{label}")
    }
}

/// Position of the sequencer's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Running(Stage),
    Ready,
    Failed(Stage),
}

// ============================================================================
// CONFIG
// ============================================================================

/// Tunables for the provisioning sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Stable directory the template files are relocated into, relative to
    /// the workspace.
    pub global_dir: String,
    /// Package installer program.
    pub installer: String,
    /// CLI binary name checked by the verify step.
    pub cli_binary: String,
    /// Per-step deadline in seconds.
    pub step_timeout_secs: u64,
    /// Whether to run the verify step at all.
    pub verify: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            global_dir: "../.global".to_string(),
            installer: "pnpm".to_string(),
            cli_binary: "claude".to_string(),
            step_timeout_secs: 120,
            verify: true,
        }
    }
}

impl BootstrapConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Snapshot of provisioning progress.
#[derive(Debug, Clone)]
pub struct BootstrapState {
    pub stage: SetupStage,
    /// Steps recorded complete, in execution order.
    pub completed: Vec<Stage>,
    pub last_failure: Option<String>,
}

impl BootstrapState {
    /// True once INSTALL has succeeded; VERIFY does not gate completion.
    pub fn setup_complete(&self) -> bool {
        self.completed.contains(&Stage::Install)
    }
}

struct FailureRecord {
    stage: Stage,
    message: String,
    timed_out: bool,
}

impl FailureRecord {
    fn to_error(&self, timeout_secs: u64) -> ShellboxError {
        if self.timed_out {
            ShellboxError::BootstrapTimeout {
                stage: self.stage,
                seconds: timeout_secs,
            }
        } else {
            ShellboxError::Bootstrap {
                stage: self.stage,
                message: self.message.clone(),
            }
        }
    }
}

struct Inner {
    stage: SetupStage,
    completed: Vec<Stage>,
    failure: Option<FailureRecord>,
}

// ============================================================================
// PROVISIONER
// ============================================================================

/// Idempotent, resumable-safe bootstrap sequencer for one runtime instance.
pub struct Provisioner {
    runtime: Arc<SandboxRuntime>,
    config: BootstrapConfig,
    inner: Mutex<Inner>,
    in_flight: AtomicBool,
}

impl Provisioner {
    pub fn new(runtime: Arc<SandboxRuntime>, config: BootstrapConfig) -> Self {
        Self {
            runtime,
            config,
            inner: Mutex::new(Inner {
                stage: SetupStage::Running(Stage::Mount),
                completed: Vec::new(),
                failure: None,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> BootstrapState {
        let inner = self.inner.lock();
        BootstrapState {
            stage: inner.stage,
            completed: inner.completed.clone(),
            last_failure: inner.failure.as_ref().map(|f| f.message.clone()),
        }
    }

    pub fn setup_complete(&self) -> bool {
        self.state().setup_complete()
    }

    /// Run the provisioning sequence.
    ///
    /// Safe to call on every trigger: a no-op while the runtime is not ready
    /// yet, while a run is in flight, and once the sequence finished. A
    /// recorded failure is returned without re-running anything.
    pub async fn run(&self) -> ShellboxResult<()> {
        {
            let inner = self.inner.lock();
            match inner.stage {
                SetupStage::Ready => return Ok(()),
                SetupStage::Failed(_) => {
                    let record = inner
                        .failure
                        .as_ref()
                        .map(|f| f.to_error(self.config.step_timeout_secs));
                    return Err(record.unwrap_or_else(|| ShellboxError::InvalidState(
                        "bootstrap failed without a recorded failure".into(),
                    )));
                }
                SetupStage::Running(_) => {}
            }
        }
        if !self.runtime.status().is_ready() {
            tracing::debug!(status = %self.runtime.status(), "bootstrap trigger before runtime ready; skipping");
            return Ok(());
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.run_steps().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_steps(&self) -> ShellboxResult<()> {
        self.step(Stage::Mount, self.mount_step()).await?;
        self.step(Stage::Reorganize, self.reorganize_step()).await?;
        self.step(Stage::Install, self.install_step()).await?;

        if self.config.verify {
            self.inner.lock().stage = SetupStage::Running(Stage::Verify);
            match tokio::time::timeout(self.config.step_timeout(), self.verify_step()).await {
                Ok(Ok(())) => tracing::debug!("cli verify succeeded"),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "cli verify failed; installer exit status remains authoritative")
                }
                Err(_) => tracing::warn!("cli verify timed out"),
            }
            self.inner.lock().completed.push(Stage::Verify);
        }

        self.inner.lock().stage = SetupStage::Ready;
        tracing::info!("environment provisioning complete");
        Ok(())
    }

    async fn step<F>(&self, stage: Stage, fut: F) -> ShellboxResult<()>
    where
        F: std::future::Future<Output = ShellboxResult<()>>,
    {
        self.inner.lock().stage = SetupStage::Running(stage);
        tracing::info!(stage = %stage, "bootstrap step starting");

        let deadline = self.config.step_timeout();
        let outcome = match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(ShellboxError::BootstrapTimeout {
                stage,
                seconds: deadline.as_secs(),
            }),
        };

        match outcome {
            Ok(()) => {
                self.inner.lock().completed.push(stage);
                tracing::info!(stage = %stage, "bootstrap step complete");
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.stage = SetupStage::Failed(stage);
                inner.failure = Some(FailureRecord {
                    stage,
                    message: e.to_string(),
                    timed_out: matches!(e, ShellboxError::BootstrapTimeout { .. }),
                });
                tracing::error!(stage = %stage, error = %e, "bootstrap step failed");
                Err(e)
            }
        }
    }

    async fn mount_step(&self) -> ShellboxResult<()> {
        self.runtime.mount(&template::global_template()).await
    }

    async fn reorganize_step(&self) -> ShellboxResult<()> {
        let global = &self.config.global_dir;
        self.run_checked(Stage::Reorganize, "mkdir", vec![
            "-p".to_string(),
            format!("{global}/src"),
        ])
        .await?;
        self.run_checked(Stage::Reorganize, "mv", vec![
            template::VCS_WRAPPER.to_string(),
            format!("{global}/src/{}", template::VCS_WRAPPER),
        ])
        .await?;
        self.run_checked(Stage::Reorganize, "mv", vec![
            template::MANIFEST.to_string(),
            format!("{global}/{}", template::MANIFEST),
        ])
        .await?;
        self.run_checked(Stage::Reorganize, "mv", vec![
            template::LOCKFILE.to_string(),
            format!("{global}/{}", template::LOCKFILE),
        ])
        .await
    }

    async fn install_step(&self) -> ShellboxResult<()> {
        let installer = self.config.installer.clone();
        let global = self.config.global_dir.clone();
        self.run_checked(
            Stage::Install,
            &installer,
            vec!["i".to_string(), "--prefix".to_string(), global],
        )
        .await
    }

    async fn verify_step(&self) -> ShellboxResult<()> {
        let bin_dir = format!("{}/node_modules/.bin", self.config.global_dir);
        let names = self.runtime.read_dir(&bin_dir).await?;
        if !names.iter().any(|n| n == &self.config.cli_binary) {
            return Err(ShellboxError::Bootstrap {
                stage: Stage::Verify,
                message: format!(
                    "installed bin directory has no `{}`",
                    self.config.cli_binary
                ),
            });
        }
        let program = format!("{bin_dir}/{}", self.config.cli_binary);
        let mut handle = self
            .runtime
            .spawn(SpawnSpec::new(program).args(["--version"]))
            .await?;
        let code = handle.wait().await?;
        if code != 0 {
            return Err(ShellboxError::Bootstrap {
                stage: Stage::Verify,
                message: format!("version query exited with status {code}"),
            });
        }
        Ok(())
    }

    /// Spawn a command and fail the stage on a non-zero exit status, naming
    /// the offending command.
    async fn run_checked(
        &self,
        stage: Stage,
        program: &str,
        args: Vec<String>,
    ) -> ShellboxResult<()> {
        let spec = SpawnSpec::new(program).args(args);
        let line = spec.display_line();
        let mut handle = self.runtime.spawn(spec).await?;
        let code = handle.wait().await?;
        if code != 0 {
            return Err(ShellboxError::Bootstrap {
                stage,
                message: format!("`{line}` exited with status {code}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    fn runtime_with(engine: Arc<MockEngine>) -> Arc<SandboxRuntime> {
        Arc::new(SandboxRuntime::new(engine))
    }

    #[tokio::test]
    async fn run_before_runtime_ready_is_noop() {
        let engine = Arc::new(MockEngine::new());
        let runtime = runtime_with(engine.clone());
        let provisioner = Provisioner::new(runtime, BootstrapConfig::default());

        provisioner.run().await.unwrap();
        assert!(engine.commands().is_empty());
        assert!(!provisioner.setup_complete());
    }

    #[tokio::test]
    async fn reorganize_names_the_offending_step() {
        // Break the second relocation by deleting its source after mount:
        // an mv of a missing file exits 1 in the mock.
        let engine = Arc::new(MockEngine::new().with_exit_code("mv", 1));
        let runtime = runtime_with(engine.clone());
        runtime.boot().await.unwrap();
        let provisioner = Provisioner::new(runtime, BootstrapConfig::default());

        let err = provisioner.run().await.unwrap_err();
        match err {
            ShellboxError::Bootstrap { stage, message } => {
                assert_eq!(stage, Stage::Reorganize);
                assert!(message.contains("mv"), "message: {message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            provisioner.state().stage,
            SetupStage::Failed(Stage::Reorganize)
        );
    }

    #[tokio::test]
    async fn failure_is_absorbing_and_never_reruns() {
        let engine = Arc::new(MockEngine::new().with_exit_code("pnpm", 1));
        let runtime = runtime_with(engine.clone());
        runtime.boot().await.unwrap();
        let provisioner = Provisioner::new(runtime, BootstrapConfig::default());

        provisioner.run().await.unwrap_err();
        let commands_after_first = engine.commands().len();

        let err = provisioner.run().await.unwrap_err();
        assert!(matches!(err, ShellboxError::Bootstrap { stage: Stage::Install, .. }));
        assert_eq!(engine.commands().len(), commands_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn step_deadline_times_out_and_pins_failed() {
        let engine = Arc::new(
            MockEngine::new().with_delay("pnpm", Duration::from_secs(10)),
        );
        let runtime = runtime_with(engine.clone());
        runtime.boot().await.unwrap();
        let config = BootstrapConfig {
            step_timeout_secs: 1,
            ..Default::default()
        };
        let provisioner = Provisioner::new(runtime, config);

        let err = provisioner.run().await.unwrap_err();
        assert!(matches!(
            err,
            ShellboxError::BootstrapTimeout { stage: Stage::Install, seconds: 1 }
        ));
        assert_eq!(provisioner.state().stage, SetupStage::Failed(Stage::Install));
        assert!(!provisioner.setup_complete());
    }

    #[tokio::test]
    async fn verify_failure_is_nonfatal() {
        // CLI exits non-zero on --version; install already succeeded.
        let engine = Arc::new(
            MockEngine::new().with_exit_code("../.global/node_modules/.bin/claude", 1),
        );
        let runtime = runtime_with(engine.clone());
        runtime.boot().await.unwrap();
        let provisioner = Provisioner::new(runtime, BootstrapConfig::default());

        provisioner.run().await.unwrap();
        assert!(provisioner.setup_complete());
        assert_eq!(provisioner.state().stage, SetupStage::Ready);
    }
}
