//! Scripted in-memory engine for tests.
//!
//! Interprets the small command vocabulary the bootstrap sequence and shell
//! session actually use (`mkdir -p`, `mv`, the package installer, the shell)
//! against an in-memory filesystem, records every spawn in order, and lets
//! tests inject exit codes, delays, and boot/mount failures.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::{Engine, FileTree, ProcessControl, ProcessHandle, SpawnSpec, resolve_sandbox_path};
use crate::errors::{ShellboxError, ShellboxResult};

/// Binaries the simulated installer places under `node_modules/.bin`.
const INSTALLED_BINS: &[&str] = &["claude", "isogit", "tsx"];

#[derive(Default)]
struct MockState {
    booted: bool,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    commands: Vec<SpawnSpec>,
}

/// In-memory engine with scripted process behavior.
#[derive(Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
    exit_codes: Mutex<HashMap<String, i32>>,
    delays: Mutex<HashMap<String, Duration>>,
    outputs: Mutex<HashMap<String, Vec<u8>>>,
    boot_error: Mutex<Option<String>>,
    mount_error: Mutex<Option<String>>,
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    stdin_bytes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `program` to exit with `code` instead of its scripted behavior.
    pub fn with_exit_code(self, program: &str, code: i32) -> Self {
        self.exit_codes.lock().insert(program.to_string(), code);
        self
    }

    /// Delay `program`'s exit by `delay` (the exit code still applies).
    pub fn with_delay(self, program: &str, delay: Duration) -> Self {
        self.delays.lock().insert(program.to_string(), delay);
        self
    }

    /// Emit `bytes` on the output stream of every `program` spawn.
    pub fn with_output(self, program: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.outputs.lock().insert(program.to_string(), bytes.into());
        self
    }

    /// Make `boot()` fail with the given message.
    pub fn with_boot_error(self, message: &str) -> Self {
        *self.boot_error.lock() = Some(message.to_string());
        self
    }

    /// Make `mount()` fail with the given message.
    pub fn with_mount_error(self, message: &str) -> Self {
        *self.mount_error.lock() = Some(message.to_string());
        self
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Every spawned command, in order, as display lines.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .map(SpawnSpec::display_line)
            .collect()
    }

    /// Every spawned spec, in order.
    pub fn spawned_specs(&self) -> Vec<SpawnSpec> {
        self.state.lock().commands.clone()
    }

    /// Number of spawns whose program matches `program`.
    pub fn spawn_count(&self, program: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|spec| spec.program == program)
            .count()
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.state.lock().files.contains_key(&join(path))
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(&join(path)).cloned()
    }

    /// All resize calls that reached any spawned process.
    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().clone()
    }

    /// Everything written to the stdin of `program` spawns, concatenated.
    pub fn stdin_bytes(&self, program: &str) -> Vec<u8> {
        self.stdin_bytes
            .lock()
            .get(program)
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Command interpretation
    // ------------------------------------------------------------------

    fn interpret(&self, spec: &SpawnSpec, output: &mut Vec<u8>) -> i32 {
        if let Some(code) = self.exit_codes.lock().get(&spec.program) {
            return *code;
        }
        match spec.program.as_str() {
            "mkdir" => {
                let mut state = self.state.lock();
                for arg in spec.args.iter().filter(|a| *a != "-p") {
                    state.dirs.insert(join(arg));
                }
                0
            }
            "mv" => {
                if spec.args.len() != 2 {
                    output.extend_from_slice(b"mv: missing operand\n");
                    return 1;
                }
                let (src, dst) = (join(&spec.args[0]), join(&spec.args[1]));
                let mut state = self.state.lock();
                match state.files.remove(&src) {
                    Some(contents) => {
                        state.files.insert(dst, contents);
                        0
                    }
                    None => {
                        output.extend_from_slice(
                            format!("mv: cannot stat '{}': No such file\n", spec.args[0]).as_bytes(),
                        );
                        1
                    }
                }
            }
            "pnpm" | "npm" => {
                let prefix = spec
                    .args
                    .iter()
                    .position(|a| a == "--prefix")
                    .and_then(|i| spec.args.get(i + 1))
                    .map(String::as_str)
                    .unwrap_or(".");
                let bin_dir = join(&format!("{prefix}/node_modules/.bin"));
                let mut state = self.state.lock();
                state.dirs.insert(bin_dir.clone());
                for bin in INSTALLED_BINS {
                    state.files.insert(format!("{bin_dir}/{bin}"), Vec::new());
                }
                0
            }
            _ => 0,
        }
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn boot(&self) -> ShellboxResult<()> {
        if let Some(message) = self.boot_error.lock().clone() {
            return Err(ShellboxError::Boot(message));
        }
        self.state.lock().booted = true;
        Ok(())
    }

    async fn mount(&self, tree: &FileTree) -> ShellboxResult<()> {
        if let Some(message) = self.mount_error.lock().clone() {
            return Err(ShellboxError::Mount(message));
        }
        let mut state = self.state.lock();
        for (path, contents) in tree.walk() {
            state.files.insert(join(&path), contents);
        }
        Ok(())
    }

    async fn spawn(&self, spec: SpawnSpec) -> ShellboxResult<ProcessHandle> {
        let mut scripted = Vec::new();
        let code = self.interpret(&spec, &mut scripted);
        if let Some(extra) = self.outputs.lock().get(&spec.program) {
            scripted.extend_from_slice(extra);
        }
        self.state.lock().commands.push(spec.clone());

        let (in_tx, mut in_rx) = mpsc::channel::<Vec<u8>>(16);
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(16);
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();

        // Record stdin writes; the receiver stays alive for the spawn's
        // lifetime so writers never see a closed channel.
        let stdin_sink = Arc::clone(&self.stdin_bytes);
        let program = spec.program.clone();
        tokio::spawn(async move {
            while let Some(bytes) = in_rx.recv().await {
                stdin_sink.lock().entry(program.clone()).or_default().extend(bytes);
            }
        });

        if !scripted.is_empty() {
            let _ = out_tx.try_send(scripted);
        }

        match self.delays.lock().get(&spec.program).copied() {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = exit_tx.send(code);
                    drop(out_tx);
                });
            }
            None => {
                let _ = exit_tx.send(code);
            }
        }

        let control = Arc::new(MockControl {
            resizes: Arc::clone(&self.resizes),
        });
        Ok(ProcessHandle::new(in_tx, out_rx, exit_rx, control))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> ShellboxResult<()> {
        self.state.lock().files.insert(join(path), contents.to_vec());
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> ShellboxResult<Vec<String>> {
        let prefix = join(path);
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        let state = self.state.lock();
        let mut names = BTreeSet::new();
        for key in state.files.keys().chain(state.dirs.iter()) {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some(first) = rest.split('/').next() {
                    if !first.is_empty() {
                        names.insert(first.to_string());
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn home_dir(&self) -> String {
        "/sandbox".to_string()
    }

    async fn shutdown(&self) -> ShellboxResult<()> {
        Ok(())
    }
}

struct MockControl {
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
}

impl ProcessControl for MockControl {
    fn resize(&self, cols: u16, rows: u16) -> ShellboxResult<()> {
        self.resizes.lock().push((cols, rows));
        Ok(())
    }

    fn kill(&self) {}
}

fn join(path: &str) -> String {
    resolve_sandbox_path(path).join("/")
}
