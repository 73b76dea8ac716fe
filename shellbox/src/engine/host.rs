//! Process-backed engine rooted in an owned work directory.
//!
//! Every sandbox path maps onto a directory tree under `root`; tty spawns go
//! through a pseudo-terminal, plain spawns through piped stdio. Blocking pty
//! I/O runs on dedicated threads bridged to tokio channels.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{Engine, FileTree, ProcessControl, ProcessHandle, SpawnSpec, dirs, resolve_sandbox_path};
use crate::errors::{ShellboxError, ShellboxResult};

const IO_BUF_SIZE: usize = 8192;
const CHANNEL_CAPACITY: usize = 64;

/// Engine hosting the sandbox as real processes under an owned root directory.
pub struct HostEngine {
    root: PathBuf,
    // Keeps the scratch directory alive when the caller did not pick one.
    // Removed on shutdown(), not just on drop, since the CLI may exit the
    // process before destructors run.
    owned_root: Mutex<Option<tempfile::TempDir>>,
    booted: AtomicBool,
    shutdown: CancellationToken,
}

impl HostEngine {
    /// Create an engine rooted at `home`, or at a fresh scratch directory
    /// removed on drop when `home` is `None`.
    pub fn new(home: Option<PathBuf>) -> ShellboxResult<Self> {
        let (root, owned) = match home {
            Some(dir) => (dir, None),
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("shellbox-")
                    .tempdir()
                    .map_err(|e| ShellboxError::Boot(format!("failed to create sandbox root: {e}")))?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };
        Ok(Self {
            root,
            owned_root: Mutex::new(owned),
            booted: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for part in resolve_sandbox_path(path) {
            full.push(part);
        }
        full
    }

    fn resolve_cwd(&self, spec: &SpawnSpec) -> PathBuf {
        match &spec.cwd {
            Some(cwd) => self.resolve(cwd),
            None => self.root.join(dirs::WORKSPACE),
        }
    }

    fn spawn_pty(&self, spec: SpawnSpec) -> ShellboxResult<ProcessHandle> {
        let size = PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pty = native_pty_system();
        let pair = pty
            .openpty(size)
            .map_err(|e| ShellboxError::Spawn(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        cmd.cwd(self.resolve_cwd(&spec));
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ShellboxError::Spawn(format!("{}: {e}", spec.program)))?;
        drop(pair.slave);

        let killer = child.clone_killer();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ShellboxError::Spawn(format!("pty reader: {e}")))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| ShellboxError::Spawn(format!("pty writer: {e}")))?;

        let (in_tx, mut in_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();

        std::thread::spawn(move || {
            let mut buf = [0u8; IO_BUF_SIZE];
            loop {
                match std::io::Read::read(&mut reader, &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        std::thread::spawn(move || {
            while let Some(chunk) = in_rx.blocking_recv() {
                if std::io::Write::write_all(&mut writer, &chunk).is_err() {
                    break;
                }
                let _ = std::io::Write::flush(&mut writer);
            }
        });

        std::thread::spawn(move || {
            let code = child
                .wait()
                .map(|status| status.exit_code() as i32)
                .unwrap_or(-1);
            let _ = exit_tx.send(code);
        });

        let control = Arc::new(PtyControl {
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
        });
        Ok(ProcessHandle::new(in_tx, out_rx, exit_rx, control))
    }

    fn spawn_plain(&self, spec: SpawnSpec) -> ShellboxResult<ProcessHandle> {
        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(self.resolve_cwd(&spec))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ShellboxError::Spawn(format!("{}: {e}", spec.program)))?;

        let (in_tx, mut in_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        let cancel = self.shutdown.child_token();

        if let Some(mut stdout) = child.stdout.take() {
            let tx = out_tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; IO_BUF_SIZE];
                loop {
                    match stdout.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
        if let Some(mut stderr) = child.stderr.take() {
            let tx = out_tx;
            tokio::spawn(async move {
                let mut buf = [0u8; IO_BUF_SIZE];
                loop {
                    match stderr.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                while let Some(chunk) = in_rx.recv().await {
                    if stdin.write_all(&chunk).await.is_err() {
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            });
        }

        let wait_cancel = cancel.clone();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()).unwrap_or(-1),
                _ = wait_cancel.cancelled() => {
                    let _ = child.kill().await;
                    -9
                }
            };
            let _ = exit_tx.send(code);
        });

        let control = Arc::new(PlainControl { cancel });
        Ok(ProcessHandle::new(in_tx, out_rx, exit_rx, control))
    }
}

#[async_trait]
impl Engine for HostEngine {
    async fn boot(&self) -> ShellboxResult<()> {
        let workspace = self.root.join(dirs::WORKSPACE);
        tokio::fs::create_dir_all(&workspace).await.map_err(|e| {
            ShellboxError::Boot(format!(
                "cannot initialize sandbox root {}: {e}",
                self.root.display()
            ))
        })?;
        self.booted.store(true, Ordering::SeqCst);
        tracing::debug!(root = %self.root.display(), "host engine booted");
        Ok(())
    }

    async fn mount(&self, tree: &FileTree) -> ShellboxResult<()> {
        for (path, contents) in tree.walk() {
            let full = self.root.join(dirs::WORKSPACE).join(&path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ShellboxError::Mount(format!("{}: {e}", full.display())))?;
            }
            tokio::fs::write(&full, &contents)
                .await
                .map_err(|e| ShellboxError::Mount(format!("{}: {e}", full.display())))?;
        }
        Ok(())
    }

    async fn spawn(&self, spec: SpawnSpec) -> ShellboxResult<ProcessHandle> {
        if self.shutdown.is_cancelled() {
            return Err(ShellboxError::Disposed("engine has been shut down".into()));
        }
        tracing::debug!(command = %spec.display_line(), tty = spec.tty, "spawning process");
        if spec.tty {
            self.spawn_pty(spec)
        } else {
            self.spawn_plain(spec)
        }
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> ShellboxResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, contents).await?;
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> ShellboxResult<Vec<String>> {
        let full = self.resolve(path);
        let mut entries = tokio::fs::read_dir(&full).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn home_dir(&self) -> String {
        self.root.display().to_string()
    }

    async fn shutdown(&self) -> ShellboxResult<()> {
        self.shutdown.cancel();
        let owned = self.owned_root.lock().take();
        if let Some(tmp) = owned {
            if let Err(e) = tmp.close() {
                tracing::warn!(root = %self.root.display(), error = %e, "scratch root cleanup failed");
            }
        }
        Ok(())
    }
}

struct PtyControl {
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl ProcessControl for PtyControl {
    fn resize(&self, cols: u16, rows: u16) -> ShellboxResult<()> {
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ShellboxError::Engine(format!("pty resize: {e}")))
    }

    fn kill(&self) {
        let _ = self.killer.lock().kill();
    }
}

struct PlainControl {
    cancel: CancellationToken,
}

impl ProcessControl for PlainControl {
    // Resize is meaningful only for tty processes.
    fn resize(&self, _cols: u16, _rows: u16) -> ShellboxResult<()> {
        Ok(())
    }

    fn kill(&self) {
        self.cancel.cancel();
    }
}
