//! Execution engine boundary.
//!
//! [`Engine`] is the seam between the runtime handle and whatever actually
//! hosts the sandbox: [`HostEngine`] runs real processes rooted in an owned
//! work directory, [`MockEngine`] interprets a scripted command set against an
//! in-memory filesystem for tests. The runtime never talks to an engine while
//! it is not booted; engines may assume `boot()` completed before any other
//! call.

pub mod host;
pub mod mock;

pub use host::HostEngine;
pub use mock::MockEngine;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::errors::{ShellboxError, ShellboxResult};

/// Directory names inside the sandbox root.
pub mod dirs {
    /// Project workspace; the mount target and default working directory.
    pub const WORKSPACE: &str = "workspace";
}

// ============================================================================
// FILE TREE
// ============================================================================

/// A node in a mountable file tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    File(Vec<u8>),
    Dir(FileTree),
}

/// Fixed file-system tree mounted into the sandbox workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    entries: BTreeMap<String, FileNode>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file entry.
    pub fn file(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.entries
            .insert(name.into(), FileNode::File(contents.into()));
        self
    }

    /// Add a directory entry.
    pub fn dir(mut self, name: impl Into<String>, tree: FileTree) -> Self {
        self.entries.insert(name.into(), FileNode::Dir(tree));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten into `(relative path, contents)` pairs, directories first.
    pub fn walk(&self) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        self.walk_into("", &mut out);
        out
    }

    fn walk_into(&self, prefix: &str, out: &mut Vec<(String, Vec<u8>)>) {
        for (name, node) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            match node {
                FileNode::File(contents) => out.push((path, contents.clone())),
                FileNode::Dir(tree) => tree.walk_into(&path, out),
            }
        }
    }
}

// ============================================================================
// SPAWN SPEC
// ============================================================================

/// Description of a process to spawn inside the sandbox.
///
/// Builder-style, consumed by [`Engine::spawn`]:
///
/// ```
/// use shellbox::engine::SpawnSpec;
///
/// let spec = SpawnSpec::new("mv")
///     .args(["package.json", "../.global/package.json"])
///     .env("HOME", "/sandbox");
/// ```
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Working directory relative to the sandbox workspace; defaults to the
    /// workspace itself.
    pub cwd: Option<String>,
    /// Allocate a pseudo-terminal for the process.
    pub tty: bool,
    /// Initial terminal geometry, used only when `tty` is set.
    pub cols: u16,
    pub rows: u16,
}

impl SpawnSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            tty: false,
            cols: 80,
            rows: 24,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn geometry(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// One-line rendering for logs and spawn-order assertions.
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

// ============================================================================
// PROCESS HANDLE
// ============================================================================

/// Engine-side control surface for a spawned process.
pub trait ProcessControl: Send + Sync {
    /// Forward new terminal geometry to the process.
    fn resize(&self, cols: u16, rows: u16) -> ShellboxResult<()>;

    /// Terminate the process. Idempotent.
    fn kill(&self);
}

/// Cloneable handle to a process's control surface.
#[derive(Clone)]
pub struct ProcessController(Arc<dyn ProcessControl>);

impl ProcessController {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self(control)
    }

    pub fn resize(&self, cols: u16, rows: u16) -> ShellboxResult<()> {
        self.0.resize(cols, rows)
    }

    pub fn kill(&self) {
        self.0.kill()
    }
}

/// Handle to a process running inside the sandbox.
///
/// Output and exit are take-once: the terminal adapter takes the output
/// stream, the owner of the handle awaits the exit code. The control surface
/// (`resize`/`kill`) is cloneable via [`ProcessHandle::controller`].
pub struct ProcessHandle {
    stdin: mpsc::Sender<Vec<u8>>,
    output: Option<mpsc::Receiver<Vec<u8>>>,
    exit: Option<oneshot::Receiver<i32>>,
    control: ProcessController,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").finish_non_exhaustive()
    }
}

impl ProcessHandle {
    pub fn new(
        stdin: mpsc::Sender<Vec<u8>>,
        output: mpsc::Receiver<Vec<u8>>,
        exit: oneshot::Receiver<i32>,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            stdin,
            output: Some(output),
            exit: Some(exit),
            control: ProcessController::new(control),
        }
    }

    /// Sender feeding the process's stdin.
    pub fn input(&self) -> mpsc::Sender<Vec<u8>> {
        self.stdin.clone()
    }

    /// Take the combined output stream. Returns `None` after the first take.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.output.take()
    }

    /// Take the exit-code receiver. Returns `None` after the first take.
    pub fn take_exit(&mut self) -> Option<oneshot::Receiver<i32>> {
        self.exit.take()
    }

    pub fn controller(&self) -> ProcessController {
        self.control.clone()
    }

    pub fn resize(&self, cols: u16, rows: u16) -> ShellboxResult<()> {
        self.control.resize(cols, rows)
    }

    pub fn kill(&self) {
        self.control.kill()
    }

    /// Wait for the process to exit and return its exit code.
    pub async fn wait(&mut self) -> ShellboxResult<i32> {
        let rx = self.exit.take().ok_or_else(|| {
            ShellboxError::InvalidState("process exit already awaited".into())
        })?;
        rx.await
            .map_err(|_| ShellboxError::Engine("process exit channel closed".into()))
    }
}

// ============================================================================
// ENGINE TRAIT
// ============================================================================

/// The sandbox execution boundary.
///
/// All paths are sandbox paths resolved against the workspace directory;
/// `..` components may climb at most to the sandbox root.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Initialize the execution environment. Fails with
    /// [`ShellboxError::Boot`] when isolation preconditions are unmet.
    async fn boot(&self) -> ShellboxResult<()>;

    /// Mount a file tree at the workspace root. Idempotent per distinct tree.
    async fn mount(&self, tree: &FileTree) -> ShellboxResult<()>;

    /// Spawn a process inside the sandbox.
    async fn spawn(&self, spec: SpawnSpec) -> ShellboxResult<ProcessHandle>;

    /// Write a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, contents: &[u8]) -> ShellboxResult<()>;

    /// List entry names of a directory.
    async fn read_dir(&self, path: &str) -> ShellboxResult<Vec<String>>;

    /// The sandbox root as seen by processes (used for `HOME` bindings).
    fn home_dir(&self) -> String;

    /// Release the environment. Idempotent.
    async fn shutdown(&self) -> ShellboxResult<()>;
}

/// Resolve a sandbox path to root-relative components.
///
/// Relative paths start at the workspace; absolute paths start at the sandbox
/// root. `..` never escapes the root.
pub(crate) fn resolve_sandbox_path(path: &str) -> Vec<String> {
    let mut parts: Vec<String> = if path.starts_with('/') {
        Vec::new()
    } else {
        vec![dirs::WORKSPACE.to_string()]
    };
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name.to_string()),
        }
    }
    parts
}
