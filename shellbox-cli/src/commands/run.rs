use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};

use clap::Args;
use nix::sys::termios::{
    tcgetattr, tcsetattr, InputFlags, LocalFlags, OutputFlags, SetArg, Termios,
};
use shellbox::bootstrap::Provisioner;
use shellbox::errors::ShellboxResult;
use shellbox::runtime::SandboxRuntime;
use shellbox::status::project;
use shellbox::terminal::{TerminalAdapter, TerminalSurface};
use shellbox::shell::ShellSession;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::cli::GlobalFlags;
use crate::config::AppConfig;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Shell program to run inside the sandbox (overrides the config file)
    #[arg(long)]
    pub shell: Option<String>,

    /// Skip the post-install verify step
    #[arg(long)]
    pub no_verify: bool,
}

/// Entry point
pub async fn execute(args: RunArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let mut runner = ShellRunner::new(args, global)?;
    runner.run().await
}

struct ShellRunner {
    runtime: Arc<SandboxRuntime>,
    config: AppConfig,
}

impl ShellRunner {
    fn new(args: RunArgs, global: &GlobalFlags) -> anyhow::Result<Self> {
        let mut config = global.load_config()?;
        if args.no_verify {
            config.bootstrap.verify = false;
        }
        if let Some(shell) = args.shell {
            config.shell.program = shell;
        }
        let runtime = global.create_runtime()?;

        Ok(Self { runtime, config })
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        self.status_line(false);
        self.runtime.boot().await?;

        let provisioner = Arc::new(Provisioner::new(
            Arc::clone(&self.runtime),
            self.config.bootstrap.clone(),
        ));
        self.status_line(provisioner.setup_complete());
        provisioner.run().await?;
        self.status_line(provisioner.setup_complete());

        let raw_guard = setup_raw_mode()?;

        let surface = HostSurface::new();
        let adapter = TerminalAdapter::new(surface);
        adapter.open()?;

        let session = ShellSession::new(
            Arc::clone(&self.runtime),
            provisioner,
            self.config.shell.clone(),
        );
        anyhow::ensure!(
            session.start(&adapter).await?,
            "shell did not start; sandbox is not ready"
        );

        let mut sig_term = signal(SignalKind::terminate())?;
        let code = tokio::select! {
            code = session.wait() => code?,
            _ = sig_term.recv() => {
                session.shutdown().await;
                128 + 15
            }
        };

        drop(raw_guard);
        self.runtime.dispose().await?;

        // Exit with the shell's exit code; negative means signal termination,
        // reported in the 128 + n shell convention.
        if code != 0 {
            let code = if code < 0 { 128 + code.abs() } else { code };
            std::process::exit(code);
        }

        Ok(())
    }

    fn status_line(&self, setup_complete: bool) {
        eprintln!("{}", project(self.runtime.status(), setup_complete));
    }
}

// ============================================================================
// HOST SURFACE
// ============================================================================

/// Terminal surface over the process's own controlling terminal: renders to
/// stdout, forwards stdin bytes, and turns SIGWINCH into resize events.
struct HostSurface {
    input_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    resize_rx: Mutex<Option<mpsc::Receiver<(u16, u16)>>>,
}

impl HostSurface {
    fn new() -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>(64);
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match tokio::io::AsyncReadExt::read(&mut stdin, &mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if input_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("stdin read error: {e}");
                        break;
                    }
                }
            }
        });

        let (resize_tx, resize_rx) = mpsc::channel::<(u16, u16)>(16);
        tokio::spawn(async move {
            let Ok(mut sig_winch) = signal(SignalKind::window_change()) else {
                return;
            };
            while sig_winch.recv().await.is_some() {
                if let Some((cols, rows)) = dimensions() {
                    if resize_tx.send((cols, rows)).await.is_err() {
                        break;
                    }
                }
            }
        });

        Arc::new(Self {
            input_rx: Mutex::new(Some(input_rx)),
            resize_rx: Mutex::new(Some(resize_rx)),
        })
    }
}

#[async_trait::async_trait]
impl TerminalSurface for HostSurface {
    async fn render(&self, bytes: &[u8]) -> ShellboxResult<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.flush()?;
        Ok(())
    }

    fn geometry(&self) -> (u16, u16) {
        dimensions().unwrap_or((80, 24))
    }

    fn take_input(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.input_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn take_resize_events(&self) -> Option<mpsc::Receiver<(u16, u16)>> {
        self.resize_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

fn dimensions() -> Option<(u16, u16)> {
    term_size::dimensions().map(|(w, h)| (w as u16, h as u16))
}

// ============================================================================
// RAW MODE
// ============================================================================

struct RawModeGuard {
    original_termios: Termios,
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let stdin = io::stdin();
        let _ = tcsetattr(&stdin, SetArg::TCSANOW, &self.original_termios);
    }
}

fn setup_raw_mode() -> anyhow::Result<Option<RawModeGuard>> {
    if !io::stdin().is_terminal() {
        return Ok(None);
    }
    match enable_raw_mode() {
        Ok(guard) => Ok(Some(guard)),
        Err(e) => {
            eprintln!("Warning: Failed to enable raw mode: {}", e);
            eprintln!("Continuing in cooked mode. Some features may not work correctly.");
            Ok(None)
        }
    }
}

fn enable_raw_mode() -> anyhow::Result<RawModeGuard> {
    let stdin = io::stdin();
    let original = tcgetattr(&stdin)?;
    let mut raw = original.clone();

    // Standard Raw Mode flags
    raw.input_flags &= !(InputFlags::IGNBRK
        | InputFlags::BRKINT
        | InputFlags::PARMRK
        | InputFlags::ISTRIP
        | InputFlags::INLCR
        | InputFlags::IGNCR
        | InputFlags::ICRNL
        | InputFlags::IXON);
    raw.output_flags &= !OutputFlags::OPOST;
    raw.local_flags &= !(LocalFlags::ECHO
        | LocalFlags::ECHONL
        | LocalFlags::ICANON
        | LocalFlags::ISIG
        | LocalFlags::IEXTEN);

    tcsetattr(&stdin, SetArg::TCSANOW, &raw)?;

    Ok(RawModeGuard {
        original_termios: original,
    })
}
