//! Terminal front end adapter.
//!
//! [`TerminalAdapter`] bridges a rendered terminal widget (a
//! [`TerminalSurface`]) and a process running inside the sandbox. The widget
//! lifecycle is shorter than and independent of the runtime's: an adapter is
//! created per widget mount, reports readiness exactly once, and is disposed
//! on unmount. The adapter never owns the shell process; it holds a binding
//! ([`ProcessBinding`]) that the shell session can hand to a fresh adapter
//! after a remount.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::engine::ProcessController;
use crate::errors::{ShellboxError, ShellboxResult};

// ============================================================================
// SURFACE
// ============================================================================

/// A rendered terminal widget: renders output bytes, produces user input and
/// geometry-change events.
#[async_trait]
pub trait TerminalSurface: Send + Sync {
    /// Render process output.
    async fn render(&self, bytes: &[u8]) -> ShellboxResult<()>;

    /// Current geometry as `(cols, rows)`.
    fn geometry(&self) -> (u16, u16);

    /// Take the user-input byte stream. Returns `None` after the first take.
    fn take_input(&self) -> Option<mpsc::Receiver<Vec<u8>>>;

    /// Take the geometry-change event stream. Returns `None` after the first
    /// take.
    fn take_resize_events(&self) -> Option<mpsc::Receiver<(u16, u16)>>;
}

// ============================================================================
// BINDING
// ============================================================================

/// Streams and control surface wiring a process to one adapter instance.
pub struct ProcessBinding {
    pub output: broadcast::Receiver<Vec<u8>>,
    pub input: mpsc::Sender<Vec<u8>>,
    pub controller: ProcessController,
}

// ============================================================================
// ADAPTER
// ============================================================================

/// Adapter between one widget mount and the sandboxed process.
pub struct TerminalAdapter {
    surface: Arc<dyn TerminalSurface>,
    ready: AtomicBool,
    connected: AtomicBool,
    disposed: AtomicBool,
    geometry: Arc<Mutex<(u16, u16)>>,
    cancel: CancellationToken,
}

impl TerminalAdapter {
    pub fn new<S: TerminalSurface + 'static>(surface: Arc<S>) -> Self {
        let surface: Arc<dyn TerminalSurface> = surface;
        Self {
            surface,
            ready: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            geometry: Arc::new(Mutex::new((80, 24))),
            cancel: CancellationToken::new(),
        }
    }

    /// Report widget readiness. Exactly once per adapter instance.
    pub fn open(&self) -> ShellboxResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ShellboxError::InvalidState(
                "open() on a disposed terminal adapter".into(),
            ));
        }
        if self.ready.swap(true, Ordering::SeqCst) {
            return Err(ShellboxError::InvalidState(
                "terminal readiness already reported".into(),
            ));
        }
        self.fit();
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.disposed.load(Ordering::SeqCst)
    }

    /// Recompute geometry from the surface's current dimensions.
    pub fn fit(&self) -> (u16, u16) {
        let geometry = self.surface.geometry();
        *self.geometry.lock() = geometry;
        geometry
    }

    pub fn geometry(&self) -> (u16, u16) {
        *self.geometry.lock()
    }

    /// Wire a process binding to the widget: output to the surface, surface
    /// input and resize events back to the process.
    ///
    /// Binding before readiness is a programming error, rejected with
    /// `InvalidState` - never silently queued. One binding per adapter
    /// instance; a remount gets a fresh adapter and a fresh binding.
    pub fn connect_process(&self, binding: ProcessBinding) -> ShellboxResult<()> {
        if !self.is_ready() {
            return Err(ShellboxError::InvalidState(
                "terminal adapter is not ready".into(),
            ));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(ShellboxError::InvalidState(
                "terminal adapter already bound to a process".into(),
            ));
        }

        let ProcessBinding {
            mut output,
            input,
            controller,
        } = binding;

        let surface = Arc::clone(&self.surface);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = output.recv() => match received {
                        Ok(bytes) => {
                            if surface.render(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        if let Some(mut input_rx) = self.surface.take_input() {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        chunk = input_rx.recv() => match chunk {
                            Some(bytes) => {
                                if input.send(bytes).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        } else {
            tracing::debug!("surface input stream already taken; skipping input pump");
        }

        if let Some(mut resize_rx) = self.surface.take_resize_events() {
            let cancel = self.cancel.clone();
            let geometry = Arc::clone(&self.geometry);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = resize_rx.recv() => match event {
                            Some((cols, rows)) => {
                                *geometry.lock() = (cols, rows);
                                if let Err(e) = controller.resize(cols, rows) {
                                    tracing::warn!(error = %e, "resize forwarding failed");
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        Ok(())
    }

    /// Release the widget binding. Idempotent; never panics on a second call.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether a process has been bound to this adapter instance.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TerminalAdapter {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// MEMORY SURFACE
// ============================================================================

const SURFACE_CHANNEL_CAPACITY: usize = 64;

/// In-memory surface for headless embedding and tests: captures rendered
/// bytes, lets the owner inject input and resize events.
pub struct MemorySurface {
    rendered: Mutex<Vec<u8>>,
    geometry: Mutex<(u16, u16)>,
    input_tx: mpsc::Sender<Vec<u8>>,
    input_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    resize_rx: Mutex<Option<mpsc::Receiver<(u16, u16)>>>,
}

impl MemorySurface {
    pub fn new(cols: u16, rows: u16) -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::channel(SURFACE_CHANNEL_CAPACITY);
        let (resize_tx, resize_rx) = mpsc::channel(SURFACE_CHANNEL_CAPACITY);
        Arc::new(Self {
            rendered: Mutex::new(Vec::new()),
            geometry: Mutex::new((cols, rows)),
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            resize_tx,
            resize_rx: Mutex::new(Some(resize_rx)),
        })
    }

    /// Bytes rendered so far.
    pub fn rendered(&self) -> Vec<u8> {
        self.rendered.lock().clone()
    }

    /// Inject user keystrokes.
    pub async fn push_input(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.input_tx.send(bytes.into()).await;
    }

    /// Change the widget dimensions and emit a resize event.
    pub async fn push_resize(&self, cols: u16, rows: u16) {
        *self.geometry.lock() = (cols, rows);
        let _ = self.resize_tx.send((cols, rows)).await;
    }
}

#[async_trait]
impl TerminalSurface for MemorySurface {
    async fn render(&self, bytes: &[u8]) -> ShellboxResult<()> {
        self.rendered.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn geometry(&self) -> (u16, u16) {
        *self.geometry.lock()
    }

    fn take_input(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.input_rx.lock().take()
    }

    fn take_resize_events(&self) -> Option<mpsc::Receiver<(u16, u16)>> {
        self.resize_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readiness_is_reported_exactly_once() {
        let adapter = TerminalAdapter::new(MemorySurface::new(120, 40));
        assert!(!adapter.is_ready());
        adapter.open().unwrap();
        assert!(adapter.is_ready());
        assert_eq!(adapter.geometry(), (120, 40));

        let err = adapter.open().unwrap_err();
        assert!(matches!(err, ShellboxError::InvalidState(_)));
    }

    #[tokio::test]
    async fn connect_before_ready_is_rejected() {
        let adapter = TerminalAdapter::new(MemorySurface::new(80, 24));
        let (tx, _rx) = broadcast::channel(8);
        let (input, _input_rx) = mpsc::channel(8);
        let binding = ProcessBinding {
            output: tx.subscribe(),
            input,
            controller: noop_controller(),
        };
        let err = adapter.connect_process(binding).unwrap_err();
        assert!(matches!(err, ShellboxError::InvalidState(_)));
    }

    #[tokio::test]
    async fn dispose_twice_is_a_noop() {
        let adapter = TerminalAdapter::new(MemorySurface::new(80, 24));
        adapter.open().unwrap();
        adapter.dispose();
        adapter.dispose();
        assert!(adapter.is_disposed());
        assert!(!adapter.is_ready());
    }

    #[tokio::test]
    async fn output_reaches_the_surface() {
        let surface = MemorySurface::new(80, 24);
        let adapter = TerminalAdapter::new(Arc::clone(&surface));
        adapter.open().unwrap();

        let (tx, _keep) = broadcast::channel(8);
        let (input, _input_rx) = mpsc::channel(8);
        adapter
            .connect_process(ProcessBinding {
                output: tx.subscribe(),
                input,
                controller: noop_controller(),
            })
            .unwrap();

        tx.send(b"hello\r\n".to_vec()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(surface.rendered(), b"hello\r\n");
    }

    fn noop_controller() -> ProcessController {
        struct Noop;
        impl crate::engine::ProcessControl for Noop {
            fn resize(&self, _cols: u16, _rows: u16) -> ShellboxResult<()> {
                Ok(())
            }
            fn kill(&self) {}
        }
        ProcessController::new(Arc::new(Noop))
    }
}
