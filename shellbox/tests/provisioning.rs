//! End-to-end scenarios over the scripted mock engine: boot, provision,
//! shell startup, and the failure paths in between.

use std::sync::Arc;
use std::time::Duration;

use shellbox::bootstrap::{BootstrapConfig, Provisioner, SetupStage, Stage};
use shellbox::engine::mock::MockEngine;
use shellbox::runtime::SandboxRuntime;
use shellbox::shell::{ShellConfig, ShellSession};
use shellbox::status::{project, UiPhase};
use shellbox::terminal::{MemorySurface, TerminalAdapter};
use shellbox::ShellboxError;

fn stack(engine: Arc<MockEngine>) -> (Arc<SandboxRuntime>, Arc<Provisioner>, ShellSession) {
    let runtime = Arc::new(SandboxRuntime::new(engine));
    let provisioner = Arc::new(Provisioner::new(
        Arc::clone(&runtime),
        BootstrapConfig::default(),
    ));
    let session = ShellSession::new(
        Arc::clone(&runtime),
        Arc::clone(&provisioner),
        ShellConfig::default(),
    );
    (runtime, provisioner, session)
}

fn ready_adapter(cols: u16, rows: u16) -> (Arc<MemorySurface>, TerminalAdapter) {
    let surface = MemorySurface::new(cols, rows);
    let adapter = TerminalAdapter::new(Arc::clone(&surface));
    adapter.open().unwrap();
    (surface, adapter)
}

fn position(commands: &[String], line: &str) -> usize {
    commands
        .iter()
        .position(|c| c == line)
        .unwrap_or_else(|| panic!("`{line}` not found in {commands:?}"))
}

#[tokio::test]
async fn fresh_boot_provisions_and_opens_a_shell() {
    let engine = Arc::new(MockEngine::new().with_output("bash", b"$ ".to_vec()));
    let (runtime, provisioner, session) = stack(engine.clone());

    assert_eq!(project(runtime.status(), false), UiPhase::Booting);
    runtime.boot().await.unwrap();
    assert_eq!(project(runtime.status(), false), UiPhase::Installing);

    provisioner.run().await.unwrap();
    assert!(provisioner.setup_complete());
    assert_eq!(provisioner.state().stage, SetupStage::Ready);
    assert_eq!(project(runtime.status(), true), UiPhase::Ready);

    // Nothing left behind at the original workspace paths; everything lives
    // under the relocated global directory.
    for name in ["git.ts", "package.json", "pnpm-lock.yaml"] {
        assert!(!engine.file_exists(name), "{name} still in workspace");
    }
    assert!(engine.file_exists("../.global/src/git.ts"));
    assert!(engine.file_exists("../.global/package.json"));
    assert!(engine.file_exists("../.global/pnpm-lock.yaml"));
    assert!(engine.file_exists("../.global/node_modules/.bin/claude"));

    // Strict step order: directory first, every relocation next, install
    // only after all of them.
    let commands = engine.commands();
    let mkdir = position(&commands, "mkdir -p ../.global/src");
    let install = position(&commands, "pnpm i --prefix ../.global");
    for line in [
        "mv git.ts ../.global/src/git.ts",
        "mv package.json ../.global/package.json",
        "mv pnpm-lock.yaml ../.global/pnpm-lock.yaml",
    ] {
        let moved = position(&commands, line);
        assert!(mkdir < moved && moved < install, "bad order: {commands:?}");
    }

    let (surface, adapter) = ready_adapter(120, 40);
    assert!(session.start(&adapter).await.unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(surface.rendered(), b"$ ");

    surface.push_resize(100, 30).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.resizes().contains(&(100, 30)));
}

#[tokio::test]
async fn installer_failure_pins_failed_and_blocks_the_shell() {
    let engine = Arc::new(MockEngine::new().with_exit_code("pnpm", 1));
    let (runtime, provisioner, session) = stack(engine.clone());
    runtime.boot().await.unwrap();

    let err = provisioner.run().await.unwrap_err();
    match err {
        ShellboxError::Bootstrap { stage, .. } => assert_eq!(stage, Stage::Install),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(provisioner.state().stage, SetupStage::Failed(Stage::Install));
    assert!(!provisioner.setup_complete());

    // A failed sequence never restarts, and the shell never spawns.
    let commands_before = engine.commands().len();
    provisioner.run().await.unwrap_err();
    assert_eq!(engine.commands().len(), commands_before);

    let (_surface, adapter) = ready_adapter(80, 24);
    assert!(!session.start(&adapter).await.unwrap());
    assert_eq!(engine.spawn_count("bash"), 0);
}

#[tokio::test]
async fn repeat_trigger_after_success_is_inert() {
    let engine = Arc::new(MockEngine::new());
    let (runtime, provisioner, _session) = stack(engine.clone());
    runtime.boot().await.unwrap();

    provisioner.run().await.unwrap();
    let commands_before = engine.commands().len();
    provisioner.run().await.unwrap();
    assert_eq!(engine.commands().len(), commands_before);
}

#[tokio::test]
async fn boot_failure_projects_error_and_skips_provisioning() {
    let engine = Arc::new(MockEngine::new().with_boot_error("no kvm"));
    let (runtime, provisioner, _session) = stack(engine.clone());

    runtime.boot().await.unwrap_err();
    assert_eq!(project(runtime.status(), false), UiPhase::Error);

    // Provisioning against an unready runtime is a silent no-op.
    provisioner.run().await.unwrap();
    assert!(engine.commands().is_empty());
    assert!(!provisioner.setup_complete());
}

#[tokio::test]
async fn widget_remount_keeps_the_same_shell() {
    let engine = Arc::new(MockEngine::new().with_delay("bash", Duration::from_secs(60)));
    let (runtime, provisioner, session) = stack(engine.clone());
    runtime.boot().await.unwrap();
    provisioner.run().await.unwrap();

    let (_surface, adapter) = ready_adapter(80, 24);
    assert!(session.start(&adapter).await.unwrap());
    adapter.dispose();

    // New widget, new adapter: start() detects the live shell and rebinds
    // instead of respawning.
    let (_surface2, adapter2) = ready_adapter(132, 43);
    assert!(!session.start(&adapter2).await.unwrap());
    assert!(adapter2.is_connected());
    assert_eq!(engine.spawn_count("bash"), 1);
}
