use assert_cmd::Command;
use predicates::prelude::*;
use rstest::rstest;

fn shellbox() -> Command {
    Command::new(env!("CARGO_BIN_EXE_shellbox"))
}

#[test]
fn help_lists_subcommands() {
    shellbox()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run").and(predicate::str::contains("chat")));
}

#[test]
fn version_flag_works() {
    shellbox()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shellbox"));
}

#[test]
fn chat_requires_a_message() {
    shellbox()
        .arg("chat")
        .assert()
        .failure()
        .stderr(predicate::str::contains("MESSAGE"));
}

#[rstest]
#[case::unknown_subcommand(&["frobnicate"])]
#[case::unknown_flag(&["run", "--frobnicate"])]
#[case::completion_bad_shell(&["completion", "powershell"])]
fn bad_arguments_are_rejected(#[case] args: &[&str]) {
    shellbox().args(args).assert().failure();
}

#[test]
fn run_with_missing_config_file_fails_cleanly() {
    shellbox()
        .args(["--config", "/nonexistent/shellbox.json", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reading config"));
}
