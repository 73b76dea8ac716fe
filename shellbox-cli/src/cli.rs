//! CLI definition and argument parsing for shellbox-cli.
//! Contains the main CLI structure, subcommands, and flag definitions.

use std::path::Path;
use std::sync::Arc;

use clap::{Args, Command, Parser, Subcommand, ValueEnum};
use clap_complete::shells::{Bash, Fish, Zsh};
use shellbox::engine::host::HostEngine;
use shellbox::runtime::SandboxRuntime;
use std::io::Write;

use crate::config::AppConfig;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "shellbox", author, version, about = "Shellbox CLI")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[non_exhaustive]
pub enum Commands {
    /// Boot a sandbox, provision it, and attach an interactive shell
    Run(crate::commands::run::RunArgs),

    /// Send one message to the assistant and print the reply
    Chat(crate::commands::chat::ChatArgs),

    /// Generate shell completion script (hidden from help)
    #[command(hide = true)]
    Completion(CompletionArgs),
}

/// Shell for which to generate completion script.
#[derive(ValueEnum, Clone, Debug)]
#[value(rename_all = "lower")]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
}

/// Arguments for the completion subcommand.
#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// Shell to generate completion for (bash, zsh, fish).
    pub shell: Shell,
}

/// Writes a completion script for the given shell to `out`.
pub fn generate_completion(shell: &Shell, cmd: &mut Command, name: &str, out: &mut dyn Write) {
    match shell {
        Shell::Bash => clap_complete::generate(Bash, cmd, name, out),
        Shell::Zsh => clap_complete::generate(Zsh, cmd, name, out),
        Shell::Fish => clap_complete::generate(Fish, cmd, name, out),
    }
}

// ============================================================================
// GLOBAL FLAGS
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Sandbox home directory (a temp directory is used when unset)
    #[arg(long, global = true, env = "SHELLBOX_HOME")]
    pub home: Option<std::path::PathBuf>,

    /// Configuration file path (optional)
    ///
    /// JSON file with bootstrap, shell, and assistant settings. When not
    /// provided, defaults are used.
    #[arg(long, global = true)]
    pub config: Option<String>,
}

impl GlobalFlags {
    /// Load the config file if one was given, defaults otherwise.
    pub fn load_config(&self) -> anyhow::Result<AppConfig> {
        match &self.config {
            Some(path) => crate::config::load_config(Path::new(path)),
            None => Ok(AppConfig::default()),
        }
    }

    /// Build a runtime over a host engine rooted at `--home`.
    pub fn create_runtime(&self) -> anyhow::Result<Arc<SandboxRuntime>> {
        let engine = Arc::new(HostEngine::new(self.home.clone())?);
        Ok(Arc::new(SandboxRuntime::new(engine)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_global_flags_in_any_position() {
        let cli = Cli::try_parse_from(["shellbox", "run", "--debug"]).unwrap();
        assert!(cli.global.debug);

        let cli = Cli::try_parse_from(["shellbox", "--home", "/tmp/sb", "run"]).unwrap();
        assert_eq!(
            cli.global.home.as_deref(),
            Some(std::path::Path::new("/tmp/sb"))
        );
    }
}
