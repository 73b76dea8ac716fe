mod cli;
mod commands;
mod config;

use clap::{CommandFactory, Parser};
use cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging goes to stderr so it never interleaves with shell output.
    let filter = if cli.global.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        cli::Commands::Run(args) => commands::run::execute(args, &cli.global).await?,
        cli::Commands::Chat(args) => commands::chat::execute(args, &cli.global).await?,
        cli::Commands::Completion(args) => {
            let mut cmd = Cli::command();
            cli::generate_completion(&args.shell, &mut cmd, "shellbox", &mut std::io::stdout());
        }
    }

    Ok(())
}
