use std::sync::Arc;

use clap::Args;
use shellbox::chat::{AssistantClient, Conversation, MemoryStore};

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Message to send
    #[arg(index = 1)]
    pub message: String,

    /// Assistant base URL (overrides the config file)
    #[arg(long, env = "SHELLBOX_ASSISTANT_URL")]
    pub url: Option<String>,

    /// Session identifier; a fresh one is generated when unset
    #[arg(long)]
    pub session: Option<String>,
}

pub async fn execute(args: ChatArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let config = global.load_config()?;
    let base_url = args.url.unwrap_or(config.assistant_url);
    let session = args
        .session
        .unwrap_or_else(|| ulid::Ulid::new().to_string());

    let client = AssistantClient::new(base_url)?;
    let conversation = Conversation::new(client, Arc::new(MemoryStore::new()), session);

    let reply = conversation.send(&args.message).await?;
    println!("{reply}");
    Ok(())
}
