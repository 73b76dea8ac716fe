//! Assistant boundary: HTTP client and conversation turn driver.
//!
//! The assistant runs behind an HTTP endpoint; [`AssistantClient`] speaks its
//! wire format and [`Conversation`] drives one turn at a time against a
//! [`MessageStore`]. Turn failures are local: an error becomes an
//! assistant-role message in the history and never touches sandbox state.

pub mod store;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ShellboxError, ShellboxResult};

pub use store::{ChatMessage, MemoryStore, MessageId, MessageStore, Role};

const CHAT_ENDPOINT: &str = "/api/claude-chat";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    success: bool,
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

/// HTTP client for the assistant endpoint.
pub struct AssistantClient {
    base_url: String,
    http: reqwest::Client,
}

impl AssistantClient {
    pub fn new(base_url: impl Into<String>) -> ShellboxResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ShellboxError::RemoteCall(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Send one message and return the assistant's reply text.
    ///
    /// Non-2xx responses surface as `RemoteCall` with the status and body;
    /// a 2xx body with `success: false` surfaces its `error` field.
    pub async fn send(&self, message: &str) -> ShellboxResult<String> {
        let url = format!("{}{CHAT_ENDPOINT}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&ChatRequest { message })
            .send()
            .await
            .map_err(|e| ShellboxError::RemoteCall(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ShellboxError::RemoteCall(format!("reading body: {e}")))?;

        if !status.is_success() {
            return Err(ShellboxError::RemoteCall(format!(
                "assistant returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ShellboxError::RemoteCall(format!("malformed response: {e}")))?;
        if !parsed.success {
            return Err(ShellboxError::RemoteCall(
                parsed.error.unwrap_or_else(|| "assistant call failed".to_string()),
            ));
        }
        Ok(parsed.response)
    }
}

// ============================================================================
// CONVERSATION
// ============================================================================

/// Drives one chat turn at a time for a session.
pub struct Conversation {
    client: AssistantClient,
    store: Arc<dyn MessageStore>,
    session: String,
    loading: AtomicBool,
}

impl Conversation {
    pub fn new(
        client: AssistantClient,
        store: Arc<dyn MessageStore>,
        session: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            session: session.into(),
            loading: AtomicBool::new(false),
        }
    }

    /// True while a turn is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Run one turn: persist the user message, create an assistant
    /// placeholder, call the assistant, then complete the placeholder with
    /// the reply or with an assistant-role error message.
    ///
    /// Returns the reply text on success. The stored history reflects the
    /// outcome either way.
    pub async fn send(&self, message: &str) -> ShellboxResult<String> {
        if self.loading.swap(true, Ordering::SeqCst) {
            return Err(ShellboxError::InvalidState(
                "a chat turn is already in flight".into(),
            ));
        }
        let result = self.run_turn(message).await;
        self.loading.store(false, Ordering::SeqCst);
        result
    }

    async fn run_turn(&self, message: &str) -> ShellboxResult<String> {
        self.store
            .add_message(&self.session, Role::User, message, true)
            .await?;
        let placeholder = self
            .store
            .add_message(&self.session, Role::Assistant, "", false)
            .await?;

        match self.client.send(message).await {
            Ok(reply) => {
                self.store
                    .update_message(&placeholder, &reply, true)
                    .await?;
                Ok(reply)
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat turn failed");
                // The placeholder becomes the single assistant-role error
                // message for this turn.
                self.store
                    .update_message(&placeholder, &format!("Error: {e}"), true)
                    .await?;
                Err(e)
            }
        }
    }

    /// The stored history for this conversation's session.
    pub async fn history(&self) -> ShellboxResult<Vec<ChatMessage>> {
        self.store.messages(&self.session).await
    }
}
