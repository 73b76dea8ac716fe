//! Message persistence boundary.
//!
//! The production deployment keeps chat history in an external document
//! store; [`MessageStore`] is the contract and [`MemoryStore`] the in-tree
//! implementation used by the conversation driver and the CLI.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{ShellboxError, ShellboxResult};

/// Opaque message identifier.
pub type MessageId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One stored chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub session: String,
    pub role: Role,
    pub content: String,
    /// False while an assistant reply is still pending.
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
}

/// Chat history contract.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message and return its id.
    async fn add_message(
        &self,
        session: &str,
        role: Role,
        content: &str,
        is_complete: bool,
    ) -> ShellboxResult<MessageId>;

    /// Replace a message's content and completion flag.
    async fn update_message(
        &self,
        id: &MessageId,
        content: &str,
        is_complete: bool,
    ) -> ShellboxResult<()>;

    /// Messages for a session, ordered by creation time.
    async fn messages(&self, session: &str) -> ShellboxResult<Vec<ChatMessage>>;
}

/// In-memory store, insertion-ordered per session.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    order: Vec<MessageId>,
    by_id: HashMap<MessageId, ChatMessage>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn add_message(
        &self,
        session: &str,
        role: Role,
        content: &str,
        is_complete: bool,
    ) -> ShellboxResult<MessageId> {
        let id = ulid::Ulid::new().to_string();
        let message = ChatMessage {
            id: id.clone(),
            session: session.to_string(),
            role,
            content: content.to_string(),
            is_complete,
            created_at: Utc::now(),
        };
        let mut inner = self.inner.lock();
        inner.order.push(id.clone());
        inner.by_id.insert(id.clone(), message);
        Ok(id)
    }

    async fn update_message(
        &self,
        id: &MessageId,
        content: &str,
        is_complete: bool,
    ) -> ShellboxResult<()> {
        let mut inner = self.inner.lock();
        let message = inner
            .by_id
            .get_mut(id)
            .ok_or_else(|| ShellboxError::Store(format!("unknown message id {id}")))?;
        message.content = content.to_string();
        message.is_complete = is_complete;
        Ok(())
    }

    async fn messages(&self, session: &str) -> ShellboxResult<Vec<ChatMessage>> {
        let inner = self.inner.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|m| m.session == session)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_come_back_in_insertion_order() {
        let store = MemoryStore::new();
        store.add_message("s1", Role::User, "first", true).await.unwrap();
        store
            .add_message("s1", Role::Assistant, "second", false)
            .await
            .unwrap();
        store.add_message("s2", Role::User, "other", true).await.unwrap();

        let messages = store.messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
        assert!(!messages[1].is_complete);
    }

    #[tokio::test]
    async fn update_completes_a_placeholder() {
        let store = MemoryStore::new();
        let id = store
            .add_message("s1", Role::Assistant, "", false)
            .await
            .unwrap();
        store.update_message(&id, "done", true).await.unwrap();

        let messages = store.messages("s1").await.unwrap();
        assert_eq!(messages[0].content, "done");
        assert!(messages[0].is_complete);
    }

    #[tokio::test]
    async fn update_of_unknown_id_fails() {
        let store = MemoryStore::new();
        let err = store.update_message(&"nope".to_string(), "x", true).await;
        assert!(matches!(err, Err(ShellboxError::Store(_))));
    }
}
