//! In-memory conversation store.
//!
//! Keeps every finished exchange for the lifetime of the process. Suitable
//! for a single instance; swap in another `ConversationStore` to persist.

use std::collections::HashMap;

use async_trait::async_trait;
use kateno_core::error::Error;
use kateno_core::message::ConversationId;
use kateno_core::store::{ConversationStore, Exchange, StoredMessage};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations with at least one exchange.
    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn save_exchange(&self, exchange: Exchange) -> Result<(), Error> {
        let user = StoredMessage::from_message(&exchange.user, exchange.completed_at);
        let assistant = StoredMessage::from_message(&exchange.assistant, exchange.completed_at);

        let mut conversations = self.conversations.write().await;
        let messages = conversations
            .entry(exchange.conversation_id.as_str().to_string())
            .or_default();
        messages.push(user);
        messages.push(assistant);

        debug!(
            conversation = %exchange.conversation_id,
            provider = %exchange.provider,
            total = messages.len(),
            "Exchange saved"
        );
        Ok(())
    }

    async fn messages(&self, conversation_id: &ConversationId) -> Result<Vec<StoredMessage>, Error> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}
