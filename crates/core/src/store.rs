//! Persistence collaborator: receives finished exchanges.
//!
//! The pipeline never blocks on persistence: callers hand an `Exchange` to
//! the store only after a stream completed normally.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::message::{ConversationId, Message, Role};

/// A user turn and the assistant reply it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub conversation_id: ConversationId,
    pub user: Message,
    pub assistant: Message,
    /// Provider that produced the reply (may be the simulator).
    pub provider: String,
    pub completed_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(
        conversation_id: ConversationId,
        user: Message,
        assistant_text: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            user,
            assistant: Message::assistant(assistant_text),
            provider: provider.into(),
            completed_at: Utc::now(),
        }
    }
}

/// A message as recorded by a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn from_message(message: &Message, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: message.role,
            content: message.content.clone(),
            created_at,
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append both halves of a finished exchange.
    async fn save_exchange(&self, exchange: Exchange) -> Result<(), Error>;

    /// Messages recorded for a conversation, oldest first.
    async fn messages(&self, conversation_id: &ConversationId) -> Result<Vec<StoredMessage>, Error>;
}
