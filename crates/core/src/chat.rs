//! The request a caller submits to the chat pipeline.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// A chat request as received from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Full conversation history, oldest first. Must not be empty.
    pub messages: Vec<Message>,

    /// Free-form notes the user wants the assistant to remember.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_memory: Option<String>,

    /// Conversation the finished exchange belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Explicit provider override (e.g. "groq", "simulator").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            context_memory: None,
            conversation_id: None,
            provider: None,
        }
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.context_memory = Some(memory.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn parses_camel_case_wire_format() {
        let req: ChatRequest = serde_json::from_str(
            r#"{
                "messages": [{"role": "user", "content": "Explain recursion"}],
                "contextMemory": "I write Rust",
                "conversationId": "abc"
            }"#,
        )
        .unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(req.context_memory.as_deref(), Some("I write Rust"));
        assert_eq!(req.conversation_id.as_deref(), Some("abc"));
        assert!(req.provider.is_none());
    }
}
