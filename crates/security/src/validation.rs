//! Chat request validation and input sanitization.
//!
//! Validation runs on the raw request; sanitization then strips markup that
//! could execute if a client renders the text as HTML. A message left blank
//! by sanitization is rejected, so the pipeline only ever sees non-empty
//! content.

use std::sync::LazyLock;

use kateno_core::chat::ChatRequest;
use kateno_core::message::Message;
use regex::Regex;

/// Longest accepted message content, in characters.
pub const MAX_CONTENT_CHARS: usize = 163_840;

/// Longest accepted context memory, in characters.
pub const MAX_MEMORY_CHARS: usize = 163_840;

/// Longest accepted conversation id or provider name.
const MAX_IDENTIFIER_CHARS: usize = 128;

/// Error returned when a chat request fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("At least one message is required")]
    NoMessages,

    #[error("Message {index} is empty")]
    EmptyContent { index: usize },

    #[error("Message {index} exceeds {max} characters")]
    ContentTooLong { index: usize, max: usize },

    #[error("Context memory exceeds {max} characters")]
    MemoryTooLong { max: usize },

    #[error("Field '{field}' exceeds {max} characters")]
    IdentifierTooLong { field: &'static str, max: usize },
}

const UNSAFE_PATTERNS: &[&str] = &[
    r"(?is)<script\b.*?</script\s*>",
    r"(?i)javascript:",
    r"(?i)on\w+\s*=",
];

static UNSAFE_MARKUP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    UNSAFE_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

/// Remove script blocks, `javascript:` URLs and inline `on*=` handlers, then trim.
pub fn sanitize(input: &str) -> String {
    let mut cleaned = input.to_string();
    for re in UNSAFE_MARKUP.iter() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned.trim().to_string()
}

/// Check a request's shape and sizes, then sanitize every text field.
pub fn validate_and_sanitize(request: ChatRequest) -> Result<ChatRequest, ValidationError> {
    if request.messages.is_empty() {
        return Err(ValidationError::NoMessages);
    }

    for (index, message) in request.messages.iter().enumerate() {
        let chars = message.content.chars().count();
        if chars == 0 {
            return Err(ValidationError::EmptyContent { index });
        }
        if chars > MAX_CONTENT_CHARS {
            return Err(ValidationError::ContentTooLong {
                index,
                max: MAX_CONTENT_CHARS,
            });
        }
    }

    if let Some(memory) = &request.context_memory
        && memory.chars().count() > MAX_MEMORY_CHARS
    {
        return Err(ValidationError::MemoryTooLong {
            max: MAX_MEMORY_CHARS,
        });
    }

    check_identifier("conversationId", request.conversation_id.as_deref())?;
    check_identifier("provider", request.provider.as_deref())?;

    let messages = request
        .messages
        .into_iter()
        .enumerate()
        .map(|(index, message)| {
            let content = sanitize(&message.content);
            if content.is_empty() {
                Err(ValidationError::EmptyContent { index })
            } else {
                Ok(Message::new(message.role, content))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ChatRequest {
        messages,
        context_memory: request
            .context_memory
            .map(|m| sanitize(&m))
            .filter(|m| !m.is_empty()),
        conversation_id: request
            .conversation_id
            .map(|id| sanitize(&id))
            .filter(|id| !id.is_empty()),
        provider: request
            .provider
            .map(|p| sanitize(&p))
            .filter(|p| !p.is_empty()),
    })
}

fn check_identifier(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.chars().count() > MAX_IDENTIFIER_CHARS => {
            Err(ValidationError::IdentifierTooLong {
                field,
                max: MAX_IDENTIFIER_CHARS,
            })
        }
        _ => Ok(()),
    }
}
