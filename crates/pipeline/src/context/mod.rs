//! Prompt context: the system prompt and the history sent upstream.
//!
//! | Part | Source | Trim Strategy |
//! |------|--------|---------------|
//! | System prompt | Base + memory + search segments | Never trimmed |
//! | Conversation history | Caller's messages | Oldest turns dropped |

pub mod assembler;
pub mod token;

pub use assembler::{
    BASE_SYSTEM_PROMPT, ContextAssembler, PromptSegment, SEARCH_INSTRUCTION, SegmentKind,
    format_search_results, messages_for_upstream,
};
pub use token::{estimate_message_tokens, estimate_tokens, trim};
