//! Token estimation and history trimming.
//!
//! Uses a character-based heuristic: ~4 characters per token, counted in
//! characters rather than bytes so non-ASCII text is not over-charged.

use kateno_core::message::Message;

/// Fixed cost of a message's role name and delimiters on the wire.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Keep the newest messages that fit beside `system_prompt` in `max_tokens`.
///
/// The result is a contiguous suffix of `history` in chronological order.
/// Scanning stops at the first message that does not fit, so an older short
/// message never fills a gap left by a newer long one. A non-empty history
/// never trims to empty: when nothing fits, the newest message is kept alone.
pub fn trim(history: &[Message], system_prompt: &str, max_tokens: usize) -> Vec<Message> {
    let Some(newest) = history.last() else {
        return Vec::new();
    };

    let system_tokens = estimate_tokens(system_prompt);
    if system_tokens >= max_tokens {
        return vec![newest.clone()];
    }

    let mut total = system_tokens;
    let mut start = history.len();
    for (i, message) in history.iter().enumerate().rev() {
        let cost = estimate_message_tokens(message);
        if total + cost > max_tokens {
            break;
        }
        total += cost;
        start = i;
    }

    if start == history.len() {
        return vec![newest.clone()];
    }
    history[start..].to_vec()
}
