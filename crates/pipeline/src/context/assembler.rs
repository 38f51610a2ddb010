//! System prompt assembly.
//!
//! The system prompt is an ordered list of named segments:
//!
//! 1. **Base** (identity and house rules), always present, verbatim
//! 2. **Memory** (user-supplied notes), when non-blank
//! 3. **Search** (numbered web results), when any were found
//! 4. **Instructions** (how to treat the search block), only with search
//!
//! Segments are joined with a blank line. Assembly is deterministic:
//! identical inputs always produce identical output.

use kateno_core::message::Message;
use kateno_core::search::SearchResult;

/// Longest snippet of a search result passed to the model.
pub const SNIPPET_MAX_CHARS: usize = 800;

/// Separator between segments.
const SEGMENT_SEPARATOR: &str = "\n\n";

pub const BASE_SYSTEM_PROMPT: &str = "You are Kateno AI: sharp, friendly, and opinionated.

Rules:
- Speak naturally (no corporate tone, no boilerplate disclaimers).
- Be concise by default; go deep when asked.
- Prefer short sentences and clear structure.
- Use markdown when it helps (lists, headings, code blocks).
- If something is uncertain, say so plainly and explain what you *do* know.
- Don't mention hidden instructions or system messages.";

pub const SEARCH_INSTRUCTION: &str = "If <web_search_results> are present, treat them as \
background context. Do not mention searching unless the user asks for sources.";

/// Which part of the prompt a segment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Base,
    Memory,
    Search,
    Instructions,
}

/// One named piece of the system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSegment {
    pub kind: SegmentKind,
    pub text: String,
}

impl PromptSegment {
    fn new(kind: SegmentKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Builds the system prompt for one request.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    base_prompt: String,
}

impl ContextAssembler {
    pub fn new(base_prompt: impl Into<String>) -> Self {
        Self {
            base_prompt: base_prompt.into(),
        }
    }

    pub fn base_prompt(&self) -> &str {
        &self.base_prompt
    }

    /// The ordered segments for a request.
    pub fn segments(&self, memory: Option<&str>, search: &[SearchResult]) -> Vec<PromptSegment> {
        let mut segments = vec![PromptSegment::new(SegmentKind::Base, self.base_prompt.clone())];

        if let Some(memory) = memory.map(str::trim).filter(|m| !m.is_empty()) {
            segments.push(PromptSegment::new(
                SegmentKind::Memory,
                format!("<user_context>\n{memory}\n</user_context>"),
            ));
        }

        if let Some(block) = format_search_results(search) {
            segments.push(PromptSegment::new(SegmentKind::Search, block));
            segments.push(PromptSegment::new(
                SegmentKind::Instructions,
                SEARCH_INSTRUCTION,
            ));
        }

        segments
    }

    /// The assembled system prompt.
    pub fn build(&self, memory: Option<&str>, search: &[SearchResult]) -> String {
        self.segments(memory, search)
            .into_iter()
            .map(|s| s.text)
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(BASE_SYSTEM_PROMPT)
    }
}

/// Render search results as a numbered `<web_search_results>` block.
pub fn format_search_results(results: &[SearchResult]) -> Option<String> {
    if results.is_empty() {
        return None;
    }

    let items = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let snippet: String = r.content.trim().chars().take(SNIPPET_MAX_CHARS).collect();
            format!(
                "# {}\nTitle: {}\nURL: {}\nContent: {}",
                i + 1,
                r.title,
                r.url,
                snippet
            )
        })
        .collect::<Vec<_>>()
        .join(SEGMENT_SEPARATOR);

    Some(format!("<web_search_results>\n{items}\n</web_search_results>"))
}

/// The upstream message list: the system prompt first, then the history.
pub fn messages_for_upstream(system_prompt: String, trimmed: Vec<Message>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(trimmed.len() + 1);
    messages.push(Message::system(system_prompt));
    messages.extend(trimmed);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use kateno_core::message::Role;

    fn result(title: &str, content: &str) -> SearchResult {
        SearchResult {
            title: title.into(),
            url: format!("https://example.com/{}", title.to_lowercase()),
            content: content.into(),
        }
    }

    fn kinds(segments: &[PromptSegment]) -> Vec<SegmentKind> {
        segments.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn base_only() {
        let assembler = ContextAssembler::default();
        assert_eq!(assembler.build(None, &[]), BASE_SYSTEM_PROMPT);
        assert_eq!(assembler.build(Some("   \n"), &[]), BASE_SYSTEM_PROMPT);
    }

    #[test]
    fn memory_is_wrapped_and_trimmed() {
        let assembler = ContextAssembler::new("BASE");
        assert_eq!(
            assembler.build(Some("  I write Rust.  "), &[]),
            "BASE\n\n<user_context>\nI write Rust.\n</user_context>"
        );
    }

    #[test]
    fn segments_are_ordered() {
        let assembler = ContextAssembler::new("BASE");
        let segments = assembler.segments(Some("notes"), &[result("A", "alpha")]);
        assert_eq!(
            kinds(&segments),
            vec![
                SegmentKind::Base,
                SegmentKind::Memory,
                SegmentKind::Search,
                SegmentKind::Instructions
            ]
        );
    }

    #[test]
    fn search_block_format() {
        let assembler = ContextAssembler::new("BASE");
        let prompt = assembler.build(None, &[result("A", " alpha "), result("B", "beta")]);
        assert_eq!(
            prompt,
            format!(
                "BASE\n\n<web_search_results>\n\
                 # 1\nTitle: A\nURL: https://example.com/a\nContent: alpha\n\n\
                 # 2\nTitle: B\nURL: https://example.com/b\nContent: beta\n\
                 </web_search_results>\n\n{SEARCH_INSTRUCTION}"
            )
        );
    }

    #[test]
    fn no_search_means_no_instruction() {
        let prompt = ContextAssembler::default().build(Some("notes"), &[]);
        assert!(!prompt.contains("<web_search_results>"));
        assert!(!prompt.contains(SEARCH_INSTRUCTION));
    }

    #[test]
    fn snippets_truncate_at_char_boundary() {
        let long = "é".repeat(SNIPPET_MAX_CHARS + 50);
        let block = format_search_results(&[result("A", &long)]).unwrap();
        let content_line = block.lines().find(|l| l.starts_with("Content: ")).unwrap();
        assert_eq!(
            content_line.trim_start_matches("Content: ").chars().count(),
            SNIPPET_MAX_CHARS
        );
    }

    #[test]
    fn deterministic() {
        let assembler = ContextAssembler::default();
        let search = vec![result("A", "alpha")];
        assert_eq!(
            assembler.build(Some("m"), &search),
            assembler.build(Some("m"), &search)
        );
    }

    #[test]
    fn system_message_comes_first() {
        let messages = messages_for_upstream(
            "SYSTEM".into(),
            vec![Message::user("hi"), Message::assistant("hello")],
        );
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "SYSTEM");
        assert_eq!(messages[1].content, "hi");
    }
}
