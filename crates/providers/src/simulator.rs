//! Offline simulator: a provider that never touches the network.
//!
//! The simulator classifies the latest user turn against an ordered list of
//! intent rules, renders that rule's template, and emits the text one
//! character at a time with a small random delay so clients see the same
//! cadence as a live model. It always succeeds, which is why the fallback
//! chain pins it last.

use std::time::Duration;

use async_trait::async_trait;
use kateno_config::{IntentRule, SimulatorConfig};
use kateno_core::error::ProviderError;
use kateno_core::message::{Message, Role};
use kateno_core::provider::{Provider, ProviderRequest, SIMULATOR_MODEL, SIMULATOR_NAME};
use kateno_core::search::SearchResult;
use kateno_core::session::StreamSession;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest slice of the user's text echoed back by `{topic}`.
const TOPIC_MAX_CHARS: usize = 80;

const SAMPLE_CODE: &str = "```rust
fn factorial(n: u64) -> u64 {
    match n {
        0 | 1 => 1,
        _ => n * factorial(n - 1),
    }
}

fn main() {
    println!(\"5! = {}\", factorial(5));
}
```";

/// Rules used when the configuration supplies none, in match order.
pub fn builtin_intents() -> Vec<IntentRule> {
    fn rule(name: &str, keywords: &[&str], questions: bool, template: &str) -> IntentRule {
        IntentRule {
            name: name.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            questions,
            template: template.into(),
        }
    }

    vec![
        rule(
            "identity",
            &["who are you", "what are you", "your name", "are you an ai", "introduce yourself"],
            false,
            "I'm Kateno AI, running in offline mode right now. No live model is reachable, \
             so I'm answering from a small set of built-in replies. Once a provider is \
             configured you'll get full answers again.",
        ),
        rule(
            "technical",
            &[
                "code", "coding", "program", "programming", "function", "recursion",
                "algorithm", "bug", "debug", "compile", "error", "rust", "python",
                "javascript", "typescript", "api", "explain",
            ],
            false,
            "Here's a quick take on \"{topic}\".\n\n\
             A common way to approach this is to break the problem into a small base \
             case and a step that reduces the input toward it. For example:\n\n{code}\n\n\
             Each call handles one piece and delegates the rest, until the base case \
             stops the chain.{search}",
        ),
        rule(
            "help",
            &["help", "assist", "support", "can you", "could you", "how do i"],
            false,
            "Happy to help with \"{topic}\". I'm in offline mode, so my answers are \
             limited, but I can still sketch an outline: describe what you're trying to \
             do, what you've tried, and where it goes wrong, and we'll go from there.{search}",
        ),
        rule(
            "search",
            &["search", "look up", "lookup", "find", "latest", "news", "today"],
            false,
            "You asked about \"{topic}\". I can't browse while offline, so treat anything \
             time-sensitive with care.{search}",
        ),
        rule(
            "greeting",
            &["hello", "hi", "hey", "greetings", "good morning", "good evening"],
            false,
            "Hello! I'm Kateno AI. I'm running in offline mode at the moment, but feel \
             free to ask me anything.",
        ),
        rule(
            "question",
            &["what", "why", "how", "when", "where", "which"],
            true,
            "Good question: \"{topic}\". In offline mode I can only give a general \
             answer. The short version is that it depends on the context, so share a \
             few more details and I'll narrow it down.{search}",
        ),
        rule(
            "default",
            &[],
            false,
            "Thanks for your message about \"{topic}\". I'm in offline mode right now, \
             so this is a simulated reply. Configure a provider API key for full \
             responses.{search}",
        ),
    ]
}

/// Sent when no intent applies or the chosen one renders nothing.
const OFFLINE_REPLY: &str = "I'm in offline mode right now, so this is a simulated reply.";

/// A deterministic-content, network-free provider.
pub struct SimulatorProvider {
    intents: Vec<IntentRule>,
    min_delay_ms: u64,
    max_delay_ms: u64,
}

impl SimulatorProvider {
    pub fn new(config: SimulatorConfig) -> Self {
        let intents = if config.intents.is_empty() {
            builtin_intents()
        } else {
            config.intents
        };
        Self {
            intents,
            min_delay_ms: config.min_delay_ms.min(config.max_delay_ms),
            max_delay_ms: config.max_delay_ms.max(config.min_delay_ms),
        }
    }

    /// A simulator with no pacing delay; used by tests.
    pub fn instant() -> Self {
        Self::new(SimulatorConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            intents: vec![],
        })
    }

    /// The first rule matching `text`. Falls back to the last rule.
    pub fn classify(&self, text: &str) -> Option<&IntentRule> {
        let lowered = text.to_lowercase();
        self.intents
            .iter()
            .find(|rule| rule_matches(rule, &lowered))
            .or_else(|| self.intents.last())
    }

    /// Render the full reply for a history without streaming it.
    pub fn reply(&self, history: &[Message], search: &[SearchResult]) -> String {
        let text = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .unwrap_or_default();

        let Some(rule) = self.classify(text) else {
            return OFFLINE_REPLY.to_string();
        };

        debug!(intent = %rule.name, "Simulator selected intent");
        let reply = render(&rule.template, text, search);
        if reply.trim().is_empty() {
            warn!(intent = %rule.name, "Intent rendered an empty reply");
            return OFFLINE_REPLY.to_string();
        }
        reply
    }

    fn delays(&self, count: usize) -> Vec<Duration> {
        if self.max_delay_ms == 0 {
            return vec![Duration::ZERO; count];
        }
        let mut rng = rand::rng();
        (0..count)
            .map(|_| Duration::from_millis(rng.random_range(self.min_delay_ms..=self.max_delay_ms)))
            .collect()
    }
}

impl Default for SimulatorProvider {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

#[async_trait]
impl Provider for SimulatorProvider {
    fn name(&self) -> &str {
        SIMULATOR_NAME
    }

    fn model(&self) -> &str {
        SIMULATOR_MODEL
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<StreamSession, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let text = self.reply(&request.messages, &request.search_results);
        let chars: Vec<char> = text.chars().collect();
        let delays = self.delays(chars.len());

        let (tx, session) = StreamSession::channel(SIMULATOR_NAME, cancel.clone());

        tokio::spawn(async move {
            for (ch, delay) in chars.into_iter().zip(delays) {
                if !delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    result = tx.send(Ok(ch.to_string())) => result.is_ok(),
                };
                if !sent {
                    return;
                }
            }
        });

        Ok(session)
    }
}

fn rule_matches(rule: &IntentRule, lowered: &str) -> bool {
    if rule.keywords.is_empty() && !rule.questions {
        return true;
    }
    if rule.questions && lowered.trim_end().ends_with('?') {
        return true;
    }
    rule.keywords.iter().any(|keyword| {
        let keyword = keyword.to_lowercase();
        if keyword.contains(' ') {
            lowered.contains(&keyword)
        } else {
            lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == keyword)
        }
    })
}

fn render(template: &str, text: &str, search: &[SearchResult]) -> String {
    let search_note = if search.is_empty() {
        String::new()
    } else {
        format!(
            "\n\nI also found {} related web result{}, which a live model would draw on here.",
            search.len(),
            if search.len() == 1 { "" } else { "s" }
        )
    };

    template
        .replace("{topic}", &truncate_topic(text))
        .replace("{code}", SAMPLE_CODE)
        .replace("{search}", &search_note)
}

fn truncate_topic(text: &str) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= TOPIC_MAX_CHARS {
        return single_line;
    }
    let cut: String = single_line.chars().take(TOPIC_MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}
