//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to a model and stream the
//! reply back as incremental text fragments. Live HTTP backends and the
//! offline simulator implement the same capability, so the fallback chain
//! can treat them uniformly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::Message;
use crate::search::SearchResult;
use crate::session::StreamSession;

/// Name of the offline simulator, always last in the provider order.
pub const SIMULATOR_NAME: &str = "simulator";

/// Model identifier reported by the simulator.
pub const SIMULATOR_MODEL: &str = "simulator-v1";

/// Names an explicit override may use to select the simulator.
pub const SIMULATOR_ALIASES: &[&str] = &[SIMULATOR_NAME, "mock"];

/// Whether `name` selects the offline simulator.
pub fn is_simulator(name: &str) -> bool {
    SIMULATOR_ALIASES.iter().any(|alias| alias.eq_ignore_ascii_case(name))
}

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use; empty means the provider's configured default.
    #[serde(default)]
    pub model: String,

    /// The conversation, assembled system message first.
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Search snippets gathered for this request. Live providers read them
    /// through the system prompt; the simulator only notes their presence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_results: Vec<SearchResult>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: String::new(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            search_results: Vec::new(),
        }
    }
}

/// A configured provider as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Identifier used for explicit overrides (e.g. "groq", "simulator").
    pub name: String,

    /// Whether credentials for this provider are present.
    pub available: bool,

    /// The model this provider sends requests to.
    pub model: String,
}

/// The core Provider trait.
///
/// The pipeline calls `stream()` without knowing which backend answers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A short identifier for this provider (e.g., "groq", "simulator").
    fn name(&self) -> &str;

    /// The model requests are sent to when the request leaves it empty.
    fn model(&self) -> &str;

    /// Dispatch a request and return the session streaming its reply.
    ///
    /// An `Err` means nothing was produced. `cancel` aborts the upstream
    /// request and ends the session cleanly.
    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<StreamSession, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
