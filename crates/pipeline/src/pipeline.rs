//! The chat pipeline: search, assemble, trim, dispatch, and fall back.
//!
//! `ChatPipeline::route` runs everything that happens before the first
//! fragment and hands back a `ChatStream`. The stream tracks where the
//! request is in its lifecycle:
//!
//! ```text
//! Idle → Searching → Assembling → Streaming{live} → Done
//!                                 │                  └→ FailedPostByte → Error
//!                                 └→ FailedPreByte → Streaming{simulated} → Done
//! ```
//!
//! Pre-byte failures are absorbed by the fallback chain; the stream only
//! records that one happened. Post-byte failures are yielded to the caller.

use std::sync::Arc;

use kateno_config::AppConfig;
use kateno_core::chat::ChatRequest;
use kateno_core::error::{ChatError, ProviderError};
use kateno_core::message::{ConversationId, Message, latest_user_turn};
use kateno_core::provider::{ProviderDescriptor, ProviderRequest, is_simulator};
use kateno_core::session::{FragmentResult, StreamSession};
use kateno_core::store::Exchange;
use kateno_providers::ProviderRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::{ContextAssembler, messages_for_upstream, trim};
use crate::search::{SearchAugmenter, TavilySearch};

/// Lifecycle of one chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Searching,
    Assembling,
    Streaming { provider: String, simulated: bool },
    /// A provider failed before its first fragment; the chain moved on.
    FailedPreByte,
    /// The committed provider failed mid-stream.
    FailedPostByte,
    Done,
    Error,
    /// The caller abandoned the request.
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

/// Orchestrates one chat request end to end.
pub struct ChatPipeline {
    registry: Arc<ProviderRegistry>,
    search: SearchAugmenter,
    assembler: ContextAssembler,
    max_context_tokens: usize,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ChatPipeline {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            search: SearchAugmenter::disabled(),
            assembler: ContextAssembler::default(),
            max_context_tokens: 163_840,
            temperature: 0.7,
            max_tokens: Some(8000),
        }
    }

    /// Build the pipeline and its collaborators from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let registry = Arc::new(ProviderRegistry::from_config(config));
        let search = SearchAugmenter::new(Arc::new(TavilySearch::from_config(&config.search)));
        let assembler = config
            .system_prompt
            .as_deref()
            .map(ContextAssembler::new)
            .unwrap_or_default();

        Self::new(registry)
            .with_search(search)
            .with_assembler(assembler)
            .with_max_context_tokens(config.max_context_tokens)
            .with_sampling(config.default_temperature, Some(config.default_max_tokens))
    }

    pub fn with_search(mut self, search: SearchAugmenter) -> Self {
        self.search = search;
        self
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_max_context_tokens(mut self, max_context_tokens: usize) -> Self {
        self.max_context_tokens = max_context_tokens;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Providers in preference order, simulator last.
    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.registry.descriptors()
    }

    /// Run a request up to its first fragment.
    ///
    /// Returns `UnsupportedProvider` for an unknown override before any
    /// search or upstream call, and `Cancelled` if `cancel` fires first.
    pub async fn route(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ChatError> {
        if request.messages.is_empty() {
            return Err(ChatError::Validation("messages must not be empty".into()));
        }

        let chain = self.registry.chain_for(request.provider.as_deref())?;
        let planned = chain.names().first().map(|n| n.to_string()).unwrap_or_default();

        let mut trail = Trail::new();
        let user_turn = latest_user_turn(&request.messages).cloned();

        trail.enter(PipelineState::Searching);
        let search_results = match &user_turn {
            Some(turn) if self.search.is_enabled() => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                    results = self.search.search(&turn.content) => results,
                }
            }
            _ => Vec::new(),
        };

        trail.enter(PipelineState::Assembling);
        let system_prompt = self
            .assembler
            .build(request.context_memory.as_deref(), &search_results);
        let trimmed = trim(&request.messages, &system_prompt, self.max_context_tokens);
        debug!(
            history = request.messages.len(),
            kept = trimmed.len(),
            search_results = search_results.len(),
            "Context assembled"
        );

        let mut upstream = ProviderRequest::new(messages_for_upstream(system_prompt, trimmed));
        upstream.temperature = self.temperature;
        upstream.max_tokens = self.max_tokens;
        upstream.search_results = search_results;

        let session = chain.open(upstream, &cancel).await?;
        let provider = session.provider().to_string();

        if provider != planned {
            trail.enter(PipelineState::FailedPreByte);
        }
        trail.enter(PipelineState::Streaming {
            provider: provider.clone(),
            simulated: is_simulator(&provider),
        });
        info!(provider = %provider, planned = %planned, "Streaming reply");

        let conversation_id = request
            .conversation_id
            .as_deref()
            .map(ConversationId::from)
            .unwrap_or_default();

        Ok(ChatStream {
            session,
            trail,
            transcript: String::new(),
            conversation_id,
            user_turn,
            provider,
        })
    }
}

/// States visited so far; the last one is current.
#[derive(Debug)]
struct Trail {
    states: Vec<PipelineState>,
}

impl Trail {
    fn new() -> Self {
        Self {
            states: vec![PipelineState::Idle],
        }
    }

    fn current(&self) -> &PipelineState {
        // Never empty: starts at Idle and only grows.
        &self.states[self.states.len() - 1]
    }

    fn enter(&mut self, next: PipelineState) {
        debug!(from = ?self.current(), to = ?next, "Pipeline transition");
        self.states.push(next);
    }
}

/// The caller's side of a routed request.
///
/// Dropping the stream cancels the underlying provider session.
#[derive(Debug)]
pub struct ChatStream {
    session: StreamSession,
    trail: Trail,
    transcript: String,
    conversation_id: ConversationId,
    user_turn: Option<Message>,
    provider: String,
}

impl ChatStream {
    /// The provider producing this reply.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn state(&self) -> &PipelineState {
        self.trail.current()
    }

    /// Every state visited, oldest first.
    pub fn history(&self) -> &[PipelineState] {
        &self.trail.states
    }

    /// Text yielded so far.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.session.cancellation()
    }

    /// Stop the reply. Idempotent; no error is reported afterwards.
    pub fn cancel(&self) {
        self.session.cancel();
    }

    /// Next fragment, or `None` once the reply is over.
    pub async fn next_fragment(&mut self) -> Option<FragmentResult> {
        if self.state().is_terminal() {
            return None;
        }

        match self.session.next_fragment().await {
            Some(Ok(fragment)) => {
                self.transcript.push_str(&fragment);
                Some(Ok(fragment))
            }
            Some(Err(e)) if e.is_cancellation() => {
                self.trail.enter(PipelineState::Cancelled);
                None
            }
            Some(Err(e)) => {
                self.trail.enter(PipelineState::FailedPostByte);
                self.trail.enter(PipelineState::Error);
                Some(Err(e))
            }
            None if self.session.is_cancelled() => {
                self.trail.enter(PipelineState::Cancelled);
                None
            }
            None => {
                self.trail.enter(PipelineState::Done);
                debug!(provider = %self.provider, chars = self.transcript.chars().count(), "Reply complete");
                None
            }
        }
    }

    /// Drain the reply into a string.
    pub async fn collect_text(mut self) -> Result<String, ProviderError> {
        while let Some(item) = self.next_fragment().await {
            item?;
        }
        if *self.state() == PipelineState::Cancelled {
            return Err(ProviderError::Cancelled);
        }
        Ok(self.transcript.clone())
    }

    /// The finished exchange, if the reply completed normally.
    pub fn exchange(&self) -> Option<Exchange> {
        if *self.state() != PipelineState::Done {
            return None;
        }
        let user = self.user_turn.clone()?;
        Some(Exchange::new(
            self.conversation_id.clone(),
            user,
            self.transcript.clone(),
            self.provider.clone(),
        ))
    }
}
