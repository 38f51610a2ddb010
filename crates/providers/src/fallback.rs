//! Provider fallback: an ordered chain with a first-byte deadline per entry.
//!
//! A provider that fails before producing its first fragment (an error from
//! `stream()`, an error as the first item, a stream that closes empty, or no
//! fragment within the deadline) is skipped and the next entry is tried. Once
//! a fragment has been read the chain commits to that provider: later errors
//! reach the caller unchanged.
//!
//! Each attempt runs under a child of the caller's cancellation token, so
//! abandoning a failed attempt never cancels the caller or later attempts.

use async_trait::async_trait;
use kateno_core::error::ProviderError;
use kateno_core::provider::{Provider, ProviderRequest};
use kateno_core::session::StreamSession;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time a provider has to produce its first fragment.
pub const DEFAULT_FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Ordered providers tried until one produces a first fragment.
pub struct FallbackChain {
    chain: Vec<FallbackEntry>,
}

/// A single entry in the fallback chain.
struct FallbackEntry {
    provider: Arc<dyn Provider>,
    first_byte_timeout: Duration,
}

impl FallbackChain {
    /// Create a new fallback chain with no entries.
    pub fn new() -> Self {
        Self { chain: Vec::new() }
    }

    /// Add a provider with a custom first-byte timeout.
    pub fn add(mut self, provider: Arc<dyn Provider>, first_byte_timeout: Duration) -> Self {
        self.chain.push(FallbackEntry {
            provider,
            first_byte_timeout,
        });
        self
    }

    /// Add a provider with the default first-byte timeout.
    pub fn add_default(self, provider: Arc<dyn Provider>) -> Self {
        self.add(provider, DEFAULT_FIRST_BYTE_TIMEOUT)
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Provider names in attempt order.
    pub fn names(&self) -> Vec<&str> {
        self.chain.iter().map(|e| e.provider.name()).collect()
    }

    /// Open a stream on the first provider that yields a fragment.
    ///
    /// The returned session has its first fragment primed, so nothing read
    /// while probing is lost. Fails with the last provider error only when
    /// every entry failed, or with `Cancelled` when `cancel` fires.
    pub async fn open(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamSession, ProviderError> {
        let mut last_error = ProviderError::NotConfigured("No providers in fallback chain".into());

        for (i, entry) in self.chain.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let provider_name = entry.provider.name().to_string();
            info!(
                provider = %provider_name,
                attempt = i + 1,
                total = self.chain.len(),
                "Fallback: trying provider"
            );

            let attempt = cancel.child_token();
            let attempt_fut = tokio::time::timeout(
                entry.first_byte_timeout,
                open_primed(entry.provider.as_ref(), request.clone(), attempt.clone()),
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                outcome = attempt_fut => outcome,
            };

            match outcome {
                Ok(Ok(session)) => {
                    if i > 0 {
                        info!(provider = %provider_name, "Fallback: provider took over");
                    }
                    return Ok(session);
                }
                Ok(Err(e)) if e.is_cancellation() && cancel.is_cancelled() => {
                    return Err(ProviderError::Cancelled);
                }
                Ok(Err(e)) => {
                    attempt.cancel();
                    warn!(
                        provider = %provider_name,
                        error = %e,
                        "Fallback: provider failed before first byte, trying next"
                    );
                    last_error = e;
                }
                Err(_) => {
                    attempt.cancel();
                    warn!(
                        provider = %provider_name,
                        timeout_secs = entry.first_byte_timeout.as_secs(),
                        "Fallback: provider produced no first byte in time, trying next"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "Provider '{}' produced no output within {}s",
                        provider_name,
                        entry.first_byte_timeout.as_secs()
                    ));
                }
            }
        }

        Err(last_error)
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for FallbackChain {
    fn name(&self) -> &str {
        "fallback"
    }

    fn model(&self) -> &str {
        self.chain
            .first()
            .map(|e| e.provider.model())
            .unwrap_or_default()
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<StreamSession, ProviderError> {
        self.open(request, &cancel).await
    }
}

/// Dispatch and read ahead until the first fragment.
async fn open_primed(
    provider: &dyn Provider,
    request: ProviderRequest,
    cancel: CancellationToken,
) -> Result<StreamSession, ProviderError> {
    let mut session = provider.stream(request, cancel).await?;
    match session.next_fragment().await {
        Some(Ok(fragment)) => {
            session.prime(fragment);
            Ok(session)
        }
        Some(Err(e)) => Err(e),
        None if session.is_cancelled() => Err(ProviderError::Cancelled),
        None => Err(ProviderError::EmptyResponse(provider.name().to_string())),
    }
}
