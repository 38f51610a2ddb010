//! Error types for the Kateno domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant; collaborator failures are
//! translated into one of these before they cross into the pipeline.

use thiserror::Error;

/// The top-level error type for all Kateno operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Search errors ---
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    // --- Pipeline errors ---
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    // --- Persistence errors ---
    #[error("Storage error: {0}")]
    Storage(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("No response body from {0}")]
    NoBody(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream cancelled by caller")]
    Cancelled,
}

impl ProviderError {
    /// Whether this error came from the caller aborting, not from upstream.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status carried by the upstream failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { status_code, .. } => Some(*status_code),
            Self::RateLimited { .. } => Some(429),
            Self::AuthenticationFailed(_) => Some(401),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search provider not configured")]
    NotConfigured,

    #[error("Search request failed with status {status_code}: {body}")]
    Status { status_code: u16, body: String },

    #[error("Search transport error: {0}")]
    Transport(String),

    #[error("Malformed search response: {0}")]
    Decode(String),
}

/// Failure classes surfaced by the chat pipeline to its caller.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Upstream model error: {0}")]
    Upstream(ProviderError),

    #[error("Request cancelled")]
    Cancelled,
}

impl From<ProviderError> for ChatError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => Self::Cancelled,
            other => Self::Upstream(other),
        }
    }
}
