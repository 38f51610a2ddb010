//! # Kateno Core
//!
//! Domain types, traits, and error definitions for the Kateno chat pipeline.
//! This crate has **zero framework dependencies**; it defines the domain model
//! that all other crates implement against.
//!
//! Every collaborator (model provider, search backend, conversation store) is
//! a trait here. Implementations live in their respective crates, so tests
//! can swap in stubs and deployments can swap backends via configuration.

pub mod chat;
pub mod error;
pub mod message;
pub mod provider;
pub mod search;
pub mod session;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use chat::ChatRequest;
pub use error::{ChatError, Error, ProviderError, Result, SearchError};
pub use message::{ConversationId, Message, Role};
pub use provider::{Provider, ProviderDescriptor, ProviderRequest};
pub use search::{SearchProvider, SearchResult};
pub use session::{FragmentResult, FragmentSender, StreamSession};
pub use store::{ConversationStore, Exchange, StoredMessage};
