//! LLM Provider implementations for Kateno.
//!
//! All providers implement the `kateno_core::Provider` trait.
//! The registry resolves names from configuration and builds the fallback
//! chain, which always ends in the offline simulator.

pub mod fallback;
pub mod openai_compat;
pub mod registry;
pub mod simulator;
pub mod sse;

pub use fallback::FallbackChain;
pub use openai_compat::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
pub use simulator::SimulatorProvider;
pub use sse::{SseDecoder, SseEvent};
