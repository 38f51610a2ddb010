//! # Kateno Pipeline
//!
//! Turns a `ChatRequest` into a streamed reply:
//!
//! 1. Resolve the provider chain (an unknown override stops here)
//! 2. Search the web for the latest user turn, when a credential is set
//! 3. Assemble the system prompt and trim history to the token budget
//! 4. Open the first provider in the chain that produces a fragment
//!
//! The returned `ChatStream` yields fragments in upstream order and reports
//! the finished exchange for persistence.

pub mod context;
pub mod pipeline;
pub mod search;

pub use context::{ContextAssembler, PromptSegment, SegmentKind};
pub use pipeline::{ChatPipeline, ChatStream, PipelineState};
pub use search::{SearchAugmenter, TavilySearch};
