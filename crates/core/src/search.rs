//! Web search collaborator types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// A backend that answers web-search queries.
///
/// Implementations report failures as `SearchError`; the pipeline decides
/// what a failure means (it degrades to no results).
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether credentials are present. Disabled providers are never queried.
    fn is_enabled(&self) -> bool;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError>;
}
