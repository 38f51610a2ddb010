//! Web search augmentation.
//!
//! `TavilySearch` is the fallible backend; `SearchAugmenter` is what the
//! pipeline talks to. The augmenter never fails: a missing credential, a
//! non-success status, a transport error, a timeout, or a malformed body all
//! become an empty result list after being logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kateno_config::SearchConfig;
use kateno_core::error::SearchError;
use kateno_core::search::{SearchProvider, SearchResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tavily search API client.
pub struct TavilySearch {
    api_url: String,
    api_key: Option<String>,
    max_results: usize,
    search_depth: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            max_results: 5,
            search_depth: "basic".into(),
            timeout: Duration::from_secs(10),
            client: reqwest::Client::new(),
        }
    }

    /// Build from configuration, resolving the key from the environment.
    pub fn from_config(config: &SearchConfig) -> Self {
        Self::from_config_with(config, &|key: &str| std::env::var(key).ok())
    }

    pub fn from_config_with(
        config: &SearchConfig,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        Self::new(&config.api_url, config.api_key_with(lookup))
            .with_max_results(config.max_results)
            .with_search_depth(&config.search_depth)
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_search_depth(mut self, depth: impl Into<String>) -> Self {
        self.search_depth = depth.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    include_answer: bool,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let api_key = self.api_key.as_deref().ok_or(SearchError::NotConfigured)?;

        let body = TavilyRequest {
            api_key,
            query,
            max_results: self.max_results,
            include_answer: false,
            search_depth: &self.search_depth,
        };

        let response = self
            .client
            .post(&self.api_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status_code: status.as_u16(),
                body,
            });
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|hit| SearchResult {
                title: hit.title,
                url: hit.url,
                content: hit.content.unwrap_or_default(),
            })
            .collect())
    }
}

/// The pipeline's view of search: best effort, never an error.
#[derive(Clone, Default)]
pub struct SearchAugmenter {
    provider: Option<Arc<dyn SearchProvider>>,
}

impl SearchAugmenter {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// An augmenter that never searches.
    pub fn disabled() -> Self {
        Self { provider: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.as_ref().is_some_and(|p| p.is_enabled())
    }

    /// Results for `query`, or an empty list on any failure.
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        let Some(provider) = self.provider.as_ref().filter(|p| p.is_enabled()) else {
            return Vec::new();
        };

        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        match provider.search(query).await {
            Ok(results) => {
                debug!(provider = %provider.name(), results = results.len(), "Web search completed");
                results
            }
            Err(e) => {
                warn!(provider = %provider.name(), error = %e, "Web search failed, continuing without results");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for SearchAugmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchAugmenter")
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
