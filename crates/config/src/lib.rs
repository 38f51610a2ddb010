//! Configuration loading, validation, and management for Kateno.
//!
//! Loads configuration from `~/.kateno/config.toml` (or the file named by
//! `KATENO_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.
//!
//! Provider credentials are resolved lazily: each provider names the
//! environment variable holding its key, and availability is re-derived from
//! config + environment on every lookup.

use kateno_core::provider::is_simulator;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.kateno/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider to prefer over the configured order, if it is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Token budget for system prompt plus history
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Seconds a live provider has to produce its first fragment
    #[serde(default = "default_first_byte_timeout")]
    pub first_byte_timeout_secs: u64,

    /// Replace the built-in base instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Web search augmentation
    #[serde(default)]
    pub search: SearchConfig,

    /// Per-client request limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Offline simulator
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Live providers in preference order
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8000
}
fn default_max_context_tokens() -> usize {
    163_840
}
fn default_first_byte_timeout() -> u64 {
    60
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new(
            "groq",
            "https://api.groq.com/openai/v1",
            "openai/gpt-oss-120b",
            "GROQ_API_KEY",
        ),
        ProviderConfig::new(
            "openai",
            "https://api.openai.com/v1",
            "gpt-4o-mini",
            "OPENAI_API_KEY",
        ),
        ProviderConfig::new(
            "huggingface",
            "https://router.huggingface.co/v1",
            "meta-llama/Llama-3.2-3B-Instruct",
            "HUGGINGFACE_API_KEY",
        ),
    ]
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("preferred_provider", &self.preferred_provider)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("max_context_tokens", &self.max_context_tokens)
            .field("first_byte_timeout_secs", &self.first_byte_timeout_secs)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("search", &self.search)
            .field("rate_limit", &self.rate_limit)
            .field("gateway", &self.gateway)
            .field("simulator", &self.simulator)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .field("model", &self.model)
            .finish()
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .field("max_results", &self.max_results)
            .field("search_depth", &self.search_depth)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// An OpenAI-compatible live provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier used for explicit overrides
    pub name: String,

    /// Base URL; `/chat/completions` is appended
    pub api_url: String,

    /// Literal API key (prefer `api_key_env`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model to request
    pub model: String,
}

impl ProviderConfig {
    pub fn new(name: &str, api_url: &str, model: &str, api_key_env: &str) -> Self {
        Self {
            name: name.into(),
            api_url: api_url.into(),
            api_key: None,
            api_key_env: Some(api_key_env.into()),
            model: model.into(),
        }
    }

    /// Resolve the API key from config, then the environment.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(&env_lookup)
    }

    /// Resolve the API key using a custom variable lookup.
    pub fn api_key_with(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
        resolve_secret(&self.api_key, &self.api_key_env, lookup)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(
        default = "default_search_key_env",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key_env: Option<String>,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_search_depth")]
    pub search_depth: String,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_search_url() -> String {
    "https://api.tavily.com/search".into()
}
fn default_search_key_env() -> Option<String> {
    Some("TAVILY_API_KEY".into())
}
fn default_max_results() -> usize {
    5
}
fn default_search_depth() -> String {
    "basic".into()
}
fn default_search_timeout() -> u64 {
    10
}

impl SearchConfig {
    /// Resolve the search credential; `None` disables search.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(&env_lookup)
    }

    pub fn api_key_with(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
        resolve_secret(&self.api_key, &self.api_key_env, lookup)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_url: default_search_url(),
            api_key: None,
            api_key_env: default_search_key_env(),
            max_results: default_max_results(),
            search_depth: default_search_depth(),
            timeout_secs: default_search_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> usize {
    20
}
fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origin for the browser client
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Require a matching `X-CSRF-Token` header and cookie on chat requests
    #[serde(default)]
    pub require_csrf: bool,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_cors_origin() -> String {
    "http://localhost:3000".into()
}
fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origin: default_cors_origin(),
            max_body_bytes: default_max_body_bytes(),
            require_csrf: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Lower bound of the per-character delay
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Upper bound of the per-character delay
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Intent rules, in match order. Empty = built-in rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intents: Vec<IntentRule>,
}

fn default_min_delay() -> u64 {
    5
}
fn default_max_delay() -> u64 {
    25
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            intents: vec![],
        }
    }
}

/// One simulator intent category.
///
/// A rule matches when any keyword is found in the user's text (multi-word
/// keywords as substrings, single words as whole words), or, with
/// `questions`, when the text ends in `?`. A rule with no keywords and
/// `questions = false` matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRule {
    pub name: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub questions: bool,

    /// Reply text; may use `{topic}`, `{code}` and `{search}`.
    pub template: String,
}

impl AppConfig {
    /// Load configuration from `KATENO_CONFIG` or the default path.
    ///
    /// Environment overrides:
    /// - `KATENO_PROVIDER`: preferred provider
    /// - `KATENO_HOST` / `KATENO_PORT`: gateway bind address
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("KATENO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(&env_lookup)?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(provider) = lookup("KATENO_PROVIDER").filter(|p| !p.trim().is_empty()) {
            self.preferred_provider = Some(provider.trim().to_string());
        }

        if let Some(host) = lookup("KATENO_HOST") {
            self.gateway.host = host;
        }

        if let Some(port) = lookup("KATENO_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("KATENO_PORT is not a valid port: {port}"))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kateno")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_context_tokens must be > 0".into(),
            ));
        }

        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_requests and rate_limit.window_secs must be > 0".into(),
            ));
        }

        if self.search.max_results == 0 || self.search.max_results > 20 {
            return Err(ConfigError::ValidationError(
                "search.max_results must be between 1 and 20".into(),
            ));
        }

        if self.simulator.min_delay_ms > self.simulator.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "simulator.min_delay_ms must not exceed simulator.max_delay_ms".into(),
            ));
        }

        for rule in &self.simulator.intents {
            if rule.template.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "simulator intent '{}' has an empty template",
                    rule.name
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if is_simulator(&provider.name) {
                return Err(ConfigError::ValidationError(format!(
                    "provider name '{}' is reserved for the offline simulator",
                    provider.name
                )));
            }
            if !seen.insert(provider.name.to_ascii_lowercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' is configured more than once",
                    provider.name
                )));
            }
        }

        Ok(())
    }

    /// Configured live providers, with the preferred one moved to the front.
    pub fn ordered_providers(&self) -> Vec<&ProviderConfig> {
        let mut ordered: Vec<&ProviderConfig> = self.providers.iter().collect();
        if let Some(preferred) = &self.preferred_provider {
            if let Some(pos) = ordered
                .iter()
                .position(|p| p.name.eq_ignore_ascii_case(preferred))
            {
                let p = ordered.remove(pos);
                ordered.insert(0, p);
            }
        }
        ordered
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            preferred_provider: None,
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            max_context_tokens: default_max_context_tokens(),
            first_byte_timeout_secs: default_first_byte_timeout(),
            system_prompt: None,
            search: SearchConfig::default(),
            rate_limit: RateLimitConfig::default(),
            gateway: GatewayConfig::default(),
            simulator: SimulatorConfig::default(),
            providers: default_providers(),
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// A literal secret wins over the environment; blank values count as unset.
fn resolve_secret(
    literal: &Option<String>,
    env_var: &Option<String>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    literal
        .clone()
        .or_else(|| env_var.as_deref().and_then(lookup))
        .filter(|key| !key.trim().is_empty())
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
