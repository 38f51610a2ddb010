//! Provider registry: resolves provider names and builds fallback chains.
//!
//! Live providers are kept in preference order; the simulator is held apart
//! and always appended last, so every chain the registry builds ends in a
//! provider that cannot fail.

use std::sync::Arc;
use std::time::Duration;

use kateno_config::AppConfig;
use kateno_core::error::ChatError;
use kateno_core::provider::{Provider, ProviderDescriptor, is_simulator};
use tracing::debug;

use crate::fallback::FallbackChain;
use crate::openai_compat::OpenAiCompatProvider;
use crate::simulator::SimulatorProvider;

/// A live provider and whether its credentials were found.
struct RegisteredProvider {
    provider: Arc<dyn Provider>,
    available: bool,
}

/// Routes requests to the configured providers.
pub struct ProviderRegistry {
    live: Vec<RegisteredProvider>,
    simulator: Arc<dyn Provider>,
    first_byte_timeout: Duration,
}

impl ProviderRegistry {
    /// Create a registry holding only the simulator.
    pub fn new(simulator: Arc<dyn Provider>, first_byte_timeout: Duration) -> Self {
        Self {
            live: Vec::new(),
            simulator,
            first_byte_timeout,
        }
    }

    /// Register a live provider after those already registered.
    pub fn register(&mut self, provider: Arc<dyn Provider>, available: bool) {
        self.live.push(RegisteredProvider {
            provider,
            available,
        });
    }

    /// Build the registry from configuration, reading keys from the environment.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::from_config_with(config, &|key: &str| std::env::var(key).ok())
    }

    /// Build the registry resolving keys through `lookup`.
    pub fn from_config_with(
        config: &AppConfig,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let simulator: Arc<dyn Provider> =
            Arc::new(SimulatorProvider::new(config.simulator.clone()));
        let mut registry = Self::new(
            simulator,
            Duration::from_secs(config.first_byte_timeout_secs),
        );

        let client = reqwest::Client::new();
        for provider_config in config.ordered_providers() {
            let api_key = provider_config.api_key_with(lookup);
            let available = api_key.is_some();
            let provider = OpenAiCompatProvider::new(
                &provider_config.name,
                &provider_config.api_url,
                api_key.unwrap_or_default(),
                &provider_config.model,
            )
            .with_client(client.clone());

            debug!(provider = %provider_config.name, available, "Registered provider");
            registry.register(Arc::new(provider), available);
        }

        registry
    }

    /// Providers in preference order, simulator last and always available.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.live
            .iter()
            .map(|entry| ProviderDescriptor {
                name: entry.provider.name().to_string(),
                available: entry.available,
                model: entry.provider.model().to_string(),
            })
            .chain(std::iter::once(ProviderDescriptor {
                name: self.simulator.name().to_string(),
                available: true,
                model: self.simulator.model().to_string(),
            }))
            .collect()
    }

    /// The provider used when the caller names none.
    pub fn active(&self) -> Arc<dyn Provider> {
        self.live
            .iter()
            .find(|entry| entry.available)
            .map(|entry| entry.provider.clone())
            .unwrap_or_else(|| self.simulator.clone())
    }

    /// Look up a provider by name (case-insensitive, simulator aliases included).
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        if is_simulator(name) {
            return Some(self.simulator.clone());
        }
        self.live
            .iter()
            .find(|entry| entry.provider.name().eq_ignore_ascii_case(name))
            .map(|entry| entry.provider.clone())
    }

    /// The provider a request would start on.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Provider>, ChatError> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => self
                .get(name)
                .ok_or_else(|| ChatError::UnsupportedProvider(name.to_string())),
            None => Ok(self.active()),
        }
    }

    /// The fallback chain for a request.
    ///
    /// Without an override the chain is every available live provider in
    /// preference order. An override pins the chain to that provider. The
    /// simulator always ends the chain.
    pub fn chain_for(&self, name: Option<&str>) -> Result<FallbackChain, ChatError> {
        let first = self.resolve(name)?;
        let explicit = name.map(str::trim).is_some_and(|n| !n.is_empty());

        let mut chain = FallbackChain::new();
        if is_simulator(first.name()) {
            return Ok(chain.add(self.simulator.clone(), self.first_byte_timeout));
        }

        chain = chain.add(first.clone(), self.first_byte_timeout);
        if !explicit {
            for entry in self.live.iter().filter(|e| e.available) {
                if !Arc::ptr_eq(&entry.provider, &first) {
                    chain = chain.add(entry.provider.clone(), self.first_byte_timeout);
                }
            }
        }

        Ok(chain.add(self.simulator.clone(), self.first_byte_timeout))
    }
}
