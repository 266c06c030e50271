//! Provider registry.
//!
//! The registry is an ordinary value: whoever builds it hands it to the chat
//! service, so tests and embedders can hold several side by side.

use crate::{
    anthropic::AnthropicProvider, error::ProviderError, family::ProviderFamily,
    openai::OpenAiProvider, BoxedChatProvider, ProviderResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Settings for one configured provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Wire dialect.
    pub family: ProviderFamily,
    /// API key (supports `{env:VAR}` substitution in config files).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override for compatible endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model to request.
    pub model: String,
    /// Use the streaming endpoint.
    #[serde(default = "default_streaming")]
    pub streaming: bool,
}

fn default_streaming() -> bool {
    true
}

impl ProviderConfig {
    /// Build the provider these settings describe.
    pub fn build(&self, id: &str) -> ProviderResult<BoxedChatProvider> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::missing_api_key(id))?;

        let provider: BoxedChatProvider = match self.family {
            ProviderFamily::OpenAi => {
                let provider = match self.base_url.as_deref() {
                    Some(url) => OpenAiProvider::with_base_url(id, api_key, url, &self.model)?,
                    None => OpenAiProvider::new(id, api_key, &self.model)?,
                };
                Arc::new(provider.with_streaming(self.streaming))
            }
            ProviderFamily::Anthropic => {
                let provider = match self.base_url.as_deref() {
                    Some(url) => AnthropicProvider::with_base_url(id, api_key, url, &self.model)?,
                    None => AnthropicProvider::new(id, api_key, &self.model)?,
                };
                Arc::new(provider.with_streaming(self.streaming))
            }
        };

        Ok(provider)
    }
}

/// Providers addressable by id.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, BoxedChatProvider>,
    default: Option<String>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .field("default", &self.default)
            .finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured providers.
    ///
    /// `default` names the provider used when a request does not pick one;
    /// with a single configured provider that provider is the default.
    pub fn from_config(
        providers: &HashMap<String, ProviderConfig>,
        default: Option<&str>,
    ) -> ProviderResult<Self> {
        let mut registry = Self::new();
        for (id, config) in providers {
            registry.register(config.build(id)?);
        }

        match default {
            Some(id) => registry.set_default(id)?,
            None if registry.providers.len() == 1 => {
                registry.default = registry.providers.keys().next().cloned();
            }
            None => {}
        }

        info!(
            providers = registry.providers.len(),
            default = ?registry.default,
            "Provider registry ready"
        );
        Ok(registry)
    }

    /// Register a provider under its own id, replacing any previous one.
    pub fn register(&mut self, provider: BoxedChatProvider) {
        let id = provider.provider_id().to_string();
        debug!(provider = %id, family = %provider.family(), "Registering provider");
        self.providers.insert(id, provider);
    }

    /// Builder-style [`ProviderRegistry::register`].
    pub fn with_provider(mut self, provider: BoxedChatProvider) -> Self {
        self.register(provider);
        self
    }

    /// Pick the provider used when none is requested.
    pub fn set_default(&mut self, id: &str) -> ProviderResult<()> {
        if !self.providers.contains_key(id) {
            return Err(ProviderError::UnknownProvider(id.to_string()));
        }
        self.default = Some(id.to_string());
        Ok(())
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &str) -> Option<BoxedChatProvider> {
        self.providers.get(id).cloned()
    }

    /// The default provider, if one is set.
    pub fn default_provider(&self) -> Option<BoxedChatProvider> {
        self.default.as_deref().and_then(|id| self.get(id))
    }

    /// Resolve a requested id, falling back to the default.
    pub fn resolve(&self, id: Option<&str>) -> ProviderResult<BoxedChatProvider> {
        match id {
            Some(id) => self
                .get(id)
                .ok_or_else(|| ProviderError::UnknownProvider(id.to_string())),
            None => self
                .default_provider()
                .ok_or(ProviderError::NoDefaultProvider),
        }
    }

    /// Registered provider ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
