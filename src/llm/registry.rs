// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Adapter registry keyed by provider id
//!
//! Built once from settings; sessions resolve their adapter here instead of
//! matching on vendor names.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::{Result, WardenError};
use crate::llm::provider::{ProviderAdapter, ProviderId};
use crate::llm::providers::{AnthropicAdapter, GeminiAdapter, OllamaAdapter, OpenAiCompatAdapter};

/// Adapters available to the engine
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<ProviderId, Arc<dyn ProviderAdapter>>,
    /// Why a provider has no adapter, for error messages
    missing: BTreeMap<ProviderId, String>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an adapter for every provider the settings make usable
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new();
        for provider in ProviderId::ALL {
            match Self::create(provider, settings) {
                Ok(adapter) => registry.insert(adapter),
                Err(reason) => {
                    tracing::debug!(
                        target: "warden.registry",
                        provider = %provider,
                        reason = %reason,
                        "provider not available"
                    );
                    registry.missing.insert(provider, reason.to_string());
                }
            }
        }
        registry
    }

    /// Create the adapter for one provider
    pub fn create(provider: ProviderId, settings: &Settings) -> Result<Arc<dyn ProviderAdapter>> {
        let base_url = settings.base_url(provider);
        if provider == ProviderId::Ollama {
            return Ok(Arc::new(OllamaAdapter::with_base_url(base_url)));
        }

        let api_key = settings.api_key(provider).ok_or_else(|| {
            let env = settings
                .providers
                .get(&provider)
                .and_then(|c| c.api_key_env.clone())
                .or_else(|| provider.api_key_env().map(str::to_string))
                .unwrap_or_default();
            WardenError::Config(format!(
                "No API key found for {}. Set {} or add providers.{}.api_key to settings.",
                provider, env, provider
            ))
        })?;

        let adapter: Arc<dyn ProviderAdapter> = match provider {
            ProviderId::Anthropic => Arc::new(AnthropicAdapter::with_base_url(api_key, base_url)),
            ProviderId::Google => Arc::new(GeminiAdapter::with_base_url(api_key, base_url)),
            other => Arc::new(OpenAiCompatAdapter::with_base_url(other, api_key, base_url)),
        };
        Ok(adapter)
    }

    /// Register (or replace) an adapter under its own id
    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let id = adapter.id();
        self.missing.remove(&id);
        self.adapters.insert(id, adapter);
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    /// Resolve the adapter for a provider
    pub fn get(&self, provider: ProviderId) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned().ok_or_else(|| {
            WardenError::Config(
                self.missing
                    .get(&provider)
                    .cloned()
                    .unwrap_or_else(|| format!("Provider {} is not configured", provider)),
            )
        })
    }

    pub fn contains(&self, provider: ProviderId) -> bool {
        self.adapters.contains_key(&provider)
    }

    /// Providers with an adapter, in display order
    pub fn providers(&self) -> Vec<ProviderId> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn keyed(provider: ProviderId, key: &str) -> ProviderConfig {
        ProviderConfig {
            api_key: Some(key.to_string()),
            api_key_env: Some(format!("WARDEN_TEST_UNSET_{}", provider.as_str().to_uppercase())),
            ..ProviderConfig::default()
        }
    }

    fn isolated_settings() -> Settings {
        let mut settings = Settings::default();
        for provider in ProviderId::ALL {
            if provider.requires_api_key() {
                settings.providers.insert(
                    provider,
                    ProviderConfig {
                        api_key_env: Some(format!(
                            "WARDEN_TEST_UNSET_{}",
                            provider.as_str().to_uppercase()
                        )),
                        ..ProviderConfig::default()
                    },
                );
            }
        }
        settings
    }

    #[test]
    fn test_only_keyless_provider_without_keys() {
        let registry = AdapterRegistry::from_settings(&isolated_settings());
        assert_eq!(registry.providers(), vec![ProviderId::Ollama]);
    }

    #[test]
    fn test_missing_key_error_names_env_var() {
        let registry = AdapterRegistry::from_settings(&isolated_settings());
        let err = registry.get(ProviderId::Anthropic).err().unwrap();
        assert!(err.to_string().contains("WARDEN_TEST_UNSET_ANTHROPIC"));
    }

    #[test]
    fn test_adapter_ids_match_providers() {
        let mut settings = isolated_settings();
        settings
            .providers
            .insert(ProviderId::Anthropic, keyed(ProviderId::Anthropic, "a"));
        settings
            .providers
            .insert(ProviderId::Google, keyed(ProviderId::Google, "g"));
        settings
            .providers
            .insert(ProviderId::Mistral, keyed(ProviderId::Mistral, "m"));

        let registry = AdapterRegistry::from_settings(&settings);
        for provider in [
            ProviderId::Anthropic,
            ProviderId::Google,
            ProviderId::Mistral,
            ProviderId::Ollama,
        ] {
            assert_eq!(registry.get(provider).unwrap().id(), provider);
        }
        assert!(!registry.contains(ProviderId::OpenAi));
    }

    #[test]
    fn test_insert_replaces_missing_entry() {
        let mut registry = AdapterRegistry::from_settings(&isolated_settings());
        assert!(registry.get(ProviderId::Groq).is_err());
        registry.insert(Arc::new(OpenAiCompatAdapter::new(ProviderId::Groq, "k")));
        assert!(registry.get(ProviderId::Groq).is_ok());
    }
}
