// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{Result, WardenError};
use crate::llm::provider::ProviderId;

use super::Settings;

impl Settings {
    /// Get the API key for a provider, checking the env var first.
    pub fn api_key(&self, provider: ProviderId) -> Option<String> {
        let config = self.providers.get(&provider);
        let env_name = config
            .and_then(|c| c.api_key_env.as_deref())
            .or(provider.api_key_env());

        // Priority: env var > config file.
        env_name
            .and_then(|name| std::env::var(name).ok())
            .or_else(|| config.and_then(|c| c.api_key.clone()))
            .filter(|key| !key.trim().is_empty())
    }

    /// Whether the provider can be used as configured.
    pub fn is_provider_configured(&self, provider: ProviderId) -> bool {
        !provider.requires_api_key() || self.api_key(provider).is_some()
    }

    /// Providers that can be used right now, in display order
    pub fn configured_providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| self.is_provider_configured(*p))
            .collect()
    }

    /// Endpoint for a provider (override or vendor default)
    pub fn base_url(&self, provider: ProviderId) -> String {
        self.providers
            .get(&provider)
            .and_then(|c| c.base_url.clone())
            .unwrap_or_else(|| provider.default_base_url().to_string())
    }

    /// Model for a provider when the caller names none
    pub fn default_model(&self, provider: ProviderId) -> String {
        if provider == self.defaults.provider {
            if let Some(ref model) = self.defaults.model {
                return model.clone();
            }
        }
        self.providers
            .get(&provider)
            .and_then(|c| c.default_model.clone())
            .unwrap_or_else(|| provider.default_model().to_string())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if let Some(temperature) = self.defaults.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(WardenError::Config(format!(
                    "defaults.temperature must be within 0.0..=2.0, got {}",
                    temperature
                )));
            }
        }
        if self.defaults.max_tokens == Some(0) {
            return Err(WardenError::Config(
                "defaults.max_tokens must be greater than 0".to_string(),
            ));
        }

        let resilience = &self.resilience;
        if !(0.0..=1.0).contains(&resilience.jitter) {
            return Err(WardenError::Config(format!(
                "resilience.jitter must be within 0.0..=1.0, got {}",
                resilience.jitter
            )));
        }
        if resilience.base_delay_ms > resilience.max_delay_ms {
            return Err(WardenError::Config(format!(
                "resilience.base_delay_ms ({}) exceeds max_delay_ms ({})",
                resilience.base_delay_ms, resilience.max_delay_ms
            )));
        }
        if resilience.connect_timeout_secs == 0 || resilience.idle_timeout_secs == 0 {
            return Err(WardenError::Config(
                "resilience timeouts must be greater than 0".to_string(),
            ));
        }

        if !(1..=10).contains(&self.multi_agent.max_agents) {
            return Err(WardenError::Config(format!(
                "multi_agent.max_agents must be within 1..=10, got {}",
                self.multi_agent.max_agents
            )));
        }

        for (provider, config) in &self.providers {
            if let Some(ref url) = config.base_url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(WardenError::Config(format!(
                        "providers.{}.base_url must be an http(s) URL, got {}",
                        provider, url
                    )));
                }
            }
        }

        Ok(())
    }
}
