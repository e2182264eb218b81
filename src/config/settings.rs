// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Warden
//!
//! Handles loading and saving settings from ~/.warden/settings.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::llm::provider::ProviderId;
use crate::llm::reasoning::{GenerationSettings, ReasoningEffort};

mod io;
mod migration;
mod validation;

/// Main settings structure, stored in ~/.warden/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Per-provider credentials and endpoints
    #[serde(default)]
    pub providers: BTreeMap<ProviderId, ProviderConfig>,

    /// Defaults for new chats
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retry, backoff and timeout settings
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Multi-agent fan-out limits
    #[serde(default)]
    pub multi_agent: MultiAgentConfig,

    /// Branching behaviour
    #[serde(default)]
    pub branching: BranchingConfig,
}

/// Configuration for one provider
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for the API key, overriding the conventional one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Base URL for API (for proxies and self-hosted endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Default model to use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Default settings for new chats
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefaultsConfig {
    /// Provider for new chats
    #[serde(default = "default_provider")]
    pub provider: ProviderId,

    /// Model for new chats (falls back to the provider's default model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Reasoning level
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,

    /// Response token limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// System prompt for new chats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Retry and resilience configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResilienceConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (cap for backoff)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter percentage (0.0 to 1.0) for randomizing delays
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// TCP/TLS connect timeout
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Longest silence tolerated between stream chunks
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Multi-agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiAgentConfig {
    /// Most targets one turn may fan out to
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
}

/// Branching configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchingConfig {
    /// Generate a reply right away when branching from a user message
    #[serde(default = "default_true")]
    pub auto_generate: bool,
}

fn default_provider() -> ProviderId {
    ProviderId::OpenAi
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    16000
}

fn default_jitter() -> f64 {
    0.25
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_max_agents() -> usize {
    3
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            temperature: None,
            reasoning_effort: ReasoningEffort::default(),
            max_tokens: None,
            system_prompt: None,
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for MultiAgentConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
        }
    }
}

impl Default for BranchingConfig {
    fn default() -> Self {
        Self {
            auto_generate: default_true(),
        }
    }
}

impl DefaultsConfig {
    /// Generation settings for a new chat
    pub fn generation(&self) -> GenerationSettings {
        GenerationSettings {
            temperature: self.temperature,
            reasoning_effort: self.reasoning_effort,
            max_tokens: self.max_tokens,
        }
    }
}
