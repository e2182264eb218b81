// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Generation settings and the reasoning-effort mapping
//!
//! `ReasoningEffort` is provider-agnostic. `control_for` turns it into the
//! vendor's knob: a thinking-token budget, an effort keyword, or nothing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WardenError;
use crate::llm::provider::ProviderId;

/// Ordered reasoning level
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    #[default]
    Off,
    Low,
    Medium,
    High,
    ExtraHigh,
}

/// Provider-specific encoding of a reasoning level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningControl {
    /// Provider has no reasoning knob; send nothing
    Unsupported,
    /// Knob exists but reasoning is off; send nothing
    Disabled,
    /// Thinking token budget
    Budget(u32),
    /// Effort keyword
    Effort(&'static str),
}

impl ReasoningEffort {
    pub const ALL: [ReasoningEffort; 5] = [
        ReasoningEffort::Off,
        ReasoningEffort::Low,
        ReasoningEffort::Medium,
        ReasoningEffort::High,
        ReasoningEffort::ExtraHigh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Off => "off",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::ExtraHigh => "extra_high",
        }
    }

    /// Map this level to the provider's knob. Total over every pair.
    pub fn control_for(self, provider: ProviderId) -> ReasoningControl {
        use ReasoningControl::{Budget, Disabled, Effort, Unsupported};
        use ReasoningEffort::{ExtraHigh, High, Low, Medium, Off};

        match provider {
            ProviderId::DeepSeek | ProviderId::Mistral => Unsupported,
            _ if self == Off => Disabled,
            ProviderId::Anthropic => match self {
                Off => Disabled,
                Low => Budget(2_048),
                Medium => Budget(8_192),
                High => Budget(16_384),
                ExtraHigh => Budget(32_768),
            },
            ProviderId::Google => match self {
                Off => Disabled,
                Low => Budget(1_024),
                Medium => Budget(8_192),
                High => Budget(16_384),
                ExtraHigh => Budget(24_576),
            },
            // grok-3-mini only accepts low/high
            ProviderId::Xai => match self {
                Off => Disabled,
                Low | Medium => Effort("low"),
                High | ExtraHigh => Effort("high"),
            },
            ProviderId::OpenAi
            | ProviderId::OpenRouter
            | ProviderId::Groq
            | ProviderId::Perplexity
            | ProviderId::Ollama => match self {
                Off => Disabled,
                Low => Effort("low"),
                Medium => Effort("medium"),
                High | ExtraHigh => Effort("high"),
            },
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "off" | "none" => Ok(ReasoningEffort::Off),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            "extra_high" | "xhigh" => Ok(ReasoningEffort::ExtraHigh),
            other => Err(WardenError::InvalidInput(format!(
                "Unknown reasoning effort: {}",
                other
            ))),
        }
    }
}

/// Per-chat generation settings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Sampling temperature; `None` leaves the vendor default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Reasoning level
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,

    /// Response token limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationSettings {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_reasoning(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effort_is_ordered() {
        assert!(ReasoningEffort::Off < ReasoningEffort::Low);
        assert!(ReasoningEffort::Low < ReasoningEffort::Medium);
        assert!(ReasoningEffort::Medium < ReasoningEffort::High);
        assert!(ReasoningEffort::High < ReasoningEffort::ExtraHigh);
    }

    #[test]
    fn test_mapping_is_total_and_deterministic() {
        for provider in ProviderId::ALL {
            for effort in ReasoningEffort::ALL {
                let first = effort.control_for(provider);
                let second = effort.control_for(provider);
                assert_eq!(first, second, "{provider} / {effort}");
            }
        }
    }

    #[test]
    fn test_off_never_sends_a_knob() {
        for provider in ProviderId::ALL {
            let control = ReasoningEffort::Off.control_for(provider);
            assert!(matches!(
                control,
                ReasoningControl::Disabled | ReasoningControl::Unsupported
            ));
        }
    }

    #[test]
    fn test_budgets_grow_with_effort() {
        for provider in [ProviderId::Anthropic, ProviderId::Google] {
            let budgets: Vec<u32> = ReasoningEffort::ALL[1..]
                .iter()
                .map(|e| match e.control_for(provider) {
                    ReasoningControl::Budget(b) => b,
                    other => panic!("expected budget, got {:?}", other),
                })
                .collect();
            assert!(budgets.windows(2).all(|w| w[0] < w[1]), "{provider}");
        }
    }

    #[test]
    fn test_anthropic_budget_meets_minimum() {
        assert_eq!(
            ReasoningEffort::Low.control_for(ProviderId::Anthropic),
            ReasoningControl::Budget(2_048)
        );
    }

    #[test]
    fn test_keyword_providers() {
        assert_eq!(
            ReasoningEffort::Medium.control_for(ProviderId::OpenAi),
            ReasoningControl::Effort("medium")
        );
        assert_eq!(
            ReasoningEffort::ExtraHigh.control_for(ProviderId::OpenRouter),
            ReasoningControl::Effort("high")
        );
        assert_eq!(
            ReasoningEffort::Medium.control_for(ProviderId::Xai),
            ReasoningControl::Effort("low")
        );
    }

    #[test]
    fn test_unsupported_providers() {
        for effort in ReasoningEffort::ALL {
            assert_eq!(
                effort.control_for(ProviderId::DeepSeek),
                ReasoningControl::Unsupported
            );
            assert_eq!(
                effort.control_for(ProviderId::Mistral),
                ReasoningControl::Unsupported
            );
        }
    }

    #[test]
    fn test_effort_parse() {
        assert_eq!(
            "extra-high".parse::<ReasoningEffort>().unwrap(),
            ReasoningEffort::ExtraHigh
        );
        assert_eq!(
            "none".parse::<ReasoningEffort>().unwrap(),
            ReasoningEffort::Off
        );
        assert!("maximum".parse::<ReasoningEffort>().is_err());
    }

    #[test]
    fn test_settings_serde_defaults() {
        let settings: GenerationSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, GenerationSettings::default());

        let settings: GenerationSettings =
            serde_json::from_str(r#"{"temperature":0.3,"reasoning_effort":"high"}"#).unwrap();
        assert_eq!(settings.temperature, Some(0.3));
        assert_eq!(settings.reasoning_effort, ReasoningEffort::High);
    }
}
