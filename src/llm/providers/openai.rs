// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI-compatible chat-completions adapter
//!
//! One adapter serves every vendor speaking the `/chat/completions` SSE dialect:
//! OpenAI, xAI, Perplexity, DeepSeek, Groq, OpenRouter and Mistral. Per-vendor
//! quirks (reasoning field, token limit field, extra headers) hang off the
//! provider id.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ApiError, Result, WardenError};
use crate::llm::decoder::{DecoderState, Frame, Framing};
use crate::llm::message::{prepare_history, system_text, Role};
use crate::llm::provider::{
    CompletionRequest, FinishReason, ModelCapabilities, ProviderAdapter, ProviderId, StreamEvent,
    WireRequest,
};
use crate::llm::providers::common::{join_url, parse_error_body, parse_frame, stream_error_kind};
use crate::llm::reasoning::ReasoningControl;

/// Perplexity has no listing endpoint
const PERPLEXITY_MODELS: &[&str] = &[
    "sonar",
    "sonar-pro",
    "sonar-reasoning",
    "sonar-reasoning-pro",
    "sonar-deep-research",
];

/// Adapter for the OpenAI chat-completions dialect
pub struct OpenAiCompatAdapter {
    provider: ProviderId,
    api_key: String,
    base_url: String,
    site_url: Option<String>,
    site_name: Option<String>,
}

impl OpenAiCompatAdapter {
    /// Create an adapter for `provider` against its default endpoint
    pub fn new(provider: ProviderId, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: provider.default_base_url().to_string(),
            site_url: None,
            site_name: (provider == ProviderId::OpenRouter).then(|| "Warden".to_string()),
        }
    }

    /// Create with a custom base URL
    pub fn with_base_url(
        provider: ProviderId,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::new(provider, api_key)
        }
    }

    /// Set the site URL for OpenRouter rankings
    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self
    }

    /// Set the site name for OpenRouter rankings
    pub fn with_site_name(mut self, name: impl Into<String>) -> Self {
        self.site_name = Some(name.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, mut request: WireRequest) -> WireRequest {
        request = request.with_header("authorization", format!("Bearer {}", self.api_key));
        if self.provider == ProviderId::OpenRouter {
            if let Some(ref site_url) = self.site_url {
                request = request.with_header("HTTP-Referer", site_url);
            }
            if let Some(ref site_name) = self.site_name {
                request = request.with_header("X-Title", site_name);
            }
        }
        request
    }

    fn sends_usage(&self) -> bool {
        matches!(
            self.provider,
            ProviderId::OpenAi | ProviderId::OpenRouter | ProviderId::Groq
        )
    }

    /// Convert canonical history to chat-completions messages
    fn convert_messages(&self, request: &CompletionRequest) -> Vec<ChatMessage> {
        let mut result = Vec::new();

        if let Some(system) = system_text(request.system.as_deref(), &request.history) {
            result.push(ChatMessage {
                role: "system",
                content: system,
            });
        }

        for m in prepare_history(&request.history, &request.model) {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => continue,
            };
            result.push(ChatMessage {
                role,
                content: m.body.clone(),
            });
        }

        result
    }
}

/// Strip an OpenRouter-style `vendor/` prefix
fn bare_model(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

/// o-series and gpt-5 models reject temperature and take `max_completion_tokens`
fn is_openai_reasoning_model(model: &str) -> bool {
    let model = bare_model(model);
    ["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn id(&self) -> ProviderId {
        self.provider
    }

    fn framing(&self) -> Framing {
        Framing::Sse
    }

    fn capabilities(&self, model: &str) -> ModelCapabilities {
        let bare = bare_model(model);
        match self.provider {
            ProviderId::OpenAi => {
                let reasoning = is_openai_reasoning_model(model);
                ModelCapabilities {
                    temperature: !reasoning,
                    reasoning,
                    tools: true,
                }
            }
            ProviderId::OpenRouter => ModelCapabilities {
                temperature: true,
                reasoning: true,
                tools: true,
            },
            ProviderId::Xai => ModelCapabilities {
                temperature: true,
                reasoning: bare.starts_with("grok-3-mini"),
                tools: true,
            },
            ProviderId::Groq => ModelCapabilities {
                temperature: true,
                reasoning: bare.contains("qwen3") || bare.contains("gpt-oss"),
                tools: true,
            },
            ProviderId::Perplexity => ModelCapabilities {
                temperature: true,
                reasoning: bare.contains("deep-research"),
                tools: false,
            },
            ProviderId::DeepSeek => {
                let reasoner = bare.contains("reasoner");
                ModelCapabilities {
                    temperature: !reasoner,
                    reasoning: false,
                    tools: !reasoner,
                }
            }
            _ => ModelCapabilities::default(),
        }
    }

    fn encode(&self, request: &CompletionRequest) -> Result<WireRequest> {
        let caps = self.capabilities(&request.model);
        let settings = &request.settings;

        let mut body = json!({
            "model": request.model,
            "messages": self.convert_messages(request),
            "stream": true,
        });

        if self.sends_usage() {
            body["stream_options"] = json!({ "include_usage": true });
        }

        if caps.temperature {
            if let Some(temperature) = settings.temperature {
                body["temperature"] = json!(temperature);
            }
        }

        if caps.reasoning {
            match settings.reasoning_effort.control_for(self.provider) {
                ReasoningControl::Effort(effort) if self.provider == ProviderId::OpenRouter => {
                    body["reasoning"] = json!({ "effort": effort });
                }
                ReasoningControl::Effort(effort) => {
                    body["reasoning_effort"] = json!(effort);
                }
                ReasoningControl::Budget(budget) if self.provider == ProviderId::OpenRouter => {
                    body["reasoning"] = json!({ "max_tokens": budget });
                }
                ReasoningControl::Budget(_)
                | ReasoningControl::Disabled
                | ReasoningControl::Unsupported => {}
            }
        }

        if let Some(max_tokens) = settings.max_tokens {
            if self.provider == ProviderId::OpenAi && is_openai_reasoning_model(&request.model) {
                body["max_completion_tokens"] = json!(max_tokens);
            } else {
                body["max_tokens"] = json!(max_tokens);
            }
        }

        if caps.tools && !request.tools.is_empty() {
            let tools: Vec<_> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        Ok(self.authorize(WireRequest::post(
            join_url(&self.base_url, "chat/completions"),
            body,
        )))
    }

    fn decode_frame(&self, frame: &Frame, state: &mut DecoderState) -> Vec<StreamEvent> {
        let data = frame.data.trim();
        if data == "[DONE]" {
            return state
                .take_finish(FinishReason::Stop)
                .map(StreamEvent::Finish)
                .into_iter()
                .collect();
        }

        let chunk: StreamChunk = match parse_frame(data) {
            Ok(chunk) => chunk,
            Err(event) => return vec![event],
        };

        if let Some(error) = chunk.error {
            return vec![StreamEvent::Error {
                kind: stream_error_kind(error.code_str().as_deref()),
                message: error.message.unwrap_or_else(|| "stream error".to_string()),
            }];
        }

        let mut events = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(delta) = choice.delta {
            let reasoning = delta.reasoning_content.or(delta.reasoning);
            if let Some(text) = reasoning.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::ReasoningDelta(text));
            }

            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta(text));
            }

            for tc in delta.tool_calls.unwrap_or_default() {
                let index = tc.index.unwrap_or(0);
                let id = match tc.id.filter(|id| !id.is_empty()) {
                    Some(id) => {
                        state.tools.bind(index, id.clone());
                        id
                    }
                    None => match state.tools.id_for(index) {
                        Some(id) => id.to_string(),
                        None => {
                            let id = state.tools.next_id("call");
                            state.tools.bind(index, id.clone());
                            id
                        }
                    },
                };
                let (name, arguments) = match tc.function {
                    Some(f) => (
                        f.name.filter(|n| !n.is_empty()),
                        f.arguments.filter(|a| !a.is_empty()),
                    ),
                    None => (None, None),
                };
                if name.is_some() || arguments.is_some() {
                    events.push(StreamEvent::ToolCallDelta {
                        id,
                        name,
                        arguments,
                    });
                }
            }
        }

        if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
            state.pending_finish = Some(FinishReason::from_vendor(&reason));
        }

        events
    }

    fn finish_stream(&self, state: &mut DecoderState) -> Vec<StreamEvent> {
        // Some compatible servers stop after finish_reason without [DONE]
        if state.pending_finish.is_some() {
            if let Some(reason) = state.take_finish(FinishReason::Stop) {
                return vec![StreamEvent::Finish(reason)];
            }
        }
        Vec::new()
    }

    fn models_request(&self) -> Result<WireRequest> {
        if self.provider == ProviderId::Perplexity {
            return Err(WardenError::InvalidInput(
                "perplexity has no model listing endpoint".to_string(),
            ));
        }
        Ok(self.authorize(WireRequest::get(join_url(&self.base_url, "models"))))
    }

    fn static_models(&self) -> Option<Vec<String>> {
        (self.provider == ProviderId::Perplexity)
            .then(|| PERPLEXITY_MODELS.iter().map(|m| m.to_string()).collect())
    }

    fn parse_models(&self, body: &str) -> Result<Vec<String>> {
        let listing: ModelList = serde_json::from_str(body)
            .map_err(|e| WardenError::Api(ApiError::Decode(e.to_string())))?;
        let mut models: Vec<String> = listing.data.into_iter().map(|m| m.id).collect();
        models.sort();
        Ok(models)
    }

    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
        parse_error_body(status, body, retry_after)
    }
}

// Chat-completions wire types

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: Option<u64>,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: Option<String>,
    code: Option<serde_json::Value>,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

impl StreamError {
    fn code_str(&self) -> Option<String> {
        self.code
            .as_ref()
            .and_then(|c| c.as_str().map(str::to_string))
            .or_else(|| self.error_type.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}
