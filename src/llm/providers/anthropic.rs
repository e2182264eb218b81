// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Messages API adapter

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ApiError, Result, WardenError};
use crate::llm::decoder::{DecoderState, Frame, Framing};
use crate::llm::message::{prepare_history, system_text, Role};
use crate::llm::provider::{
    CompletionRequest, FinishReason, ModelCapabilities, ProviderAdapter, ProviderId, StreamEvent,
    WireRequest,
};
use crate::llm::providers::common::{join_url, parse_error_body, stream_error_kind};
use crate::llm::reasoning::ReasoningControl;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory on this API
const DEFAULT_MAX_TOKENS: u32 = 4_096;

/// Retry-After default for `rate_limit_error` bodies
const DEFAULT_RATE_LIMIT_SECS: u64 = 10;

/// Anthropic adapter
pub struct AnthropicAdapter {
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    /// Create a new Anthropic adapter
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ProviderId::Anthropic.default_base_url().to_string(),
        }
    }

    /// Create with a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn authorize(&self, request: WireRequest) -> WireRequest {
        request
            .with_header("x-api-key", &self.api_key)
            .with_header("anthropic-version", ANTHROPIC_VERSION)
    }

    /// Convert canonical history to Anthropic messages (system goes top-level)
    fn convert_messages(&self, request: &CompletionRequest) -> Vec<AnthropicMessage> {
        prepare_history(&request.history, &request.model)
            .into_iter()
            .filter_map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => return None,
                };
                Some(AnthropicMessage {
                    role,
                    content: m.body.clone(),
                })
            })
            .collect()
    }
}

/// Models accepting extended thinking
fn supports_thinking(model: &str) -> bool {
    ["claude-3-7", "sonnet-4", "opus-4", "haiku-4"]
        .iter()
        .any(|family| model.contains(family))
}

impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn framing(&self) -> Framing {
        Framing::Sse
    }

    fn capabilities(&self, model: &str) -> ModelCapabilities {
        ModelCapabilities {
            temperature: true,
            reasoning: supports_thinking(model),
            tools: true,
        }
    }

    fn encode(&self, request: &CompletionRequest) -> Result<WireRequest> {
        let caps = self.capabilities(&request.model);
        let settings = &request.settings;

        let thinking_budget = if caps.reasoning {
            match settings.reasoning_effort.control_for(ProviderId::Anthropic) {
                ReasoningControl::Budget(budget) => Some(budget),
                _ => None,
            }
        } else {
            None
        };

        let mut max_tokens = settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        if let Some(budget) = thinking_budget {
            if max_tokens <= budget {
                max_tokens = budget + DEFAULT_MAX_TOKENS;
            }
        }

        let mut body = json!({
            "model": request.model,
            "messages": self.convert_messages(request),
            "max_tokens": max_tokens,
            "stream": true,
        });

        if let Some(system) = system_text(request.system.as_deref(), &request.history) {
            body["system"] = json!(system);
        }

        match thinking_budget {
            Some(budget) => {
                body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
            }
            None => {
                if let Some(temperature) = settings.temperature {
                    body["temperature"] = json!(temperature);
                }
            }
        }

        if !request.tools.is_empty() {
            let tools: Vec<AnthropicTool> = request
                .tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect();
            body["tools"] = json!(tools);
        }

        Ok(self.authorize(WireRequest::post(
            join_url(&self.base_url, "messages"),
            body,
        )))
    }

    fn decode_frame(&self, frame: &Frame, state: &mut DecoderState) -> Vec<StreamEvent> {
        let parsed: Value = match serde_json::from_str(&frame.data) {
            Ok(value) => value,
            Err(e) => {
                return vec![StreamEvent::decode_error(format!(
                    "{}: {}",
                    e, frame.data
                ))]
            }
        };

        let event_type = parsed["type"]
            .as_str()
            .or(frame.event.as_deref())
            .unwrap_or_default();

        match event_type {
            "content_block_start" => {
                let index = parsed["index"].as_u64().unwrap_or(0);
                let block = &parsed["content_block"];
                match block["type"].as_str() {
                    Some("tool_use" | "server_tool_use") => {
                        let Some(id) = block["id"].as_str() else {
                            return vec![StreamEvent::decode_error("tool_use block without id")];
                        };
                        state.tools.bind(index, id);
                        vec![StreamEvent::ToolCallDelta {
                            id: id.to_string(),
                            name: block["name"].as_str().map(str::to_string),
                            arguments: None,
                        }]
                    }
                    Some("web_search_tool_result") => {
                        let id = block["tool_use_id"].as_str().unwrap_or_default();
                        let content = &block["content"];
                        let success =
                            content["type"].as_str() != Some("web_search_tool_result_error");
                        vec![StreamEvent::ToolCallResult {
                            id: id.to_string(),
                            success,
                            payload: Some(content.to_string()),
                        }]
                    }
                    Some("text") => block["text"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| StreamEvent::TextDelta(t.to_string()))
                        .into_iter()
                        .collect(),
                    _ => Vec::new(),
                }
            }
            "content_block_delta" => {
                let index = parsed["index"].as_u64().unwrap_or(0);
                let delta = &parsed["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => delta["text"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| StreamEvent::TextDelta(t.to_string()))
                        .into_iter()
                        .collect(),
                    Some("thinking_delta") => delta["thinking"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| StreamEvent::ReasoningDelta(t.to_string()))
                        .into_iter()
                        .collect(),
                    Some("input_json_delta") => {
                        let fragment = delta["partial_json"].as_str().unwrap_or_default();
                        match state.tools.id_for(index) {
                            Some(id) if !fragment.is_empty() => {
                                vec![StreamEvent::ToolCallDelta {
                                    id: id.to_string(),
                                    name: None,
                                    arguments: Some(fragment.to_string()),
                                }]
                            }
                            Some(_) => Vec::new(),
                            None => vec![StreamEvent::decode_error(format!(
                                "input_json_delta for unknown block {}",
                                index
                            ))],
                        }
                    }
                    // signature_delta, citations_delta
                    _ => Vec::new(),
                }
            }
            "message_delta" => {
                if let Some(reason) = parsed["delta"]["stop_reason"].as_str() {
                    state.pending_finish = Some(FinishReason::from_vendor(reason));
                }
                Vec::new()
            }
            "message_stop" => state
                .take_finish(FinishReason::Stop)
                .map(StreamEvent::Finish)
                .into_iter()
                .collect(),
            "error" => {
                let error = &parsed["error"];
                vec![StreamEvent::Error {
                    kind: stream_error_kind(error["type"].as_str()),
                    message: error["message"]
                        .as_str()
                        .unwrap_or("stream error")
                        .to_string(),
                }]
            }
            // message_start, content_block_stop, ping
            _ => Vec::new(),
        }
    }

    fn models_request(&self) -> Result<WireRequest> {
        Ok(self.authorize(WireRequest::get(join_url(&self.base_url, "models"))))
    }

    fn parse_models(&self, body: &str) -> Result<Vec<String>> {
        let listing: ModelList = serde_json::from_str(body)
            .map_err(|e| WardenError::Api(ApiError::Decode(e.to_string())))?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }

    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
        match serde_json::from_str::<AnthropicError>(body) {
            Ok(error) => match error.error.error_type.as_str() {
                "authentication_error" | "permission_error" => {
                    ApiError::Unauthorized(error.error.message)
                }
                "rate_limit_error" => rate_limited(retry_after),
                "not_found_error" => ApiError::ModelNotFound(error.error.message),
                _ => ApiError::ServerError {
                    status,
                    message: error.error.message,
                },
            },
            Err(_) if status == 429 => rate_limited(retry_after),
            Err(_) => parse_error_body(status, body, retry_after),
        }
    }
}

fn rate_limited(retry_after: Option<u64>) -> ApiError {
    ApiError::RateLimited(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_SECS).min(u32::MAX as u64) as u32)
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}
