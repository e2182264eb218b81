// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Ollama local model adapter
//!
//! Speaks Ollama's `/api/chat` endpoint, which streams one JSON object per line.
//! Tool calls arrive whole, never as fragments.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ApiError, ErrorKind, Result, WardenError};
use crate::llm::decoder::{DecoderState, Frame, Framing};
use crate::llm::message::{prepare_history, system_text, Role};
use crate::llm::provider::{
    CompletionRequest, FinishReason, ModelCapabilities, ProviderAdapter, ProviderId, StreamEvent,
    WireRequest,
};
use crate::llm::providers::common::{join_url, parse_frame, status_error};
use crate::llm::reasoning::ReasoningControl;

/// Ollama adapter
pub struct OllamaAdapter {
    base_url: String,
}

impl OllamaAdapter {
    /// Create an adapter against the default local daemon
    pub fn new() -> Self {
        Self {
            base_url: ProviderId::Ollama.default_base_url().to_string(),
        }
    }

    /// Create with a custom base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn convert_messages(&self, request: &CompletionRequest) -> Vec<OllamaMessage> {
        let mut result = Vec::new();
        if let Some(system) = system_text(request.system.as_deref(), &request.history) {
            result.push(OllamaMessage {
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
            result.push(OllamaMessage {
                role,
                content: m.body.clone(),
            });
        }
        result
    }
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Model families that accept the `think` flag
fn supports_thinking(model: &str) -> bool {
    ["qwen3", "deepseek-r1", "gpt-oss", "magistral"]
        .iter()
        .any(|family| model.starts_with(family))
}

impl ProviderAdapter for OllamaAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }

    fn framing(&self) -> Framing {
        Framing::NdJson
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

        let mut body = json!({
            "model": request.model,
            "messages": self.convert_messages(request),
            "stream": true,
        });

        let mut options = json!({});
        if let Some(temperature) = settings.temperature {
            options["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = settings.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        if options.as_object().is_some_and(|o| !o.is_empty()) {
            body["options"] = options;
        }

        if caps.reasoning {
            match settings.reasoning_effort.control_for(ProviderId::Ollama) {
                // gpt-oss takes a level, the others a switch
                ReasoningControl::Effort(effort) if request.model.starts_with("gpt-oss") => {
                    body["think"] = json!(effort);
                }
                ReasoningControl::Effort(_) | ReasoningControl::Budget(_) => {
                    body["think"] = json!(true);
                }
                ReasoningControl::Disabled => body["think"] = json!(false),
                ReasoningControl::Unsupported => {}
            }
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
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

        Ok(WireRequest::post(join_url(&self.base_url, "api/chat"), body))
    }

    fn decode_frame(&self, frame: &Frame, state: &mut DecoderState) -> Vec<StreamEvent> {
        let chunk: OllamaStreamResponse = match parse_frame(&frame.data) {
            Ok(chunk) => chunk,
            Err(event) => return vec![event],
        };

        if let Some(error) = chunk.error {
            return vec![StreamEvent::Error {
                kind: ErrorKind::ServerError,
                message: error,
            }];
        }

        let mut events = Vec::new();
        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::ReasoningDelta(thinking));
            }
            if let Some(content) = message.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta(content));
            }
            for call in message.tool_calls.unwrap_or_default() {
                events.push(StreamEvent::ToolCallDelta {
                    id: state.tools.next_id("ollama_call"),
                    name: Some(call.function.name),
                    arguments: Some(call.function.arguments.to_string()),
                });
            }
        }

        if chunk.done {
            let reason = chunk
                .done_reason
                .as_deref()
                .map(FinishReason::from_vendor)
                .unwrap_or(FinishReason::Stop);
            if let Some(reason) = state.take_finish(reason) {
                events.push(StreamEvent::Finish(reason));
            }
        }

        events
    }

    fn models_request(&self) -> Result<WireRequest> {
        Ok(WireRequest::get(join_url(&self.base_url, "api/tags")))
    }

    fn parse_models(&self, body: &str) -> Result<Vec<String>> {
        let tags: OllamaTagsResponse = serde_json::from_str(body)
            .map_err(|e| WardenError::Api(ApiError::Decode(e.to_string())))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
        match serde_json::from_str::<OllamaError>(body) {
            Ok(error) if error.error.contains("model") && error.error.contains("not found") => {
                ApiError::ModelNotFound(error.error)
            }
            Ok(error) => status_error(status, error.error, retry_after),
            Err(_) => status_error(status, body.trim().to_string(), retry_after),
        }
    }
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamResponse {
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: Option<String>,
    thinking: Option<String>,
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}
