// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Google Gemini `streamGenerateContent` adapter

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, Result, WardenError};
use crate::llm::decoder::{DecoderState, Frame, Framing};
use crate::llm::message::{prepare_history, system_text, Role};
use crate::llm::provider::{
    CompletionRequest, FinishReason, ModelCapabilities, ProviderAdapter, ProviderId, StreamEvent,
    WireRequest,
};
use crate::llm::providers::common::{join_url, parse_error_body, parse_frame, stream_error_kind};
use crate::llm::reasoning::ReasoningControl;

/// Gemini adapter
pub struct GeminiAdapter {
    api_key: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ProviderId::Google.default_base_url().to_string(),
        }
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn contents(&self, request: &CompletionRequest) -> Vec<Value> {
        prepare_history(&request.history, &request.model)
            .into_iter()
            .filter_map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                    Role::System => return None,
                };
                Some(json!({ "role": role, "parts": [{ "text": m.body }] }))
            })
            .collect()
    }
}

/// 2.5-series models think; older ones reject `thinkingConfig`
fn supports_thinking(model: &str) -> bool {
    model.contains("gemini-2.5") || model.contains("gemini-3")
}

impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Google
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

        let mut generation = json!({});
        if let Some(temperature) = settings.temperature {
            generation["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = settings.max_tokens {
            generation["maxOutputTokens"] = json!(max_tokens);
        }
        if caps.reasoning {
            match settings.reasoning_effort.control_for(ProviderId::Google) {
                ReasoningControl::Budget(budget) => {
                    generation["thinkingConfig"] =
                        json!({ "thinkingBudget": budget, "includeThoughts": true });
                }
                ReasoningControl::Disabled => {
                    // 2.5 Pro cannot turn thinking off; leave its default
                    if !request.model.contains("pro") {
                        generation["thinkingConfig"] = json!({ "thinkingBudget": 0 });
                    }
                }
                ReasoningControl::Effort(_) | ReasoningControl::Unsupported => {}
            }
        }

        let mut body = json!({ "contents": self.contents(request) });
        if let Some(system) = system_text(request.system.as_deref(), &request.history) {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if generation.as_object().is_some_and(|g| !g.is_empty()) {
            body["generationConfig"] = generation;
        }
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        let path = format!(
            "models/{}:streamGenerateContent?alt=sse",
            request.model.trim_start_matches("models/")
        );
        Ok(WireRequest::post(join_url(&self.base_url, &path), body)
            .with_header("x-goog-api-key", &self.api_key))
    }

    fn decode_frame(&self, frame: &Frame, state: &mut DecoderState) -> Vec<StreamEvent> {
        let chunk: GenerateChunk = match parse_frame(&frame.data) {
            Ok(chunk) => chunk,
            Err(event) => return vec![event],
        };

        if let Some(error) = chunk.error {
            return vec![StreamEvent::Error {
                kind: stream_error_kind(error.status.as_deref()),
                message: error.message.unwrap_or_else(|| "stream error".to_string()),
            }];
        }

        let mut events = Vec::new();
        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return events;
        };

        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        for part in parts {
            if let Some(call) = part.function_call {
                let id = state.tools.next_id("call");
                events.push(StreamEvent::ToolCallDelta {
                    id,
                    name: Some(call.name),
                    arguments: Some(call.args.unwrap_or_else(|| json!({})).to_string()),
                });
                continue;
            }
            match part.text.filter(|t| !t.is_empty()) {
                Some(text) if part.thought => events.push(StreamEvent::ReasoningDelta(text)),
                Some(text) => events.push(StreamEvent::TextDelta(text)),
                None => {}
            }
        }

        if let Some(reason) = candidate.finish_reason {
            state.pending_finish = Some(FinishReason::from_vendor(&reason));
            if let Some(reason) = state.take_finish(FinishReason::Stop) {
                events.push(StreamEvent::Finish(reason));
            }
        }

        events
    }

    fn models_request(&self) -> Result<WireRequest> {
        Ok(WireRequest::get(join_url(&self.base_url, "models?pageSize=1000"))
            .with_header("x-goog-api-key", &self.api_key))
    }

    fn parse_models(&self, body: &str) -> Result<Vec<String>> {
        let listing: ModelList = serde_json::from_str(body)
            .map_err(|e| WardenError::Api(ApiError::Decode(e.to_string())))?;
        Ok(listing
            .models
            .into_iter()
            .filter(|m| {
                m.supported_generation_methods.is_empty()
                    || m.supported_generation_methods
                        .iter()
                        .any(|method| method == "generateContent")
            })
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }

    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
        parse_error_body(status, body, retry_after)
    }
}

// Gemini wire types

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}
