// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider adapter trait and the canonical streaming types
//!
//! Every vendor wire format is translated into the types defined here. No other
//! module sees vendor JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ApiError, ErrorKind, Result, WardenError};
use crate::llm::decoder::{DecoderState, Frame, Framing};
use crate::llm::message::Message;
use crate::llm::reasoning::GenerationSettings;

/// Supported vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Google,
    Xai,
    Perplexity,
    DeepSeek,
    Groq,
    OpenRouter,
    Ollama,
    Mistral,
}

impl ProviderId {
    /// Every provider, in display order
    pub const ALL: [ProviderId; 10] = [
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Google,
        ProviderId::Xai,
        ProviderId::Perplexity,
        ProviderId::DeepSeek,
        ProviderId::Groq,
        ProviderId::OpenRouter,
        ProviderId::Ollama,
        ProviderId::Mistral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Google => "google",
            ProviderId::Xai => "xai",
            ProviderId::Perplexity => "perplexity",
            ProviderId::DeepSeek => "deepseek",
            ProviderId::Groq => "groq",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Ollama => "ollama",
            ProviderId::Mistral => "mistral",
        }
    }

    /// Whether requests to this provider need an API key
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderId::Ollama)
    }

    /// Vendor endpoint used when settings don't override it
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "https://api.openai.com/v1",
            ProviderId::Anthropic => "https://api.anthropic.com/v1",
            ProviderId::Google => "https://generativelanguage.googleapis.com/v1beta",
            ProviderId::Xai => "https://api.x.ai/v1",
            ProviderId::Perplexity => "https://api.perplexity.ai",
            ProviderId::DeepSeek => "https://api.deepseek.com/v1",
            ProviderId::Groq => "https://api.groq.com/openai/v1",
            ProviderId::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderId::Ollama => "http://localhost:11434",
            ProviderId::Mistral => "https://api.mistral.ai/v1",
        }
    }

    /// Conventional environment variable holding the API key
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderId::OpenAi => Some("OPENAI_API_KEY"),
            ProviderId::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderId::Google => Some("GEMINI_API_KEY"),
            ProviderId::Xai => Some("XAI_API_KEY"),
            ProviderId::Perplexity => Some("PERPLEXITY_API_KEY"),
            ProviderId::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ProviderId::Groq => Some("GROQ_API_KEY"),
            ProviderId::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderId::Ollama => None,
            ProviderId::Mistral => Some("MISTRAL_API_KEY"),
        }
    }

    /// Model used when neither the caller nor settings name one
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "gpt-4o",
            ProviderId::Anthropic => "claude-sonnet-4-20250514",
            ProviderId::Google => "gemini-2.5-flash",
            ProviderId::Xai => "grok-3-mini",
            ProviderId::Perplexity => "sonar",
            ProviderId::DeepSeek => "deepseek-chat",
            ProviderId::Groq => "llama-3.3-70b-versatile",
            ProviderId::OpenRouter => "openai/gpt-4o-mini",
            ProviderId::Ollama => "llama3.2",
            ProviderId::Mistral => "mistral-large-latest",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .or(match lower.as_str() {
                "gemini" => Some(ProviderId::Google),
                "grok" => Some(ProviderId::Xai),
                "claude" => Some(ProviderId::Anthropic),
                _ => None,
            })
            .ok_or_else(|| WardenError::InvalidInput(format!("Unknown provider: {}", s)))
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of message
    Stop,
    /// Hit max tokens
    Length,
    /// Model handed control to tools
    ToolCalls,
    /// Output withheld by a safety filter
    ContentFilter,
    /// Vendor-specific reason we don't model
    Other(String),
}

impl FinishReason {
    /// Map the vendor's stop/finish keyword
    pub fn from_vendor(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" | "STOP" => FinishReason::Stop,
            "length" | "max_tokens" | "MAX_TOKENS" => FinishReason::Length,
            "tool_calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
            "content_filter" | "SAFETY" | "RECITATION" | "refusal" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Canonical events decoded from a vendor stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Assistant text
    TextDelta(String),

    /// Streamed "thinking" text
    ReasoningDelta(String),

    /// A tool call was announced or its arguments grew
    ToolCallDelta {
        id: String,
        name: Option<String>,
        arguments: Option<String>,
    },

    /// A tool call produced its result
    ToolCallResult {
        id: String,
        success: bool,
        payload: Option<String>,
    },

    /// End of the response
    Finish(FinishReason),

    /// In-stream error
    Error { kind: ErrorKind, message: String },
}

impl StreamEvent {
    /// Build an error event from an API error
    pub fn error(err: &ApiError) -> Self {
        StreamEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Build a decode error event
    pub fn decode_error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            kind: ErrorKind::Decode,
            message: message.into(),
        }
    }
}

/// Tool definition offered to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema object)
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Canonical completion request handed to an adapter
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,

    /// System prompt
    pub system: Option<String>,

    /// Conversation history, oldest first
    pub history: Vec<Message>,

    /// Temperature, reasoning effort and token limit
    pub settings: GenerationSettings,

    /// Tools available for the model to use
    pub tools: Vec<ToolSpec>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(model: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: None,
            history,
            settings: GenerationSettings::default(),
            tools: vec![],
        }
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set generation settings
    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set tools
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// HTTP method of a wire request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Vendor HTTP request produced by `encode`
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl WireRequest {
    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: vec![],
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a model accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    /// Accepts a sampling temperature
    pub temperature: bool,
    /// Accepts a reasoning/thinking control
    pub reasoning: bool,
    /// Accepts tool definitions
    pub tools: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            temperature: true,
            reasoning: false,
            tools: true,
        }
    }
}

/// Vendor-specific encode/decode behind one canonical interface
pub trait ProviderAdapter: Send + Sync {
    /// Which vendor this adapter speaks to
    fn id(&self) -> ProviderId;

    /// Stream framing used by the vendor
    fn framing(&self) -> Framing;

    /// Knobs the given model accepts
    fn capabilities(&self, model: &str) -> ModelCapabilities;

    /// Encode a canonical request into the vendor wire request
    fn encode(&self, request: &CompletionRequest) -> Result<WireRequest>;

    /// Decode one frame into canonical events. Unknown shapes yield nothing.
    fn decode_frame(&self, frame: &Frame, state: &mut DecoderState) -> Vec<StreamEvent>;

    /// Events owed at end of stream (e.g. a remembered finish reason)
    fn finish_stream(&self, _state: &mut DecoderState) -> Vec<StreamEvent> {
        Vec::new()
    }

    /// Request listing the vendor's models
    fn models_request(&self) -> Result<WireRequest>;

    /// Fixed model list for vendors without a listing endpoint
    fn static_models(&self) -> Option<Vec<String>> {
        None
    }

    /// Parse the model listing body
    fn parse_models(&self, body: &str) -> Result<Vec<String>>;

    /// Map a non-2xx response to an API error
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> ApiError;

    /// Fresh decoder state for one stream
    fn new_decoder(&self) -> DecoderState {
        DecoderState::new(self.framing())
    }

    /// Feed raw bytes; partial frames are retained in `state` for the next call.
    fn decode(&self, chunk: &[u8], state: &mut DecoderState) -> Result<Vec<StreamEvent>> {
        let frames = state
            .reader
            .push(chunk)
            .map_err(|e| WardenError::Api(e.into()))?;
        Ok(frames
            .iter()
            .flat_map(|frame| self.decode_frame(frame, state))
            .collect())
    }

    /// Flush any trailing frame and end-of-stream events
    fn decode_eof(&self, state: &mut DecoderState) -> Result<Vec<StreamEvent>> {
        let frames = state
            .reader
            .finish()
            .map_err(|e| WardenError::Api(e.into()))?;
        let mut events: Vec<StreamEvent> = frames
            .iter()
            .flat_map(|frame| self.decode_frame(frame, state))
            .collect();
        events.extend(self.finish_stream(state));
        Ok(events)
    }
}
