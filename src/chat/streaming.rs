// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming response handling
//!
//! Folds canonical stream events into the in-progress assistant message. Kept
//! free of I/O so the session loop stays thin and the folding is testable.

use crate::chat::tool_calls::ToolCallOrchestrator;
use crate::error::{ApiError, ErrorKind};
use crate::llm::message::Message;
use crate::llm::provider::{FinishReason, StreamEvent};

/// What applying one event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventResult {
    /// Text or reasoning grew
    Content,
    /// A tool call changed; `status_changed` is true when its state kind moved
    Tool { status_changed: bool },
    /// The vendor finished the response
    Finished(FinishReason),
    /// The vendor reported an error in-stream
    Error { kind: ErrorKind, message: String },
    /// Event arrived after finish and was dropped
    Ignored,
}

/// Accumulator for one streaming assistant message
#[derive(Debug)]
pub struct StreamAccumulator {
    message: Message,
    tools: ToolCallOrchestrator,
    finish: Option<FinishReason>,
}

impl StreamAccumulator {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            tools: ToolCallOrchestrator::new(),
            finish: None,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn tools(&self) -> &ToolCallOrchestrator {
        &self.tools
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.finish.as_ref()
    }

    /// Run an orchestrator operation and mirror the result into the message
    pub fn with_tools<T>(
        &mut self,
        op: impl FnOnce(&mut ToolCallOrchestrator) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let result = op(&mut self.tools);
        self.message.tool_calls = self.tools.calls().to_vec();
        result
    }

    /// Process a stream event
    pub fn process_event(&mut self, event: StreamEvent) -> Result<StreamEventResult, ApiError> {
        if self.finish.is_some() {
            return Ok(StreamEventResult::Ignored);
        }

        match event {
            StreamEvent::TextDelta(text) => {
                self.message.body.push_str(&text);
                Ok(StreamEventResult::Content)
            }
            StreamEvent::ReasoningDelta(text) => {
                self.message.reasoning.push_str(&text);
                Ok(StreamEventResult::Content)
            }
            StreamEvent::ToolCallDelta {
                id,
                name,
                arguments,
            } => {
                let status_changed = self.with_tools(|tools| {
                    tools.apply_delta(&id, name.as_deref(), arguments.as_deref())
                })?;
                Ok(StreamEventResult::Tool { status_changed })
            }
            StreamEvent::ToolCallResult {
                id,
                success,
                payload,
            } => {
                self.with_tools(|tools| tools.complete(&id, success, payload))?;
                Ok(StreamEventResult::Tool {
                    status_changed: true,
                })
            }
            StreamEvent::Finish(reason) => {
                self.finish = Some(reason.clone());
                Ok(StreamEventResult::Finished(reason))
            }
            StreamEvent::Error { kind, message } => Ok(StreamEventResult::Error { kind, message }),
        }
    }
}
