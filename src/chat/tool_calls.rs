// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool call lifecycle tracking
//!
//! Folds tool events from one assistant message into [`ToolCallRecord`]s.
//! Identity within a message is the tool name: a second call to a name is only
//! accepted once the first one is terminal.

use async_trait::async_trait;

use crate::error::{ApiError, Result};
use crate::llm::message::{ToolCallRecord, ToolCallStatus};

/// Result of running a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    pub payload: Option<String>,
}

impl ToolOutcome {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            success: true,
            payload: Some(payload.into()),
        }
    }

    pub fn failure(payload: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Some(payload.into()),
        }
    }
}

/// Runs client-side tools when a stream finishes with calls still pending
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: &str) -> Result<ToolOutcome>;
}

/// Tool call state machine for one message
#[derive(Debug, Default, Clone)]
pub struct ToolCallOrchestrator {
    calls: Vec<ToolCallRecord>,
}

fn violation(message: String) -> ApiError {
    ApiError::ToolProtocolViolation(message)
}

impl ToolCallOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[ToolCallRecord] {
        &self.calls
    }

    pub fn get(&self, id: &str) -> Option<&ToolCallRecord> {
        self.calls.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ToolCallRecord> {
        self.calls.iter_mut().find(|c| c.id == id)
    }

    /// Apply a streamed tool call fragment.
    ///
    /// Returns whether the call's status kind changed (a new call, or
    /// `Calling` becoming `Executing`).
    pub fn apply_delta(
        &mut self,
        id: &str,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> std::result::Result<bool, ApiError> {
        let fragment = arguments.filter(|a| !a.is_empty());

        let Some(call) = self.get_mut(id) else {
            let name = name.filter(|n| !n.is_empty()).ok_or_else(|| {
                violation(format!("tool call {} has no name on first delta", id))
            })?;
            if self.calls.iter().any(|c| c.name == name && !c.status.is_terminal()) {
                return Err(violation(format!(
                    "tool {} called again while a call is still in flight",
                    name
                )));
            }
            self.calls.push(ToolCallRecord {
                id: id.to_string(),
                name: name.to_string(),
                arguments: fragment.unwrap_or_default().to_string(),
                status: ToolCallStatus::Calling {
                    name: name.to_string(),
                },
            });
            return Ok(true);
        };

        let Some(fragment) = fragment else {
            return Ok(false);
        };
        if call.status.is_terminal() {
            return Err(violation(format!(
                "arguments for tool call {} arrived after it finished",
                id
            )));
        }

        call.arguments.push_str(fragment);
        let changed = matches!(call.status, ToolCallStatus::Calling { .. });
        call.status = ToolCallStatus::Executing {
            name: call.name.clone(),
            progress: Some(fragment.to_string()),
        };
        Ok(changed)
    }

    /// Mark a call as running locally (no progress yet)
    pub fn start_executing(&mut self, id: &str) -> std::result::Result<(), ApiError> {
        let call = self
            .get_mut(id)
            .ok_or_else(|| violation(format!("unknown tool call {}", id)))?;
        if call.status.is_terminal() {
            return Err(violation(format!("tool call {} already finished", id)));
        }
        call.status = ToolCallStatus::Executing {
            name: call.name.clone(),
            progress: None,
        };
        Ok(())
    }

    /// Record a tool result
    pub fn complete(
        &mut self,
        id: &str,
        success: bool,
        payload: Option<String>,
    ) -> std::result::Result<(), ApiError> {
        let call = self
            .get_mut(id)
            .ok_or_else(|| violation(format!("result for unknown tool call {}", id)))?;
        if call.status.is_terminal() {
            return Err(violation(format!("duplicate result for tool call {}", id)));
        }
        call.status = ToolCallStatus::Completed {
            name: call.name.clone(),
            success,
            result: payload,
        };
        Ok(())
    }

    /// Record an executor failure
    pub fn fail(&mut self, id: &str, error: impl Into<String>) -> std::result::Result<(), ApiError> {
        let call = self
            .get_mut(id)
            .ok_or_else(|| violation(format!("unknown tool call {}", id)))?;
        if call.status.is_terminal() {
            return Err(violation(format!("tool call {} already finished", id)));
        }
        call.status = ToolCallStatus::Failed {
            name: call.name.clone(),
            error: error.into(),
        };
        Ok(())
    }

    /// Calls that are not yet terminal
    pub fn pending(&self) -> Vec<&ToolCallRecord> {
        self.calls
            .iter()
            .filter(|c| !c.status.is_terminal())
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.calls.iter().all(|c| c.status.is_terminal())
    }
}
