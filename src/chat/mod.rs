// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat orchestration
//!
//! Completion sessions, tool-call tracking, multi-agent turns and branching,
//! tied together by [`ChatEngine`].

pub mod branching;
pub mod engine;
pub mod multi_agent;
pub mod session;
pub mod store;
pub mod streaming;
pub mod tool_calls;

pub use branching::{BranchOutcome, BranchRequest, ChatBranchingManager};
pub use engine::ChatEngine;
pub use multi_agent::{AgentOutcome, AgentTarget, MultiAgentDispatcher, MultiAgentTurn};
pub use session::{CompletionSession, SessionHandle, SessionOutcome, SessionState, SessionView};
pub use store::{ChatStore, InMemoryChatStore};
pub use tool_calls::{ToolCallOrchestrator, ToolExecutor, ToolOutcome};
