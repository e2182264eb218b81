// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Multi-agent dispatch
//!
//! Fans one user turn out to several provider/model targets. Every target gets
//! its own [`CompletionSession`]; they share a group id and nothing else. One
//! target failing (even before it starts) never touches the others.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chat::session::{
    CompletionSession, SessionHandle, SessionOutcome, SessionState, DEFAULT_IDLE_TIMEOUT,
};
use crate::chat::store::ChatStore;
use crate::chat::tool_calls::ToolExecutor;
use crate::error::{ErrorKind, Result, WardenError};
use crate::llm::message::{ChatId, Message};
use crate::llm::provider::{CompletionRequest, ProviderId, ToolSpec};
use crate::llm::reasoning::GenerationSettings;
use crate::llm::registry::AdapterRegistry;
use crate::llm::transport::Transport;

/// Default cap on targets per turn
pub const DEFAULT_MAX_AGENTS: usize = 3;

/// A provider/model pair to ask
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentTarget {
    pub provider: ProviderId,
    pub model: String,
}

impl AgentTarget {
    pub fn new(provider: ProviderId, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl fmt::Display for AgentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

enum AgentSlot {
    Running(SessionHandle),
    /// Could not be started (no adapter, ...)
    Unavailable(String),
}

/// One target of a turn
pub struct Agent {
    target: AgentTarget,
    slot: AgentSlot,
}

impl Agent {
    pub fn target(&self) -> &AgentTarget {
        &self.target
    }

    pub fn handle(&self) -> Option<&SessionHandle> {
        match &self.slot {
            AgentSlot::Running(handle) => Some(handle),
            AgentSlot::Unavailable(_) => None,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.slot {
            AgentSlot::Running(handle) => handle.state(),
            AgentSlot::Unavailable(message) => SessionState::Failed {
                kind: ErrorKind::Config,
                message: message.clone(),
            },
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state().is_terminal()
    }
}

/// How one target ended
#[derive(Debug)]
pub struct AgentOutcome {
    pub target: AgentTarget,
    pub result: Result<SessionOutcome>,
}

impl AgentOutcome {
    pub fn is_completed(&self) -> bool {
        self.result.as_ref().is_ok_and(|outcome| outcome.is_completed())
    }

    pub fn message(&self) -> Option<&Message> {
        self.result.as_ref().ok().map(|outcome| &outcome.message)
    }
}

/// The sessions started for one user turn
pub struct MultiAgentTurn {
    group_id: Uuid,
    agents: Vec<Agent>,
}

impl MultiAgentTurn {
    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    /// Agents in target order
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn settled_count(&self) -> usize {
        self.agents.iter().filter(|a| a.is_settled()).count()
    }

    pub fn is_settled(&self) -> bool {
        self.settled_count() == self.agents.len()
    }

    pub fn cancel_all(&self) {
        for handle in self.agents.iter().filter_map(Agent::handle) {
            handle.cancel();
        }
    }

    /// Wait for every agent; outcomes come back in target order
    pub async fn wait_all(self) -> Vec<AgentOutcome> {
        let waits = self.agents.into_iter().map(|agent| async move {
            let result = match agent.slot {
                AgentSlot::Running(handle) => handle.wait().await,
                AgentSlot::Unavailable(message) => Err(WardenError::Config(message)),
            };
            AgentOutcome {
                target: agent.target,
                result,
            }
        });
        futures::future::join_all(waits).await
    }
}

/// Starts independent sessions for a set of targets
pub struct MultiAgentDispatcher {
    registry: Arc<AdapterRegistry>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ChatStore>,
    executor: Option<Arc<dyn ToolExecutor>>,
    max_agents: usize,
    idle_timeout: Duration,
}

impl MultiAgentDispatcher {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ChatStore>,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
            executor: None,
            max_agents: DEFAULT_MAX_AGENTS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_max_agents(mut self, max_agents: usize) -> Self {
        self.max_agents = max_agents;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Check a target list without starting anything
    pub fn validate(&self, targets: &[AgentTarget]) -> Result<()> {
        if targets.is_empty() {
            return Err(WardenError::InvalidInput(
                "multi-agent turn needs at least one target".to_string(),
            ));
        }
        if targets.len() > self.max_agents {
            return Err(WardenError::InvalidInput(format!(
                "{} targets requested, at most {} allowed",
                targets.len(),
                self.max_agents
            )));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = targets.iter().find(|t| !seen.insert(*t)) {
            return Err(WardenError::InvalidInput(format!(
                "target {} listed more than once",
                duplicate
            )));
        }
        Ok(())
    }

    /// Start one session per target against the same history.
    ///
    /// The history should already contain the user turn.
    pub async fn dispatch(
        &self,
        chat_id: ChatId,
        history: Vec<Message>,
        targets: Vec<AgentTarget>,
        settings: GenerationSettings,
        tools: Vec<ToolSpec>,
    ) -> Result<MultiAgentTurn> {
        self.validate(&targets)?;
        let group_id = Uuid::new_v4();

        tracing::debug!(
            target: "warden.chat.multi_agent",
            chat_id = %chat_id,
            group_id = %group_id,
            agents = targets.len(),
            "dispatching multi-agent turn"
        );

        let agents = targets
            .into_iter()
            .map(|target| {
                let slot = match self.registry.get(target.provider) {
                    Ok(adapter) => {
                        let request = CompletionRequest::new(target.model.clone(), history.clone())
                            .with_settings(settings)
                            .with_tools(tools.clone());
                        let mut session = CompletionSession::new(
                            chat_id,
                            adapter,
                            self.transport.clone(),
                            self.store.clone(),
                            request,
                        )
                        .with_group(group_id)
                        .with_idle_timeout(self.idle_timeout);
                        if let Some(ref executor) = self.executor {
                            session = session.with_tool_executor(executor.clone());
                        }
                        AgentSlot::Running(session.start())
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "warden.chat.multi_agent",
                            agent = %target,
                            error = %err,
                            "agent unavailable"
                        );
                        AgentSlot::Unavailable(err.to_string())
                    }
                };
                Agent { target, slot }
            })
            .collect();

        Ok(MultiAgentTurn { group_id, agents })
    }
}
