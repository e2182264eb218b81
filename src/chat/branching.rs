// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat branching
//!
//! Forks a chat at a cut message into a new chat that shares the prefix by
//! value. The source chat is never touched.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chat::session::{CompletionSession, SessionHandle, DEFAULT_IDLE_TIMEOUT};
use crate::chat::store::ChatStore;
use crate::chat::tool_calls::ToolExecutor;
use crate::error::{Result, WardenError};
use crate::llm::message::{BranchOrigin, Chat, ChatDraft, ChatId, Lineage, Message, Role};
use crate::llm::provider::{ProviderId, ToolSpec};
use crate::llm::registry::AdapterRegistry;
use crate::llm::transport::Transport;

/// Where and how to branch
#[derive(Debug, Clone)]
pub struct BranchRequest {
    pub source_chat: ChatId,
    pub cut_message: Uuid,
    pub origin: BranchOrigin,
    pub provider: ProviderId,
    pub model: String,
    /// Start a reply right away (user-origin branches only)
    pub auto_generate: bool,
}

impl BranchRequest {
    pub fn new(
        source_chat: ChatId,
        cut_message: Uuid,
        origin: BranchOrigin,
        provider: ProviderId,
        model: impl Into<String>,
    ) -> Self {
        Self {
            source_chat,
            cut_message,
            origin,
            provider,
            model: model.into(),
            auto_generate: true,
        }
    }

    pub fn with_auto_generate(mut self, auto_generate: bool) -> Self {
        self.auto_generate = auto_generate;
        self
    }
}

/// The new chat, plus the reply session if one was started
pub struct BranchOutcome {
    /// Snapshot of the new chat right after the prefix was copied
    pub chat: Chat,
    pub session: Option<SessionHandle>,
    /// Why auto-generation could not start; the branch itself still exists
    pub generation_error: Option<WardenError>,
}

/// Messages carried into a branch cut at `position`
pub fn branch_prefix(messages: &[Message], position: usize, origin: BranchOrigin) -> &[Message] {
    let end = match origin {
        BranchOrigin::Assistant => position + 1,
        BranchOrigin::User => messages[position + 1..]
            .iter()
            .position(|m| m.role == Role::Assistant)
            .map_or(messages.len(), |offset| position + 1 + offset),
    };
    &messages[..end.min(messages.len())]
}

pub struct ChatBranchingManager {
    registry: Arc<AdapterRegistry>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ChatStore>,
    executor: Option<Arc<dyn ToolExecutor>>,
    idle_timeout: Duration,
}

impl ChatBranchingManager {
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
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub async fn branch(&self, request: BranchRequest) -> Result<BranchOutcome> {
        let source = self.store.load_chat(request.source_chat).await?;
        let position = source.position(request.cut_message).ok_or_else(|| {
            WardenError::InvalidInput(format!(
                "message {} not found in chat {}",
                request.cut_message, request.source_chat
            ))
        })?;

        let cut = &source.messages[position];
        if cut.role != request.origin.role() {
            return Err(WardenError::InvalidInput(format!(
                "cannot branch from a {} message as a {:?} branch",
                cut.role, request.origin
            )));
        }
        if !cut.is_final() {
            return Err(WardenError::InvalidInput(format!(
                "message {} is still streaming",
                cut.id
            )));
        }

        let prefix = branch_prefix(&source.messages, position, request.origin);

        let mut draft = ChatDraft::new(request.provider, request.model.clone())
            .with_title(source.title.clone())
            .with_settings(source.settings)
            .with_lineage(Lineage {
                source_chat: source.id,
                source_message: request.cut_message,
                origin: request.origin,
            });
        draft.system_prompt = source.system_prompt.clone();

        let chat_id = self.store.create_chat(draft).await?;
        for message in prefix {
            self.store.append_message(chat_id, message.fork()).await?;
        }
        let chat = self.store.load_chat(chat_id).await?;

        tracing::debug!(
            target: "warden.chat.branching",
            source_chat = %source.id,
            chat_id = %chat_id,
            copied = prefix.len(),
            origin = ?request.origin,
            "branch created"
        );

        let (session, generation_error) =
            if request.origin == BranchOrigin::User && request.auto_generate {
                match self.start_generation(&chat) {
                    Ok(handle) => (Some(handle), None),
                    Err(err) => {
                        tracing::warn!(
                            target: "warden.chat.branching",
                            chat_id = %chat_id,
                            error = %err,
                            "branch created but generation could not start"
                        );
                        (None, Some(err))
                    }
                }
            } else {
                (None, None)
            };

        Ok(BranchOutcome {
            chat,
            session,
            generation_error,
        })
    }

    fn start_generation(&self, chat: &Chat) -> Result<SessionHandle> {
        let adapter = self.registry.get(chat.provider)?;
        let mut session = CompletionSession::for_chat(
            chat,
            adapter,
            self.transport.clone(),
            self.store.clone(),
            Vec::<ToolSpec>::new(),
        )
        .with_idle_timeout(self.idle_timeout);
        if let Some(ref executor) = self.executor {
            session = session.with_tool_executor(executor.clone());
        }
        Ok(session.start())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Vec<Message> {
        vec![
            Message::user("u1"),
            Message::assistant("a1"),
            Message::user("u2"),
            Message::assistant("a2-first"),
            Message::assistant("a2-second"),
            Message::user("u3"),
        ]
    }

    fn bodies(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.body.as_str()).collect()
    }

    #[test]
    fn test_assistant_prefix_includes_cut() {
        let messages = conversation();
        let prefix = branch_prefix(&messages, 3, BranchOrigin::Assistant);
        assert_eq!(bodies(prefix), vec!["u1", "a1", "u2", "a2-first"]);
    }

    #[test]
    fn test_user_prefix_stops_before_next_assistant() {
        let messages = conversation();
        let prefix = branch_prefix(&messages, 2, BranchOrigin::User);
        assert_eq!(bodies(prefix), vec!["u1", "a1", "u2"]);
    }

    #[test]
    fn test_user_prefix_at_tail_takes_everything() {
        let messages = conversation();
        let prefix = branch_prefix(&messages, 5, BranchOrigin::User);
        assert_eq!(prefix.len(), messages.len());
    }
}
