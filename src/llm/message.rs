// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat and message types
//!
//! A `Chat` owns an append-only list of `Message`s. An assistant message starts
//! as a `Streaming` placeholder and is mutated only by the session producing it;
//! once its status is final it never changes again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::llm::provider::ProviderId;
use crate::llm::reasoning::GenerationSettings;

/// A message in a chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for the message
    pub id: Uuid,

    /// Role of the message sender
    pub role: Role,

    /// Visible text; grows while streaming
    pub body: String,

    /// Streamed "thinking" text, never sent back to a provider
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning: String,

    /// When the message was created
    pub timestamp: DateTime<Utc>,

    /// Tool calls made while producing this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,

    /// Which model produced this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,

    /// Lifecycle status
    pub status: MessageStatus,
}

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// System prompt
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// Origin of an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: ProviderId,
    pub model: String,
    /// Shared by the parallel answers of one multi-agent turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
}

impl Provenance {
    pub fn new(provider: ProviderId, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            group_id: None,
        }
    }

    pub fn with_group(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }
}

/// Message lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageStatus {
    Streaming,
    Complete,
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

impl MessageStatus {
    /// Every status but `Streaming` is final
    pub fn is_final(&self) -> bool {
        !matches!(self, MessageStatus::Streaming)
    }
}

/// One tool call inside an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Vendor (or synthesized) call id
    pub id: String,
    /// Tool name
    pub name: String,
    /// Arguments accumulated from the stream (usually JSON text)
    #[serde(default)]
    pub arguments: String,
    pub status: ToolCallStatus,
}

/// Tool call lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ToolCallStatus {
    Calling {
        name: String,
    },
    Executing {
        name: String,
        progress: Option<String>,
    },
    Completed {
        name: String,
        success: bool,
        result: Option<String>,
    },
    Failed {
        name: String,
        error: String,
    },
}

impl ToolCallStatus {
    pub fn name(&self) -> &str {
        match self {
            ToolCallStatus::Calling { name }
            | ToolCallStatus::Executing { name, .. }
            | ToolCallStatus::Completed { name, .. }
            | ToolCallStatus::Failed { name, .. } => name,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallStatus::Completed { .. } | ToolCallStatus::Failed { .. }
        )
    }
}

impl Message {
    fn new(role: Role, body: String, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            body,
            reasoning: String::new(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            provenance: None,
            status,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), MessageStatus::Complete)
    }

    /// Create a completed assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), MessageStatus::Complete)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into(), MessageStatus::Complete)
    }

    /// Empty assistant message a session streams into
    pub fn placeholder(provenance: Provenance) -> Self {
        let mut message = Self::new(Role::Assistant, String::new(), MessageStatus::Streaming);
        message.provenance = Some(provenance);
        message
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Value copy under a fresh id, for seeding a branch
    pub fn fork(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// Multi-agent group this message answers in, if any
    pub fn group_id(&self) -> Option<Uuid> {
        self.provenance.as_ref().and_then(|p| p.group_id)
    }
}

/// Chat identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which side of the conversation a branch was cut from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchOrigin {
    User,
    Assistant,
}

impl BranchOrigin {
    pub fn role(&self) -> Role {
        match self {
            BranchOrigin::User => Role::User,
            BranchOrigin::Assistant => Role::Assistant,
        }
    }
}

/// Where a branched chat came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub source_chat: ChatId,
    pub source_message: Uuid,
    pub origin: BranchOrigin,
}

/// A conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Append-only
    #[serde(default)]
    pub messages: Vec<Message>,
    pub provider: ProviderId,
    pub model: String,
    #[serde(default)]
    pub settings: GenerationSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<Lineage>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn from_draft(draft: ChatDraft) -> Self {
        Self {
            id: ChatId::new(),
            title: draft.title,
            system_prompt: draft.system_prompt,
            messages: Vec::new(),
            provider: draft.provider,
            model: draft.model,
            settings: draft.settings,
            lineage: draft.lineage,
            created_at: Utc::now(),
        }
    }

    pub fn message(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }
}

/// Everything needed to create a chat
#[derive(Debug, Clone)]
pub struct ChatDraft {
    pub title: String,
    pub system_prompt: Option<String>,
    pub provider: ProviderId,
    pub model: String,
    pub settings: GenerationSettings,
    pub lineage: Option<Lineage>,
}

impl ChatDraft {
    pub fn new(provider: ProviderId, model: impl Into<String>) -> Self {
        Self {
            title: "New chat".to_string(),
            system_prompt: None,
            provider,
            model: model.into(),
            settings: GenerationSettings::default(),
            lineage: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_lineage(mut self, lineage: Lineage) -> Self {
        self.lineage = Some(lineage);
        self
    }
}

/// Select the messages a provider should see.
///
/// System messages are dropped (adapters place them via [`system_text`]).
/// Assistant messages that are still streaming, or have no text (failed or
/// cancelled before the first delta, or tool-only turns), are skipped. Of each
/// multi-agent group only one of the remaining replies survives: the one
/// produced by `target_model`, otherwise the first complete one, otherwise the
/// first one.
pub fn prepare_history<'a>(history: &'a [Message], target_model: &str) -> Vec<&'a Message> {
    let replayable: Vec<&Message> = history
        .iter()
        .filter(|m| match m.role {
            Role::System => false,
            Role::User => true,
            Role::Assistant => m.is_final() && !m.body.is_empty(),
        })
        .collect();

    let mut groups: HashMap<Uuid, Vec<&Message>> = HashMap::new();
    for message in replayable.iter().copied() {
        if let Some(group) = message.group_id() {
            groups.entry(group).or_default().push(message);
        }
    }
    let mut chosen: HashMap<Uuid, Uuid> = HashMap::new();
    for (group, members) in groups {
        let pick = members
            .iter()
            .find(|m| {
                m.status == MessageStatus::Complete
                    && m.provenance.as_ref().map(|p| p.model.as_str()) == Some(target_model)
            })
            .or_else(|| members.iter().find(|m| m.status == MessageStatus::Complete))
            .or_else(|| members.first());
        if let Some(pick) = pick {
            chosen.insert(group, pick.id);
        }
    }

    replayable
        .into_iter()
        .filter(|m| match m.group_id() {
            Some(group) => chosen.get(&group) == Some(&m.id),
            None => true,
        })
        .collect()
}

/// Combined system text: the chat's prompt followed by any system messages
pub fn system_text(system: Option<&str>, history: &[Message]) -> Option<String> {
    let parts: Vec<&str> = system
        .into_iter()
        .chain(
            history
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.body.as_str()),
        )
        .filter(|s| !s.trim().is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}
