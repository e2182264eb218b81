// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat storage collaborator
//!
//! Durable storage lives outside this crate; sessions and the branching
//! manager only see [`ChatStore`]. [`InMemoryChatStore`] backs tests and the CLI.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{Result, WardenError};
use crate::llm::message::{Chat, ChatDraft, ChatId, Message};

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create an empty chat and return its id
    async fn create_chat(&self, draft: ChatDraft) -> Result<ChatId>;

    async fn load_chat(&self, chat_id: ChatId) -> Result<Chat>;

    /// Messages in append order
    async fn load_history(&self, chat_id: ChatId) -> Result<Vec<Message>>;

    /// Append a message to the end of the chat
    async fn append_message(&self, chat_id: ChatId, message: Message) -> Result<()>;

    /// Replace a message in place. Final messages can no longer be updated.
    async fn update_message(&self, chat_id: ChatId, message: Message) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    chats: RwLock<HashMap<ChatId, Chat>>,
}

fn chat_not_found(chat_id: ChatId) -> WardenError {
    WardenError::Storage(format!("chat {} not found", chat_id))
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All chats, oldest first
    pub async fn chats(&self) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self.chats.read().await.values().cloned().collect();
        chats.sort_by_key(|c| c.created_at);
        chats
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create_chat(&self, draft: ChatDraft) -> Result<ChatId> {
        let chat = Chat::from_draft(draft);
        let id = chat.id;
        self.chats.write().await.insert(id, chat);
        tracing::debug!(target: "warden.store", chat_id = %id, "chat created");
        Ok(id)
    }

    async fn load_chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.chats
            .read()
            .await
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| chat_not_found(chat_id))
    }

    async fn load_history(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        Ok(self.load_chat(chat_id).await?.messages)
    }

    async fn append_message(&self, chat_id: ChatId, message: Message) -> Result<()> {
        let mut chats = self.chats.write().await;
        let chat = chats.get_mut(&chat_id).ok_or_else(|| chat_not_found(chat_id))?;
        if chat.message(message.id).is_some() {
            return Err(WardenError::Storage(format!(
                "message {} already exists in chat {}",
                message.id, chat_id
            )));
        }
        chat.messages.push(message);
        Ok(())
    }

    async fn update_message(&self, chat_id: ChatId, message: Message) -> Result<()> {
        let mut chats = self.chats.write().await;
        let chat = chats.get_mut(&chat_id).ok_or_else(|| chat_not_found(chat_id))?;
        let existing = chat
            .messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| {
                WardenError::Storage(format!(
                    "message {} not found in chat {}",
                    message.id, chat_id
                ))
            })?;
        if existing.is_final() {
            return Err(WardenError::Storage(format!(
                "message {} is final and cannot be updated",
                message.id
            )));
        }
        *existing = message;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::{MessageStatus, Provenance};
    use crate::llm::provider::ProviderId;

    async fn store_with_chat() -> (InMemoryChatStore, ChatId) {
        let store = InMemoryChatStore::new();
        let id = store
            .create_chat(ChatDraft::new(ProviderId::Anthropic, "claude-sonnet-4-20250514"))
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_append_keeps_order() {
        let (store, id) = store_with_chat().await;
        store.append_message(id, Message::user("one")).await.unwrap();
        store.append_message(id, Message::assistant("two")).await.unwrap();

        let history = store.load_history(id).await.unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_duplicate_append_rejected() {
        let (store, id) = store_with_chat().await;
        let message = Message::user("hi");
        store.append_message(id, message.clone()).await.unwrap();
        assert!(store.append_message(id, message).await.is_err());
    }

    #[tokio::test]
    async fn test_update_streaming_then_refuse_after_final() {
        let (store, id) = store_with_chat().await;
        let mut message = Message::placeholder(Provenance::new(ProviderId::Anthropic, "m"));
        store.append_message(id, message.clone()).await.unwrap();

        message.body.push_str("partial");
        store.update_message(id, message.clone()).await.unwrap();

        message.status = MessageStatus::Complete;
        store.update_message(id, message.clone()).await.unwrap();

        message.body.push_str(" more");
        let err = store.update_message(id, message).await.unwrap_err();
        assert!(err.to_string().contains("final"));

        let stored = store.load_history(id).await.unwrap();
        assert_eq!(stored[0].body, "partial");
    }

    #[tokio::test]
    async fn test_unknown_chat_and_message() {
        let (store, id) = store_with_chat().await;
        assert!(store.load_chat(ChatId::new()).await.is_err());
        assert!(store
            .update_message(id, Message::assistant("ghost"))
            .await
            .is_err());
    }
}
