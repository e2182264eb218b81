// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Front-end facing chat engine.
//!
//! Wires settings, adapters, transport and storage together so frontends only
//! deal in chat ids, user text and session handles.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chat::branching::{BranchOutcome, BranchRequest, ChatBranchingManager};
use crate::chat::multi_agent::{AgentTarget, MultiAgentDispatcher, MultiAgentTurn};
use crate::chat::session::{CompletionSession, SessionHandle};
use crate::chat::store::{ChatStore, InMemoryChatStore};
use crate::chat::tool_calls::ToolExecutor;
use crate::config::Settings;
use crate::error::{Result, WardenError};
use crate::llm::message::{BranchOrigin, ChatDraft, ChatId, Message};
use crate::llm::models::{ModelCatalog, ModelLister};
use crate::llm::provider::{ProviderId, ToolSpec};
use crate::llm::registry::AdapterRegistry;
use crate::llm::retry::RetryConfig;
use crate::llm::transport::{HttpTransport, Transport};

pub struct ChatEngine {
    settings: Settings,
    registry: Arc<AdapterRegistry>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ChatStore>,
    models: Arc<dyn ModelCatalog>,
    executor: Option<Arc<dyn ToolExecutor>>,
    tools: Vec<ToolSpec>,
}

impl ChatEngine {
    pub fn new(
        settings: Settings,
        registry: Arc<AdapterRegistry>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ChatStore>,
    ) -> Self {
        let models = ModelLister::new(registry.clone(), transport.clone())
            .with_retry_config(RetryConfig::from(&settings.resilience));
        Self {
            settings,
            registry,
            transport,
            store,
            models: Arc::new(models),
            executor: None,
            tools: Vec::new(),
        }
    }

    /// Engine over HTTP with an in-memory store
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let transport = HttpTransport::new(&settings.resilience)?;
        let registry = AdapterRegistry::from_settings(&settings);
        Ok(Self::new(
            settings,
            Arc::new(registry),
            Arc::new(transport),
            Arc::new(InMemoryChatStore::new()),
        ))
    }

    pub fn with_tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Tools advertised to every request
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model_catalog(mut self, models: Arc<dyn ModelCatalog>) -> Self {
        self.models = models;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.resilience.idle_timeout_secs)
    }

    fn dispatcher(&self) -> MultiAgentDispatcher {
        let dispatcher = MultiAgentDispatcher::new(
            self.registry.clone(),
            self.transport.clone(),
            self.store.clone(),
        )
        .with_max_agents(self.settings.multi_agent.max_agents)
        .with_idle_timeout(self.idle_timeout());
        match self.executor {
            Some(ref executor) => dispatcher.with_tool_executor(executor.clone()),
            None => dispatcher,
        }
    }

    fn branching(&self) -> ChatBranchingManager {
        let manager = ChatBranchingManager::new(
            self.registry.clone(),
            self.transport.clone(),
            self.store.clone(),
        )
        .with_idle_timeout(self.idle_timeout());
        match self.executor {
            Some(ref executor) => manager.with_tool_executor(executor.clone()),
            None => manager,
        }
    }

    /// Create a chat; unspecified provider/model fall back to settings
    pub async fn create_chat(
        &self,
        provider: Option<ProviderId>,
        model: Option<String>,
    ) -> Result<ChatId> {
        let provider = provider.unwrap_or(self.settings.defaults.provider);
        let model = model.unwrap_or_else(|| self.settings.default_model(provider));
        let mut draft =
            ChatDraft::new(provider, model).with_settings(self.settings.defaults.generation());
        draft.system_prompt = self.settings.defaults.system_prompt.clone();
        self.store.create_chat(draft).await
    }

    async fn append_user_turn(&self, chat_id: ChatId, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(WardenError::InvalidInput("message is empty".to_string()));
        }
        self.store.append_message(chat_id, Message::user(text)).await
    }

    /// Append a user turn and start a reply on the chat's provider
    pub async fn send(&self, chat_id: ChatId, text: &str) -> Result<SessionHandle> {
        // Resolve before writing so a misconfigured provider leaves no orphan turn
        let chat = self.store.load_chat(chat_id).await?;
        let adapter = self.registry.get(chat.provider)?;

        self.append_user_turn(chat_id, text).await?;
        let chat = self.store.load_chat(chat_id).await?;

        let mut session = CompletionSession::for_chat(
            &chat,
            adapter,
            self.transport.clone(),
            self.store.clone(),
            self.tools.clone(),
        )
        .with_idle_timeout(self.idle_timeout());
        if let Some(ref executor) = self.executor {
            session = session.with_tool_executor(executor.clone());
        }
        Ok(session.start())
    }

    /// Append a user turn and fan it out to several targets
    pub async fn send_multi(
        &self,
        chat_id: ChatId,
        text: &str,
        targets: Vec<AgentTarget>,
    ) -> Result<MultiAgentTurn> {
        let dispatcher = self.dispatcher();
        dispatcher.validate(&targets)?;

        self.append_user_turn(chat_id, text).await?;
        let chat = self.store.load_chat(chat_id).await?;

        let mut history = Vec::with_capacity(chat.messages.len() + 1);
        if let Some(ref system) = chat.system_prompt {
            history.push(Message::system(system.clone()));
        }
        history.extend(chat.messages);

        dispatcher
            .dispatch(chat_id, history, targets, chat.settings, self.tools.clone())
            .await
    }

    /// Branch request with the configured auto-generate default
    pub fn branch_request(
        &self,
        source_chat: ChatId,
        cut_message: Uuid,
        origin: BranchOrigin,
        provider: ProviderId,
        model: impl Into<String>,
    ) -> BranchRequest {
        BranchRequest::new(source_chat, cut_message, origin, provider, model)
            .with_auto_generate(self.settings.branching.auto_generate)
    }

    pub async fn branch(&self, request: BranchRequest) -> Result<BranchOutcome> {
        self.branching().branch(request).await
    }

    pub async fn fetch_models(&self, provider: ProviderId) -> Result<Vec<String>> {
        self.models.fetch_models(provider).await
    }

    pub async fn refresh_models(&self, provider: ProviderId) -> Result<Vec<String>> {
        self.models.refresh(provider).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock_transport::{MockReply, MockTransport};
    use crate::llm::providers::OllamaAdapter;

    fn engine(transport: MockTransport) -> ChatEngine {
        let mut settings = Settings::default();
        settings.defaults.provider = ProviderId::Ollama;
        settings.defaults.system_prompt = Some("Be brief.".to_string());
        let registry = AdapterRegistry::new().with_adapter(Arc::new(OllamaAdapter::new()));
        ChatEngine::new(
            settings,
            Arc::new(registry),
            Arc::new(transport),
            Arc::new(InMemoryChatStore::new()),
        )
    }

    #[tokio::test]
    async fn test_create_chat_uses_defaults() {
        let engine = engine(MockTransport::new());
        let chat_id = engine.create_chat(None, None).await.unwrap();
        let chat = engine.store().load_chat(chat_id).await.unwrap();
        assert_eq!(chat.provider, ProviderId::Ollama);
        assert_eq!(chat.model, "llama3.2");
        assert_eq!(chat.system_prompt.as_deref(), Some("Be brief."));
    }

    #[tokio::test]
    async fn test_send_streams_reply() {
        let transport = MockTransport::new().with_reply(MockReply::ok([
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"!\"},\"done\":true,\"done_reason\":\"stop\"}\n",
        ]));
        let engine = engine(transport.clone());
        let chat_id = engine.create_chat(None, None).await.unwrap();

        let outcome = engine.send(chat_id, "hello").await.unwrap().wait().await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(outcome.message.body, "Hi!");

        let body = transport.requests()[0].body.clone().unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
    }

    #[tokio::test]
    async fn test_empty_text_rejected_without_write() {
        let engine = engine(MockTransport::new());
        let chat_id = engine.create_chat(None, None).await.unwrap();
        assert!(engine.send(chat_id, "   ").await.is_err());
        assert!(engine.store().load_history(chat_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_leaves_no_user_turn() {
        let engine = engine(MockTransport::new());
        let chat_id = engine
            .create_chat(Some(ProviderId::Anthropic), None)
            .await
            .unwrap();
        assert!(matches!(
            engine.send(chat_id, "hello").await,
            Err(WardenError::Config(_))
        ));
        assert!(engine.store().load_history(chat_id).await.unwrap().is_empty());
    }
}
