// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use warden::chat::{AgentTarget, ChatStore, InMemoryChatStore, MultiAgentDispatcher, SessionState};
use warden::error::{ErrorKind, WardenError};
use warden::llm::message::{ChatDraft, ChatId, Message, MessageStatus, Role};
use warden::llm::mock_transport::{MockReply, MockTransport};
use warden::llm::provider::ProviderId;
use warden::llm::providers::{AnthropicAdapter, OllamaAdapter, OpenAiCompatAdapter};
use warden::llm::reasoning::GenerationSettings;
use warden::llm::registry::AdapterRegistry;

fn registry() -> Arc<AdapterRegistry> {
    Arc::new(
        AdapterRegistry::new()
            .with_adapter(Arc::new(OpenAiCompatAdapter::new(ProviderId::OpenAi, "sk-o")))
            .with_adapter(Arc::new(AnthropicAdapter::new("sk-a")))
            .with_adapter(Arc::new(OllamaAdapter::new())),
    )
}

fn openai_reply(text: &str) -> MockReply {
    MockReply::ok([
        format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": { "content": text } }] })
        ),
        format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }] })
        ),
        "data: [DONE]\n\n".to_string(),
    ])
}

fn ollama_reply(text: &str) -> MockReply {
    MockReply::ok([
        format!(
            "{}\n",
            json!({ "message": { "role": "assistant", "content": text }, "done": false })
        ),
        format!("{}\n", json!({ "done": true, "done_reason": "stop" })),
    ])
}

async fn chat(store: &InMemoryChatStore) -> (ChatId, Vec<Message>) {
    let chat_id = store
        .create_chat(ChatDraft::new(ProviderId::OpenAi, "gpt-4o"))
        .await
        .unwrap();
    store
        .append_message(chat_id, Message::user("compare yourselves"))
        .await
        .unwrap();
    let history = store.load_history(chat_id).await.unwrap();
    (chat_id, history)
}

fn targets() -> Vec<AgentTarget> {
    vec![
        AgentTarget::new(ProviderId::OpenAi, "gpt-4o"),
        AgentTarget::new(ProviderId::Anthropic, "claude-sonnet-4-20250514"),
        AgentTarget::new(ProviderId::Ollama, "llama3.2"),
    ]
}

#[tokio::test]
async fn test_one_failing_agent_does_not_affect_others() {
    let transport = MockTransport::new()
        .with_route("api.openai.com", openai_reply("from openai"))
        .with_route(
            "api.anthropic.com",
            MockReply::status(
                401,
                r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
            ),
        )
        .with_route("localhost:11434", ollama_reply("from ollama"));
    let store = Arc::new(InMemoryChatStore::new());
    let (chat_id, history) = chat(&store).await;

    let turn = MultiAgentDispatcher::new(registry(), Arc::new(transport.clone()), store.clone())
        .dispatch(
            chat_id,
            history,
            targets(),
            GenerationSettings::default(),
            Vec::new(),
        )
        .await
        .unwrap();
    let group_id = turn.group_id();
    let outcomes = turn.wait_all().await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].target.provider, ProviderId::OpenAi);
    assert_eq!(outcomes[0].message().unwrap().body, "from openai");
    assert!(outcomes[0].is_completed());

    let anthropic = outcomes[1].result.as_ref().unwrap();
    assert_eq!(anthropic.error_kind(), Some(ErrorKind::Unauthorized));

    assert_eq!(outcomes[2].message().unwrap().body, "from ollama");
    assert!(outcomes[2].is_completed());
    assert_eq!(transport.request_count(), 3);

    let history = store.load_history(chat_id).await.unwrap();
    let replies: Vec<&Message> = history
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .collect();
    assert_eq!(replies.len(), 3);
    assert!(replies.iter().all(|m| m.group_id() == Some(group_id)));
    assert!(replies.iter().all(|m| m.is_final()));
    assert_eq!(
        replies
            .iter()
            .filter(|m| matches!(m.status, MessageStatus::Failed { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_slow_agent_does_not_delay_settled_count() {
    let transport = MockTransport::new()
        .with_route("api.openai.com", openai_reply("fast"))
        .with_route(
            "localhost:11434",
            ollama_reply("slow").with_chunk_delay(Duration::from_millis(200)),
        );
    let store = Arc::new(InMemoryChatStore::new());
    let (chat_id, history) = chat(&store).await;

    let turn = MultiAgentDispatcher::new(registry(), Arc::new(transport), store)
        .dispatch(
            chat_id,
            history,
            vec![
                AgentTarget::new(ProviderId::OpenAi, "gpt-4o"),
                AgentTarget::new(ProviderId::Ollama, "llama3.2"),
            ],
            GenerationSettings::default(),
            Vec::new(),
        )
        .await
        .unwrap();

    let mut fast = turn.agents()[0].handle().unwrap().subscribe();
    fast.wait_for(|view| view.state.is_terminal()).await.unwrap();

    assert_eq!(turn.agents()[0].state(), SessionState::Completed);
    assert!(!turn.agents()[1].is_settled());
    assert_eq!(turn.settled_count(), 1);

    let outcomes = turn.wait_all().await;
    assert!(outcomes.iter().all(|o| o.is_completed()));
}

#[tokio::test]
async fn test_cancel_all_settles_every_agent() {
    let hang = || {
        MockReply::ok([format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": { "content": "..." } }] })
        )])
        .then_hang()
    };
    let transport = MockTransport::new()
        .with_route("api.openai.com", hang())
        .with_route("api.openai.com", hang());
    let store = Arc::new(InMemoryChatStore::new());
    let (chat_id, history) = chat(&store).await;

    let turn = MultiAgentDispatcher::new(registry(), Arc::new(transport), store)
        .dispatch(
            chat_id,
            history,
            vec![
                AgentTarget::new(ProviderId::OpenAi, "gpt-4o"),
                AgentTarget::new(ProviderId::OpenAi, "gpt-4o-mini"),
            ],
            GenerationSettings::default(),
            Vec::new(),
        )
        .await
        .unwrap();

    turn.cancel_all();
    let outcomes = turn.wait_all().await;
    for outcome in outcomes {
        assert_eq!(outcome.result.unwrap().state, SessionState::Cancelled);
    }
}

#[tokio::test]
async fn test_more_than_max_agents_is_rejected() {
    let store = Arc::new(InMemoryChatStore::new());
    let (chat_id, history) = chat(&store).await;
    let mut too_many = targets();
    too_many.push(AgentTarget::new(ProviderId::OpenAi, "o3"));

    let result = MultiAgentDispatcher::new(registry(), Arc::new(MockTransport::new()), store.clone())
        .dispatch(
            chat_id,
            history,
            too_many,
            GenerationSettings::default(),
            Vec::new(),
        )
        .await;

    assert!(matches!(result, Err(WardenError::InvalidInput(_))));
    assert_eq!(store.load_history(chat_id).await.unwrap().len(), 1);
}
