// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use warden::chat::{ChatStore, CompletionSession, InMemoryChatStore, SessionState};
use warden::error::{ApiError, ErrorKind, Result};
use warden::llm::decoder::{DecoderState, Frame, Framing};
use warden::llm::message::{Chat, ChatDraft, ChatId, Message, MessageStatus, ToolCallStatus};
use warden::llm::mock_transport::{MockReply, MockTransport};
use warden::llm::provider::{
    CompletionRequest, FinishReason, ModelCapabilities, ProviderAdapter, ProviderId, StreamEvent,
    WireRequest,
};
use warden::llm::providers::OpenAiCompatAdapter;

/// NDJSON adapter whose lines spell out canonical events directly
struct ScriptedAdapter;

impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn framing(&self) -> Framing {
        Framing::NdJson
    }

    fn capabilities(&self, _model: &str) -> ModelCapabilities {
        ModelCapabilities::default()
    }

    fn encode(&self, request: &CompletionRequest) -> Result<WireRequest> {
        Ok(WireRequest::post(
            "http://scripted/chat",
            json!({ "model": request.model }),
        ))
    }

    fn decode_frame(&self, frame: &Frame, _state: &mut DecoderState) -> Vec<StreamEvent> {
        let line: Value = match serde_json::from_str(&frame.data) {
            Ok(value) => value,
            Err(e) => return vec![StreamEvent::decode_error(e.to_string())],
        };
        let text = |key: &str| line[key].as_str().map(str::to_string);
        let event = match line["type"].as_str() {
            Some("text") => StreamEvent::TextDelta(text("text").unwrap_or_default()),
            Some("tool") => StreamEvent::ToolCallDelta {
                id: text("id").unwrap_or_default(),
                name: text("name"),
                arguments: text("arguments"),
            },
            Some("result") => StreamEvent::ToolCallResult {
                id: text("id").unwrap_or_default(),
                success: line["success"].as_bool().unwrap_or(false),
                payload: text("payload"),
            },
            Some("finish") => {
                StreamEvent::Finish(FinishReason::from_vendor(line["reason"].as_str().unwrap_or("stop")))
            }
            _ => StreamEvent::decode_error(frame.data.clone()),
        };
        vec![event]
    }

    fn models_request(&self) -> Result<WireRequest> {
        Ok(WireRequest::get("http://scripted/models"))
    }

    fn parse_models(&self, _body: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn parse_error(&self, status: u16, body: &str, _retry_after: Option<u64>) -> ApiError {
        ApiError::ServerError {
            status,
            message: body.to_string(),
        }
    }
}

fn line(value: Value) -> String {
    format!("{}\n", value)
}

async fn chat_with_user_turn(store: &InMemoryChatStore) -> ChatId {
    let chat_id = store
        .create_chat(ChatDraft::new(ProviderId::OpenAi, "gpt-4o"))
        .await
        .unwrap();
    store
        .append_message(chat_id, Message::user("look something up"))
        .await
        .unwrap();
    chat_id
}

async fn session_with(
    adapter: Arc<dyn ProviderAdapter>,
    reply: MockReply,
) -> (Arc<InMemoryChatStore>, ChatId, CompletionSession) {
    let store = Arc::new(InMemoryChatStore::new());
    let chat_id = chat_with_user_turn(&store).await;
    let history = store.load_history(chat_id).await.unwrap();
    let session = CompletionSession::new(
        chat_id,
        adapter,
        Arc::new(MockTransport::new().with_reply(reply)),
        store.clone(),
        CompletionRequest::new("gpt-4o", history),
    );
    (store, chat_id, session)
}

fn openai() -> Arc<dyn ProviderAdapter> {
    Arc::new(OpenAiCompatAdapter::new(ProviderId::OpenAi, "sk-test"))
}

fn openai_text(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "delta": { "content": text } }] })
    )
}

#[tokio::test]
async fn test_five_event_stream_completes_with_tool_result() {
    let (store, chat_id, session) = session_with(
        Arc::new(ScriptedAdapter),
        MockReply::ok([
            line(json!({"type": "text", "text": "Hel"})),
            line(json!({"type": "text", "text": "lo"})),
            line(json!({"type": "tool", "id": "t1", "name": "search"})),
            line(json!({"type": "result", "id": "t1", "success": true, "payload": "{}"})),
            line(json!({"type": "finish", "reason": "stop"})),
        ]),
    )
    .await;

    let outcome = session.run(CancellationToken::new()).await;

    assert_eq!(outcome.state, SessionState::Completed);
    assert_eq!(outcome.message.body, "Hello");
    assert_eq!(outcome.message.tool_calls.len(), 1);
    assert_eq!(outcome.message.tool_calls[0].name, "search");
    assert_eq!(
        outcome.message.tool_calls[0].status,
        ToolCallStatus::Completed {
            name: "search".to_string(),
            success: true,
            result: Some("{}".to_string()),
        }
    );

    let history = store.load_history(chat_id).await.unwrap();
    assert_eq!(history.last(), Some(&outcome.message));
    assert_eq!(outcome.message.status, MessageStatus::Complete);
}

#[tokio::test]
async fn test_pending_tool_without_executor_is_protocol_violation() {
    let (_, _, session) = session_with(
        Arc::new(ScriptedAdapter),
        MockReply::ok([
            line(json!({"type": "text", "text": "Let me check"})),
            line(json!({"type": "tool", "id": "t1", "name": "search", "arguments": "{}"})),
            line(json!({"type": "finish", "reason": "tool_calls"})),
        ]),
    )
    .await;

    let outcome = session.run(CancellationToken::new()).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::ToolProtocolViolation));
    assert_eq!(outcome.message.body, "Let me check");
    assert_eq!(outcome.message.tool_calls.len(), 1);
}

#[tokio::test]
async fn test_result_for_unknown_call_fails_session() {
    let (_, _, session) = session_with(
        Arc::new(ScriptedAdapter),
        MockReply::ok([
            line(json!({"type": "result", "id": "ghost", "success": true})),
            line(json!({"type": "finish"})),
        ]),
    )
    .await;

    let outcome = session.run(CancellationToken::new()).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ToolProtocolViolation));
}

#[tokio::test]
async fn test_cancel_after_deltas_keeps_exact_prefix() {
    let (store, chat_id, session) = session_with(
        openai(),
        MockReply::ok([openai_text("one "), openai_text("two "), openai_text("three")]).then_hang(),
    )
    .await;

    let handle = session.start();
    let mut views = handle.subscribe();
    views
        .wait_for(|view| view.text == "one two three")
        .await
        .unwrap();

    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.state, SessionState::Cancelled);
    assert_eq!(outcome.message.body, "one two three");
    assert_eq!(outcome.message.status, MessageStatus::Cancelled);

    let history = store.load_history(chat_id).await.unwrap();
    assert_eq!(history[1].body, "one two three");
    assert_eq!(history[1].status, MessageStatus::Cancelled);
}

#[tokio::test]
async fn test_truncated_stream_fails_with_partial_text() {
    let (_, _, session) = session_with(
        openai(),
        MockReply::ok([openai_text("half an ans")]),
    )
    .await;

    let outcome = session.run(CancellationToken::new()).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Transport));
    assert_eq!(outcome.message.body, "half an ans");
    assert!(matches!(
        outcome.message.status,
        MessageStatus::Failed {
            kind: ErrorKind::Transport,
            ..
        }
    ));
}

#[tokio::test]
async fn test_transport_error_mid_stream_keeps_partial_text() {
    let (_, _, session) = session_with(
        openai(),
        MockReply::ok([openai_text("so far")])
            .then_error(ApiError::Transport("connection reset".to_string())),
    )
    .await;

    let outcome = session.run(CancellationToken::new()).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Transport));
    assert_eq!(outcome.message.body, "so far");
}

#[tokio::test]
async fn test_in_stream_error_event_fails_session() {
    let (_, _, session) = session_with(
        openai(),
        MockReply::ok([
            openai_text("before"),
            format!(
                "data: {}\n\n",
                json!({ "error": { "message": "overloaded", "type": "server_error" } })
            ),
        ]),
    )
    .await;

    let outcome = session.run(CancellationToken::new()).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ServerError));
    assert_eq!(outcome.message.body, "before");
}

async fn failing_status(status: u16, body: &str) -> SessionState {
    let (_, _, session) = session_with(openai(), MockReply::status(status, body)).await;
    session.run(CancellationToken::new()).await.state
}

#[tokio::test]
async fn test_non_success_statuses_map_to_kinds() {
    let cases = [
        (401, ErrorKind::Unauthorized),
        (403, ErrorKind::Unauthorized),
        (429, ErrorKind::RateLimited),
        (500, ErrorKind::ServerError),
        (503, ErrorKind::ServerError),
    ];
    for (status, expected) in cases {
        let state = failing_status(status, r#"{"error":{"message":"nope"}}"#).await;
        assert!(
            matches!(state, SessionState::Failed { kind, .. } if kind == expected),
            "status {} gave {:?}",
            status,
            state
        );
    }
}

#[tokio::test]
async fn test_refused_connection_fails_before_streaming() {
    let (store, chat_id, session) = session_with(
        openai(),
        MockReply::refused(ApiError::Transport("connection refused".to_string())),
    )
    .await;

    let outcome = session.run(CancellationToken::new()).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Transport));
    assert!(outcome.message.body.is_empty());

    let history = store.load_history(chat_id).await.unwrap();
    assert!(matches!(history[1].status, MessageStatus::Failed { .. }));
}

#[tokio::test]
async fn test_views_progress_through_states() {
    let (_, _, session) = session_with(
        openai(),
        MockReply::ok([
            openai_text("a"),
            format!(
                "data: {}\n\n",
                json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }] })
            ),
            "data: [DONE]\n\n".to_string(),
        ]),
    )
    .await;

    let handle = session.start();
    let mut views = handle.subscribe();
    let done = views
        .wait_for(|view| view.state.is_terminal())
        .await
        .unwrap()
        .clone();
    assert_eq!(done.state, SessionState::Completed);
    assert_eq!(done.text, "a");
    assert_eq!(done.message_id, handle.message_id());

    assert!(handle.wait().await.unwrap().is_completed());
}

#[tokio::test]
async fn test_deltas_arriving_after_cancel_are_never_applied() {
    let (store, chat_id, session) = session_with(
        openai(),
        MockReply::ok([openai_text("one "), openai_text("two "), openai_text("three")])
            .with_chunk_delay(Duration::from_millis(80)),
    )
    .await;

    let handle = session.start();
    let mut views = handle.subscribe();
    views.wait_for(|view| view.text == "one ").await.unwrap();
    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    // Let the rest of the script play out
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(outcome.state, SessionState::Cancelled);
    assert_eq!(outcome.message.body, "one ");
    let history = store.load_history(chat_id).await.unwrap();
    assert_eq!(history[1].body, "one ");
    assert_eq!(history[1].status, MessageStatus::Cancelled);
}

/// Records how many response bodies were still open when the cancelled
/// message was written
struct TeardownStore {
    inner: InMemoryChatStore,
    transport: MockTransport,
    open_at_cancel: Mutex<Option<usize>>,
}

#[async_trait]
impl ChatStore for TeardownStore {
    async fn create_chat(&self, draft: ChatDraft) -> Result<ChatId> {
        self.inner.create_chat(draft).await
    }

    async fn load_chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.inner.load_chat(chat_id).await
    }

    async fn load_history(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        self.inner.load_history(chat_id).await
    }

    async fn append_message(&self, chat_id: ChatId, message: Message) -> Result<()> {
        self.inner.append_message(chat_id, message).await
    }

    async fn update_message(&self, chat_id: ChatId, message: Message) -> Result<()> {
        if message.status == MessageStatus::Cancelled {
            *self.open_at_cancel.lock().unwrap() = Some(self.transport.open_streams());
        }
        self.inner.update_message(chat_id, message).await
    }
}

#[tokio::test]
async fn test_cancel_drops_connection_before_final_write() {
    let transport = MockTransport::new()
        .with_reply(MockReply::ok([openai_text("partial")]).then_hang());
    let store = Arc::new(TeardownStore {
        inner: InMemoryChatStore::new(),
        transport: transport.clone(),
        open_at_cancel: Mutex::new(None),
    });
    let chat_id = store
        .create_chat(ChatDraft::new(ProviderId::OpenAi, "gpt-4o"))
        .await
        .unwrap();
    store
        .append_message(chat_id, Message::user("hi"))
        .await
        .unwrap();
    let history = store.load_history(chat_id).await.unwrap();

    let handle = CompletionSession::new(
        chat_id,
        openai(),
        Arc::new(transport.clone()),
        store.clone(),
        CompletionRequest::new("gpt-4o", history),
    )
    .start();
    let mut views = handle.subscribe();
    views.wait_for(|view| view.text == "partial").await.unwrap();
    assert_eq!(transport.open_streams(), 1);

    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.state, SessionState::Cancelled);
    assert_eq!(*store.open_at_cancel.lock().unwrap(), Some(0));
}
