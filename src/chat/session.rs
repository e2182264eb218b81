// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Completion session
//!
//! One request's lifecycle: append a placeholder assistant message, send the
//! encoded request, fold decoded events into the message and finalize it.
//! A reader task owns the network; every event it decodes goes through one
//! channel to a single consumer, so events are applied in transport order and
//! nothing is applied after cancellation.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::store::ChatStore;
use crate::chat::streaming::{StreamAccumulator, StreamEventResult};
use crate::chat::tool_calls::ToolExecutor;
use crate::error::{ApiError, ErrorKind, Result, WardenError};
use crate::llm::message::{Chat, ChatId, Message, MessageStatus, Provenance, ToolCallRecord};
use crate::llm::provider::{
    CompletionRequest, FinishReason, ProviderAdapter, StreamEvent, ToolSpec, WireRequest,
};
use crate::llm::transport::Transport;

/// Longest silence tolerated between chunks unless configured otherwise
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

const CHANNEL_CAPACITY: usize = 64;

/// Session lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed {
        kind: ErrorKind,
        message: String,
    },
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed { .. } | SessionState::Cancelled
        )
    }
}

/// Snapshot published to observers after every applied batch
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub message_id: Uuid,
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub state: SessionState,
}

impl SessionView {
    fn of(message: &Message, state: &SessionState) -> Self {
        Self {
            message_id: message.id,
            text: message.body.clone(),
            reasoning: message.reasoning.clone(),
            tool_calls: message.tool_calls.clone(),
            state: state.clone(),
        }
    }
}

/// Terminal state plus the message as finalized
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub message: Message,
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.state {
            SessionState::Failed { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Work items for the session consumer
#[derive(Debug)]
enum Input {
    /// First byte of the body arrived
    Receiving,
    Events(Vec<StreamEvent>),
    ToolResult {
        id: String,
        success: bool,
        payload: Option<String>,
    },
    /// Body ended
    Eof,
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

/// Aborts the reader (and so drops the connection) when the consumer exits
struct ReaderTask(JoinHandle<()>);

impl ReaderTask {
    /// Abort the reader and wait until its connection has been dropped
    async fn stop(mut self) {
        self.0.abort();
        let _ = (&mut self.0).await;
    }
}

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Controller for one completion request
pub struct CompletionSession {
    chat_id: ChatId,
    adapter: Arc<dyn ProviderAdapter>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ChatStore>,
    request: CompletionRequest,
    message: Message,
    executor: Option<Arc<dyn ToolExecutor>>,
    idle_timeout: Duration,
}

impl CompletionSession {
    pub fn new(
        chat_id: ChatId,
        adapter: Arc<dyn ProviderAdapter>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ChatStore>,
        request: CompletionRequest,
    ) -> Self {
        let provenance = Provenance::new(adapter.id(), request.model.clone());
        Self {
            chat_id,
            adapter,
            transport,
            store,
            request,
            message: Message::placeholder(provenance),
            executor: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Session continuing `chat` with its model, settings and system prompt
    pub fn for_chat(
        chat: &Chat,
        adapter: Arc<dyn ProviderAdapter>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ChatStore>,
        tools: Vec<ToolSpec>,
    ) -> Self {
        let mut request = CompletionRequest::new(chat.model.clone(), chat.messages.clone())
            .with_settings(chat.settings)
            .with_tools(tools);
        if let Some(ref system) = chat.system_prompt {
            request = request.with_system(system.clone());
        }
        Self::new(chat.id, adapter, transport, store, request)
    }

    /// Mark the reply as one of several parallel answers
    pub fn with_group(mut self, group_id: Uuid) -> Self {
        if let Some(provenance) = self.message.provenance.as_mut() {
            provenance.group_id = Some(group_id);
        }
        self
    }

    pub fn with_tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Id of the assistant message this session writes
    pub fn message_id(&self) -> Uuid {
        self.message.id
    }

    /// Spawn the session and return a handle to observe and control it
    pub fn start(self) -> SessionHandle {
        let cancel = CancellationToken::new();
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (view_tx, view_rx) = watch::channel(SessionView::of(&self.message, &SessionState::Idle));
        let message_id = self.message.id;

        let task = tokio::spawn(self.drive(cancel.clone(), input_tx.clone(), input_rx, view_tx));

        SessionHandle {
            message_id,
            cancel,
            input: input_tx,
            view: view_rx,
            task,
        }
    }

    /// Drive the session on the current task
    pub async fn run(self, cancel: CancellationToken) -> SessionOutcome {
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (view_tx, _) = watch::channel(SessionView::of(&self.message, &SessionState::Idle));
        self.drive(cancel, input_tx, input_rx, view_tx).await
    }

    async fn drive(
        self,
        cancel: CancellationToken,
        input_tx: mpsc::Sender<Input>,
        mut input_rx: mpsc::Receiver<Input>,
        view_tx: watch::Sender<SessionView>,
    ) -> SessionOutcome {
        let CompletionSession {
            chat_id,
            adapter,
            transport,
            store,
            request,
            message,
            executor,
            idle_timeout,
        } = self;

        tracing::debug!(
            target: "warden.chat.session",
            chat_id = %chat_id,
            message_id = %message.id,
            provider = %adapter.id(),
            model = %request.model,
            "session starting"
        );

        let mut driver = Driver {
            chat_id,
            store,
            acc: StreamAccumulator::new(message),
            state: SessionState::Idle,
            view_tx,
        };

        if let Err(err) = driver
            .store
            .append_message(chat_id, driver.acc.message().clone())
            .await
        {
            return driver.abandon(err);
        }
        driver.set_state(SessionState::Sending);

        let wire = match adapter.encode(&request) {
            Ok(wire) => wire,
            Err(err) => return driver.fail(err.kind(), err.to_string()).await,
        };

        let mut reader = ReaderTask(tokio::spawn(read_stream(
            adapter,
            transport,
            wire,
            input_tx,
            idle_timeout,
        )));

        loop {
            let input = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    reader.stop().await;
                    return driver.cancel().await;
                }
                input = input_rx.recv() => input,
                _ = &mut reader.0 => None,
            };

            match input {
                Some(Input::Receiving) => driver.set_state(SessionState::Streaming),
                Some(Input::Events(events)) => {
                    let mut tools_changed = false;
                    for event in events {
                        match driver.acc.process_event(event) {
                            Ok(StreamEventResult::Content) | Ok(StreamEventResult::Ignored) => {}
                            Ok(StreamEventResult::Tool { status_changed }) => {
                                tools_changed |= status_changed;
                            }
                            Ok(StreamEventResult::Finished(reason)) => {
                                drop(reader);
                                return driver.on_finish(reason, executor, &cancel).await;
                            }
                            Ok(StreamEventResult::Error { kind, message }) => {
                                return driver.fail(kind, message).await;
                            }
                            Err(violation) => {
                                return driver.fail(violation.kind(), violation.to_string()).await;
                            }
                        }
                    }
                    driver.publish();
                    if tools_changed {
                        driver.persist().await;
                    }
                }
                Some(Input::ToolResult {
                    id,
                    success,
                    payload,
                }) => {
                    let applied = driver
                        .acc
                        .with_tools(|tools| tools.complete(&id, success, payload));
                    if let Err(violation) = applied {
                        return driver.fail(violation.kind(), violation.to_string()).await;
                    }
                    driver.publish();
                    driver.persist().await;
                }
                Some(Input::Eof) => {
                    return driver
                        .fail(
                            ErrorKind::Transport,
                            "stream ended before the response finished".to_string(),
                        )
                        .await;
                }
                Some(Input::Failed { kind, message }) => return driver.fail(kind, message).await,
                None => {
                    return driver
                        .fail(ErrorKind::Transport, "stream reader stopped".to_string())
                        .await;
                }
            }
        }
    }
}

/// Consumer-side state of a running session
struct Driver {
    chat_id: ChatId,
    store: Arc<dyn ChatStore>,
    acc: StreamAccumulator,
    state: SessionState,
    view_tx: watch::Sender<SessionView>,
}

impl Driver {
    fn publish(&self) {
        self.view_tx
            .send_replace(SessionView::of(self.acc.message(), &self.state));
    }

    fn set_state(&mut self, state: SessionState) {
        tracing::debug!(
            target: "warden.chat.session",
            message_id = %self.acc.message().id,
            state = ?state,
            "session state"
        );
        self.state = state;
        self.publish();
    }

    /// Intermediate write; the terminal write decides the outcome
    async fn persist(&self) {
        if let Err(err) = self
            .store
            .update_message(self.chat_id, self.acc.message().clone())
            .await
        {
            tracing::warn!(
                target: "warden.chat.session",
                message_id = %self.acc.message().id,
                error = %err,
                "failed to persist streaming message"
            );
        }
    }

    async fn on_finish(
        mut self,
        reason: FinishReason,
        executor: Option<Arc<dyn ToolExecutor>>,
        cancel: &CancellationToken,
    ) -> SessionOutcome {
        tracing::debug!(
            target: "warden.chat.session",
            message_id = %self.acc.message().id,
            finish_reason = ?reason,
            "stream finished"
        );

        let pending: Vec<(String, String, String)> = self
            .acc
            .tools()
            .pending()
            .into_iter()
            .map(|call| (call.id.clone(), call.name.clone(), call.arguments.clone()))
            .collect();

        if !pending.is_empty() {
            let Some(executor) = executor else {
                let names: Vec<&str> = pending.iter().map(|(_, name, _)| name.as_str()).collect();
                return self
                    .fail(
                        ErrorKind::ToolProtocolViolation,
                        format!(
                            "stream finished with tool calls still pending: {}",
                            names.join(", ")
                        ),
                    )
                    .await;
            };

            for (id, name, arguments) in pending {
                if let Err(violation) = self.acc.with_tools(|tools| tools.start_executing(&id)) {
                    return self.fail(violation.kind(), violation.to_string()).await;
                }
                self.publish();
                self.persist().await;

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return self.cancel().await,
                    result = executor.execute(&name, &arguments) => result,
                };

                let applied = match result {
                    Ok(outcome) => self
                        .acc
                        .with_tools(|tools| tools.complete(&id, outcome.success, outcome.payload)),
                    Err(err) => {
                        tracing::warn!(
                            target: "warden.chat.session",
                            tool = %name,
                            error = %err,
                            "tool execution failed"
                        );
                        self.acc.with_tools(|tools| tools.fail(&id, err.to_string()))
                    }
                };
                if let Err(violation) = applied {
                    return self.fail(violation.kind(), violation.to_string()).await;
                }
                self.publish();
                self.persist().await;
            }
        }

        self.finalize(MessageStatus::Complete, SessionState::Completed)
            .await
    }

    async fn fail(self, kind: ErrorKind, message: String) -> SessionOutcome {
        tracing::warn!(
            target: "warden.chat.session",
            message_id = %self.acc.message().id,
            kind = ?kind,
            error = %message,
            "session failed"
        );
        self.finalize(
            MessageStatus::Failed {
                kind,
                message: message.clone(),
            },
            SessionState::Failed { kind, message },
        )
        .await
    }

    async fn cancel(self) -> SessionOutcome {
        tracing::debug!(
            target: "warden.chat.session",
            message_id = %self.acc.message().id,
            "session cancelled"
        );
        self.finalize(MessageStatus::Cancelled, SessionState::Cancelled)
            .await
    }

    async fn finalize(mut self, status: MessageStatus, state: SessionState) -> SessionOutcome {
        self.acc.message_mut().status = status;
        let state = match self
            .store
            .update_message(self.chat_id, self.acc.message().clone())
            .await
        {
            Ok(()) => state,
            Err(err) => {
                tracing::error!(
                    target: "warden.chat.session",
                    message_id = %self.acc.message().id,
                    error = %err,
                    "failed to persist final message"
                );
                let message = err.to_string();
                self.acc.message_mut().status = MessageStatus::Failed {
                    kind: ErrorKind::Storage,
                    message: message.clone(),
                };
                SessionState::Failed {
                    kind: ErrorKind::Storage,
                    message,
                }
            }
        };
        self.state = state;
        self.publish();
        SessionOutcome {
            state: self.state,
            message: self.acc.into_message(),
        }
    }

    /// The placeholder never reached the store; nothing to update
    fn abandon(mut self, err: WardenError) -> SessionOutcome {
        tracing::error!(
            target: "warden.chat.session",
            chat_id = %self.chat_id,
            error = %err,
            "failed to append assistant placeholder"
        );
        let message = err.to_string();
        let kind = err.kind();
        self.acc.message_mut().status = MessageStatus::Failed {
            kind,
            message: message.clone(),
        };
        self.state = SessionState::Failed { kind, message };
        self.publish();
        SessionOutcome {
            state: self.state,
            message: self.acc.into_message(),
        }
    }
}

/// Reader task: the only place the event path waits on the network
async fn read_stream(
    adapter: Arc<dyn ProviderAdapter>,
    transport: Arc<dyn Transport>,
    request: WireRequest,
    tx: mpsc::Sender<Input>,
    idle_timeout: Duration,
) {
    if let Err(err) = pump(adapter.as_ref(), transport.as_ref(), request, &tx, idle_timeout).await
    {
        let _ = tx
            .send(Input::Failed {
                kind: err.kind(),
                message: err.to_string(),
            })
            .await;
    }
}

fn idle_error(idle_timeout: Duration) -> WardenError {
    WardenError::Api(ApiError::Transport(format!(
        "no data received for {}s",
        idle_timeout.as_secs()
    )))
}

async fn pump(
    adapter: &dyn ProviderAdapter,
    transport: &dyn Transport,
    request: WireRequest,
    tx: &mpsc::Sender<Input>,
    idle_timeout: Duration,
) -> Result<()> {
    let response = timeout(idle_timeout, transport.send(request))
        .await
        .map_err(|_| WardenError::Api(ApiError::Timeout))??;

    if !response.is_success() {
        let status = response.status;
        let retry_after = response.retry_after;
        let body = match timeout(idle_timeout, response.text()).await {
            Ok(Ok(body)) => body,
            _ => String::new(),
        };
        return Err(WardenError::Api(adapter.parse_error(status, &body, retry_after)));
    }

    let mut body = response.body;
    let mut decoder = adapter.new_decoder();
    let mut receiving = false;

    loop {
        let chunk = timeout(idle_timeout, body.next())
            .await
            .map_err(|_| idle_error(idle_timeout))?;

        let Some(chunk) = chunk else {
            let events = adapter.decode_eof(&mut decoder)?;
            if !events.is_empty() && tx.send(Input::Events(events)).await.is_err() {
                return Ok(());
            }
            let _ = tx.send(Input::Eof).await;
            return Ok(());
        };

        let chunk = chunk?;
        if !receiving {
            receiving = true;
            if tx.send(Input::Receiving).await.is_err() {
                return Ok(());
            }
        }

        let events = adapter.decode(&chunk, &mut decoder)?;
        if !events.is_empty() && tx.send(Input::Events(events)).await.is_err() {
            // Consumer is gone (finished or cancelled)
            return Ok(());
        }
    }
}

/// Handle to a spawned session
pub struct SessionHandle {
    message_id: Uuid,
    cancel: CancellationToken,
    input: mpsc::Sender<Input>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Request cancellation; partial content is kept
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest published view
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.view.borrow().state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Stream of views, starting with the current one
    pub fn updates(&self) -> WatchStream<SessionView> {
        WatchStream::new(self.view.clone())
    }

    /// Feed a client-side tool result into the session
    pub async fn report_tool_result(
        &self,
        id: impl Into<String>,
        success: bool,
        payload: Option<String>,
    ) -> Result<()> {
        self.input
            .send(Input::ToolResult {
                id: id.into(),
                success,
                payload,
            })
            .await
            .map_err(|_| WardenError::Session("session has already finished".to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> Result<SessionOutcome> {
        self.task
            .await
            .map_err(|e| WardenError::Session(format!("session task failed: {}", e)))
    }
}
