// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Scripted transport for testing
//!
//! Plays pre-recorded vendor byte chunks so sessions, dispatchers and branches
//! can be exercised without the network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{ApiError, Result, WardenError};
use crate::llm::provider::WireRequest;
use crate::llm::transport::{Transport, TransportResponse};

/// What the body does after its scripted chunks
#[derive(Debug, Clone, PartialEq)]
pub enum MockTail {
    /// Clean end of stream
    End,
    /// Never yields again (until the reader is dropped)
    Hang,
    /// Yields a transport error
    Error(ApiError),
}

/// One scripted response
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub retry_after: Option<u64>,
    pub chunks: Vec<Vec<u8>>,
    pub tail: MockTail,
    /// Pause before each chunk
    pub chunk_delay: Option<Duration>,
    /// Fail `send` itself instead of returning a response
    pub refuse: Option<ApiError>,
}

impl MockReply {
    /// 200 with the given body chunks
    pub fn ok<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self {
            status: 200,
            retry_after: None,
            chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
            tail: MockTail::End,
            chunk_delay: None,
            refuse: None,
        }
    }

    /// Non-2xx with a single body chunk
    pub fn status(status: u16, body: impl AsRef<[u8]>) -> Self {
        Self {
            status,
            ..Self::ok([body])
        }
    }

    /// Connection-level failure
    pub fn refused(error: ApiError) -> Self {
        Self {
            refuse: Some(error),
            ..Self::ok(Vec::<Vec<u8>>::new())
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn then_hang(mut self) -> Self {
        self.tail = MockTail::Hang;
        self
    }

    pub fn then_error(mut self, error: ApiError) -> Self {
        self.tail = MockTail::Error(error);
        self
    }
}

struct Route {
    /// Substring of the request URL; `None` matches anything
    url_fragment: Option<String>,
    reply: MockReply,
}

/// A transport that answers from a script
#[derive(Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    recorded_requests: Arc<Mutex<Vec<WireRequest>>>,
    open_streams: Arc<AtomicUsize>,
}

/// Held by a response body; counts it as open until the body is dropped
struct OpenStream(Arc<AtomicUsize>);

impl OpenStream {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(target: "warden.mock", "mock transport lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next matching request
    pub fn with_reply(self, reply: MockReply) -> Self {
        self.push(None, reply);
        self
    }

    /// Queue a reply for the next request whose URL contains `url_fragment`
    pub fn with_route(self, url_fragment: impl Into<String>, reply: MockReply) -> Self {
        self.push(Some(url_fragment.into()), reply);
        self
    }

    pub fn push(&self, url_fragment: Option<String>, reply: MockReply) {
        lock(&self.routes).push(Route {
            url_fragment,
            reply,
        });
    }

    /// Requests seen so far, in send order
    pub fn requests(&self) -> Vec<WireRequest> {
        lock(&self.recorded_requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.recorded_requests).len()
    }

    /// Response bodies handed out and not yet dropped
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn take_reply(&self, url: &str) -> Option<MockReply> {
        let mut routes = lock(&self.routes);
        let index = routes.iter().position(|route| {
            route
                .url_fragment
                .as_deref()
                .map_or(true, |fragment| url.contains(fragment))
        })?;
        Some(routes.remove(index).reply)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: WireRequest) -> Result<TransportResponse> {
        let url = request.url.clone();
        lock(&self.recorded_requests).push(request);

        let reply = self.take_reply(&url).ok_or_else(|| {
            WardenError::Api(ApiError::Transport(format!("no scripted reply for {}", url)))
        })?;

        if let Some(error) = reply.refuse {
            return Err(WardenError::Api(error));
        }

        let MockReply {
            status,
            retry_after,
            chunks,
            tail,
            chunk_delay,
            ..
        } = reply;

        let open = OpenStream::new(&self.open_streams);
        let body = async_stream::stream! {
            let _open = open;
            for chunk in chunks {
                if let Some(delay) = chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
            match tail {
                MockTail::End => {}
                MockTail::Hang => futures::future::pending::<()>().await,
                MockTail::Error(error) => yield Err(WardenError::Api(error)),
            }
        };

        Ok(TransportResponse {
            status,
            retry_after,
            body: Box::pin(body),
        })
    }
}
