// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Byte transport seam
//!
//! Adapters produce a [`WireRequest`]; a [`Transport`] turns it into a status
//! and a raw byte stream. Nothing here looks at payloads.

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;

use crate::config::settings::ResilienceConfig;
use crate::error::{ApiError, Result, WardenError};
use crate::llm::provider::{HttpMethod, WireRequest};
use crate::llm::providers::common::parse_retry_after_seconds;

/// Raw response body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Status plus streaming body
pub struct TransportResponse {
    pub status: u16,
    /// Retry-After header in seconds, if present
    pub retry_after: Option<u64>,
    pub body: ByteStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into a string (lossy on invalid UTF-8)
    pub async fn text(self) -> Result<String> {
        read_body(self.body).await
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("retry_after", &self.retry_after)
            .finish_non_exhaustive()
    }
}

/// Sends wire requests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<TransportResponse>;
}

/// Collect a byte stream into a string
pub async fn read_body(mut body: ByteStream) -> Result<String> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Map a reqwest failure to a transport-level API error
fn transport_error(err: reqwest::Error) -> WardenError {
    if err.is_timeout() {
        WardenError::Api(ApiError::Timeout)
    } else {
        WardenError::Api(ApiError::Transport(err.to_string()))
    }
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(resilience: &ResilienceConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(resilience.connect_timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: WireRequest) -> Result<TransportResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        tracing::debug!(
            target: "warden.transport",
            method = ?request.method,
            url = %request.url,
            "sending request"
        );

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let retry_after = parse_retry_after_seconds(response.headers());

        tracing::debug!(target: "warden.transport", status, "response headers received");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(transport_error));

        Ok(TransportResponse {
            status,
            retry_after,
            body: Box::pin(body),
        })
    }
}
