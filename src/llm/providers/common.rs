// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ErrorKind};
use crate::llm::provider::StreamEvent;

/// Retry-After used when a 429 carries none
pub(crate) const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Parse numeric Retry-After header (seconds).
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Best-effort human message from a vendor error body.
///
/// Understands `{"error": {"message"}}`, `{"error": "..."}`, `{"message"}` and
/// the Gemini array-wrapped variant; falls back to the raw body.
pub(crate) fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let value = match parsed {
        Some(serde_json::Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
        Some(value) => value,
        None => return body.trim().to_string(),
    };

    value
        .get("error")
        .and_then(|e| {
            e.get("message")
                .and_then(|m| m.as_str())
                .or_else(|| e.as_str())
        })
        .or_else(|| value.get("message").and_then(|m| m.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Vendor error code/type from an error body, if any
pub(crate) fn error_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    ["code", "type", "status"]
        .iter()
        .find_map(|key| error.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Map an HTTP status to an API error
pub(crate) fn status_error(status: u16, message: String, retry_after: Option<u64>) -> ApiError {
    match status {
        401 | 403 => ApiError::Unauthorized(message),
        429 => ApiError::RateLimited(
            retry_after
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
                .min(u32::MAX as u64) as u32,
        ),
        _ => ApiError::ServerError { status, message },
    }
}

/// Standard non-2xx mapping: vendor codes first, then the HTTP status
pub(crate) fn parse_error_body(status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
    let message = error_message(body);
    match error_code(body).as_deref() {
        Some("invalid_api_key" | "authentication_error" | "UNAUTHENTICATED") => {
            ApiError::Unauthorized(message)
        }
        Some("model_not_found" | "not_found_error") if status == 404 => {
            ApiError::ModelNotFound(message)
        }
        _ => status_error(status, message, retry_after),
    }
}

/// Kind of an in-stream vendor error, keyed by its type/code
pub(crate) fn stream_error_kind(code: Option<&str>) -> ErrorKind {
    match code {
        Some(
            "authentication_error" | "invalid_api_key" | "permission_error" | "UNAUTHENTICATED",
        ) => ErrorKind::Unauthorized,
        Some("rate_limit_error" | "rate_limit_exceeded" | "RESOURCE_EXHAUSTED") => {
            ErrorKind::RateLimited
        }
        _ => ErrorKind::ServerError,
    }
}

/// Parse a frame payload, turning malformed JSON into a decode error event
pub(crate) fn parse_frame<T: DeserializeOwned>(data: &str) -> Result<T, StreamEvent> {
    serde_json::from_str(data).map_err(|e| StreamEvent::decode_error(format!("{}: {}", e, data)))
}

/// Join a base URL and a path without doubling slashes
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_seconds(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after_seconds(&headers), Some(12));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after_seconds(&headers), None);
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error":{"message":"bad key","type":"invalid_request_error"}}"#),
            "bad key"
        );
        assert_eq!(error_message(r#"{"error":"model not loaded"}"#), "model not loaded");
        assert_eq!(error_message(r#"{"message":"nope"}"#), "nope");
        assert_eq!(
            error_message(r#"[{"error":{"code":400,"message":"gemini says no"}}]"#),
            "gemini says no"
        );
        assert_eq!(error_message("  upstream timeout \n"), "upstream timeout");
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(401, "x".into(), None),
            ApiError::Unauthorized(_)
        ));
        assert!(matches!(
            status_error(403, "x".into(), None),
            ApiError::Unauthorized(_)
        ));
        assert_eq!(status_error(429, "x".into(), Some(7)), ApiError::RateLimited(7));
        assert_eq!(
            status_error(429, "x".into(), None),
            ApiError::RateLimited(DEFAULT_RETRY_AFTER_SECS as u32)
        );
        assert_eq!(
            status_error(503, "down".into(), None),
            ApiError::ServerError {
                status: 503,
                message: "down".to_string()
            }
        );
    }

    #[test]
    fn test_parse_error_body_prefers_vendor_code() {
        let body = r#"{"error":{"message":"Incorrect API key","code":"invalid_api_key"}}"#;
        assert!(matches!(
            parse_error_body(400, body, None),
            ApiError::Unauthorized(_)
        ));

        let body = r#"{"error":{"message":"The model `gpt-9` does not exist","code":"model_not_found"}}"#;
        assert!(matches!(
            parse_error_body(404, body, None),
            ApiError::ModelNotFound(_)
        ));
    }

    #[test]
    fn test_stream_error_kind() {
        assert_eq!(
            stream_error_kind(Some("overloaded_error")),
            ErrorKind::ServerError
        );
        assert_eq!(
            stream_error_kind(Some("rate_limit_error")),
            ErrorKind::RateLimited
        );
        assert_eq!(stream_error_kind(None), ErrorKind::ServerError);
    }

    #[test]
    fn test_parse_frame_decode_error() {
        let result: Result<serde_json::Value, StreamEvent> = parse_frame("{not json");
        match result {
            Err(StreamEvent::Error { kind, .. }) => assert_eq!(kind, ErrorKind::Decode),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.openai.com/v1/", "/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(join_url("http://localhost:11434", "api/tags"), "http://localhost:11434/api/tags");
    }
}
