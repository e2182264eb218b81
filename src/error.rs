// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Warden
//!
//! This module defines all error types used throughout the streaming core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Storage collaborator errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Session errors
    #[error("Session error: {0}")]
    Session(String),
}

/// API-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Connection failure, truncated stream or broken framing
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Authentication failed (invalid or missing API key)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Malformed vendor payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Tool call state machine misuse
    #[error("Tool protocol violation: {0}")]
    ToolProtocolViolation(String),
}

/// Coarse classification shared by stream events, session states and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Unauthorized,
    RateLimited,
    ServerError,
    Decode,
    ToolProtocolViolation,
    Storage,
    Config,
}

impl ErrorKind {
    /// Whether the user can act on this failure (fix a key, wait, retry later)
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Unauthorized | ErrorKind::RateLimited | ErrorKind::ServerError
        )
    }
}

impl ApiError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Transport(_) | ApiError::Timeout => ErrorKind::Transport,
            ApiError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApiError::RateLimited(_) => ErrorKind::RateLimited,
            ApiError::ServerError { .. } | ApiError::ModelNotFound(_) => ErrorKind::ServerError,
            ApiError::Decode(_) => ErrorKind::Decode,
            ApiError::ToolProtocolViolation(_) => ErrorKind::ToolProtocolViolation,
        }
    }
}

impl WardenError {
    /// Classify this error for session state reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            WardenError::Api(api) => api.kind(),
            WardenError::Http(err) if err.is_decode() => ErrorKind::Decode,
            WardenError::Http(_) | WardenError::Io(_) => ErrorKind::Transport,
            WardenError::Json(_) => ErrorKind::Decode,
            WardenError::Storage(_) => ErrorKind::Storage,
            WardenError::Config(_) | WardenError::InvalidInput(_) | WardenError::Session(_) => {
                ErrorKind::Config
            }
        }
    }
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
