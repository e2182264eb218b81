// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Warden - streaming completion core for a multi-provider AI chat client.
//!
//! This crate exposes the shared runtime used by:
//! - the `warden` CLI (`src/main.rs`)
//! - desktop front ends that subscribe to session views
//!
//! Architecture highlights:
//! - `llm`: canonical stream model, frame decoder, per-vendor adapters, transport
//! - `chat`: completion sessions, tool-call tracking, multi-agent fan-out, branching
//! - `config`: settings file, credentials and resilience knobs
//! - `cli`: command-line surface

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;

pub use error::{ApiError, ErrorKind, Result, WardenError};
