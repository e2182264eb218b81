// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! Defines all command-line arguments and subcommands for Warden.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::WardenError;
use crate::llm::provider::ProviderId;
use crate::llm::reasoning::ReasoningEffort;

/// Warden - one chat front end for many model vendors
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about = "Stream chats from many model vendors")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to ~/.warden/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chat with one model (interactive when no prompt is given)
    Chat(ChatArgs),

    /// Ask several models the same question at once
    Multi(MultiArgs),

    /// List the models a provider offers
    Models(ModelsArgs),
}

/// Arguments for the chat subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// Prompt to send; omit for an interactive session
    pub prompt: Option<String>,

    /// Provider to use (openai, anthropic, google, ...)
    #[arg(short, long)]
    pub provider: Option<ProviderId>,

    /// Model to use
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt for this chat
    #[arg(long)]
    pub system: Option<String>,

    /// Reasoning level (off, low, medium, high, extra-high)
    #[arg(long)]
    pub reasoning: Option<ReasoningEffort>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,
}

/// Arguments for the multi subcommand
#[derive(clap::Args, Debug)]
pub struct MultiArgs {
    /// Prompt to send to every target
    pub prompt: String,

    /// Target as provider or provider:model (repeat for each agent)
    #[arg(short, long = "target", required = true)]
    pub targets: Vec<TargetArg>,
}

/// Arguments for the models subcommand
#[derive(clap::Args, Debug)]
pub struct ModelsArgs {
    /// Provider to list (defaults to every configured provider)
    #[arg(short, long)]
    pub provider: Option<ProviderId>,
}

/// `provider[:model]` on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetArg {
    pub provider: ProviderId,
    pub model: Option<String>,
}

impl FromStr for TargetArg {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Model ids may contain ':' themselves (ollama tags), so split once
        let (provider, model) = match s.split_once(':') {
            Some((provider, model)) => (provider, Some(model.trim())),
            None => (s, None),
        };
        Ok(Self {
            provider: provider.parse()?,
            model: model.filter(|m| !m.is_empty()).map(str::to_string),
        })
    }
}
