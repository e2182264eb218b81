// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Warden - one chat front end for many model vendors
//!
//! Entry point for the Warden CLI application.

use clap::Parser;

use warden::chat::ChatEngine;
use warden::cli::{Cli, Commands};
use warden::config::Settings;
use warden::error::Result;

#[path = "main/cli_commands.rs"]
mod cli_commands;

use cli_commands::{run_chat, run_models, run_multi};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` turns on session and transport diagnostics, `-vv` everything.
    // `RUST_LOG` still applies on top.
    let directives: &[&str] = match cli.verbose {
        0 => &[],
        1 => &[
            "warden.chat.session=debug",
            "warden.chat.multi_agent=debug",
            "warden.chat.branching=debug",
            "warden.transport=debug",
        ],
        _ => &["warden=trace"],
    };
    for directive in directives {
        if let Ok(parsed) = directive.parse() {
            env_filter = env_filter.add_directive(parsed);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut settings = match cli.config {
        Some(ref path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Chat(args) => {
            if let Some(ref system) = args.system {
                settings.defaults.system_prompt = Some(system.clone());
            }
            if let Some(reasoning) = args.reasoning {
                settings.defaults.reasoning_effort = reasoning;
            }
            if let Some(temperature) = args.temperature {
                settings.defaults.temperature = Some(temperature);
            }
            let engine = ChatEngine::from_settings(settings)?;
            run_chat(&engine, args).await
        }
        Commands::Multi(args) => {
            let engine = ChatEngine::from_settings(settings)?;
            run_multi(&engine, args).await
        }
        Commands::Models(args) => {
            let engine = ChatEngine::from_settings(settings)?;
            run_models(&engine, args).await
        }
    }
}
