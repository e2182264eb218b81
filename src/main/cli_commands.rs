// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Subcommand runners for the warden binary

use std::io::{self, BufRead, Write};

use futures::StreamExt;
use warden::chat::{AgentTarget, ChatEngine, SessionHandle, SessionOutcome, SessionState};
use warden::cli::{ChatArgs, ModelsArgs, MultiArgs};
use warden::error::Result;
use warden::llm::message::{ChatId, MessageStatus, ToolCallStatus};

/// Print a reply as it streams; Ctrl-C cancels it
async fn stream_reply(handle: SessionHandle) -> Result<SessionOutcome> {
    let mut updates = handle.updates();
    let mut printed = 0;
    let mut stdout = io::stdout();

    loop {
        tokio::select! {
            view = updates.next() => {
                let Some(view) = view else { break };
                if view.text.len() > printed {
                    write!(stdout, "{}", &view.text[printed..])?;
                    stdout.flush()?;
                    printed = view.text.len();
                }
                if view.state.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => handle.cancel(),
        }
    }

    let outcome = handle.wait().await?;
    writeln!(stdout)?;
    print_tool_calls(&outcome);
    match &outcome.state {
        SessionState::Failed { kind, message } => eprintln!("error ({:?}): {}", kind, message),
        SessionState::Cancelled => eprintln!("[cancelled]"),
        _ => {}
    }
    Ok(outcome)
}

fn print_tool_calls(outcome: &SessionOutcome) {
    for call in &outcome.message.tool_calls {
        let status = match &call.status {
            ToolCallStatus::Calling { .. } => "called".to_string(),
            ToolCallStatus::Executing { .. } => "running".to_string(),
            ToolCallStatus::Completed { success, .. } => {
                if *success { "ok" } else { "unsuccessful" }.to_string()
            }
            ToolCallStatus::Failed { error, .. } => format!("failed: {}", error),
        };
        eprintln!("[tool {} {}]", call.name, status);
    }
}

pub async fn run_chat(engine: &ChatEngine, args: ChatArgs) -> Result<()> {
    let chat_id = engine.create_chat(args.provider, args.model).await?;

    if let Some(prompt) = args.prompt {
        stream_reply(engine.send(chat_id, &prompt).await?).await?;
        return Ok(());
    }

    run_interactive(engine, chat_id).await
}

async fn run_interactive(engine: &ChatEngine, chat_id: ChatId) -> Result<()> {
    let chat = engine.store().load_chat(chat_id).await?;
    eprintln!(
        "Chatting with {}/{}. Type /quit to exit, Ctrl-C cancels a reply.",
        chat.provider, chat.model
    );

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            _ => {}
        }

        match engine.send(chat_id, line).await {
            Ok(handle) => {
                stream_reply(handle).await?;
            }
            Err(err) => eprintln!("error: {}", err),
        }
    }
    Ok(())
}

pub async fn run_multi(engine: &ChatEngine, args: MultiArgs) -> Result<()> {
    let chat_id = engine.create_chat(None, None).await?;
    let targets: Vec<AgentTarget> = args
        .targets
        .into_iter()
        .map(|t| {
            let model = t
                .model
                .unwrap_or_else(|| engine.settings().default_model(t.provider));
            AgentTarget::new(t.provider, model)
        })
        .collect();

    let turn = engine.send_multi(chat_id, &args.prompt, targets).await?;
    let tokens: Vec<_> = turn
        .agents()
        .iter()
        .filter_map(|agent| agent.handle())
        .map(|handle| handle.cancellation_token())
        .collect();

    let wait = turn.wait_all();
    tokio::pin!(wait);
    let outcomes = tokio::select! {
        outcomes = &mut wait => outcomes,
        _ = tokio::signal::ctrl_c() => {
            tokens.iter().for_each(|token| token.cancel());
            wait.await
        }
    };

    for outcome in outcomes {
        println!("== {} ==", outcome.target);
        match outcome.result {
            Ok(session) => {
                println!("{}", session.message.body);
                if let MessageStatus::Failed { kind, message } = &session.message.status {
                    eprintln!("error ({:?}): {}", kind, message);
                } else if session.message.status == MessageStatus::Cancelled {
                    eprintln!("[cancelled]");
                }
            }
            Err(err) => eprintln!("error: {}", err),
        }
        println!();
    }
    Ok(())
}

pub async fn run_models(engine: &ChatEngine, args: ModelsArgs) -> Result<()> {
    let providers = match args.provider {
        Some(provider) => vec![provider],
        None => engine.registry().providers(),
    };

    for provider in providers {
        match engine.fetch_models(provider).await {
            Ok(models) => {
                println!("{}:", provider);
                for model in models {
                    println!("  {}", model);
                }
            }
            Err(err) => eprintln!("{}: {}", provider, err),
        }
    }
    Ok(())
}
