// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use arvid_config::Config;
use arvid_core::{Agent, AgentEvent, Session, SessionStore, TurnOutcome};
use arvid_model::{MockProvider, OpenAiCompatProvider, Provider};
use arvid_tools::{ApprovalReply, ToolRegistry};

use cli::{parse_slash_command, Cli, SlashCommand, HELP_TEXT};

#[tokio::main]
async fn main() -> ExitCode {
    // Invalid invocations exit with code 2 via clap.
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("arvid: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = arvid_config::load(cli.config.as_deref())?;
    if let Some(mode) = cli.mode {
        config.agent.default_mode = mode;
    }

    let store = SessionStore::from_config(&config.store);
    if cli.list_sessions {
        for summary in store.list()? {
            println!(
                "{}  {}  [{} msgs]  {}",
                summary.id,
                summary.updated_at.format("%Y-%m-%d %H:%M"),
                summary.message_count,
                summary.title
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let working_dir = match cli.working_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };

    let session = if let Some(id) = &cli.session {
        store
            .load(id)
            .with_context(|| format!("resuming session {id}"))?
    } else if cli.continue_latest {
        match store.continue_latest(&working_dir)? {
            Some(session) => session,
            None => Session::new(&working_dir),
        }
    } else {
        Session::new(&working_dir)
    };

    let provider = build_provider(&config)?;
    let registry = Arc::new(ToolRegistry::with_builtins());
    let mut agent = Agent::new(provider, registry, config, session, store);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if let Some(prompt) = cli.prompt {
        let outcome = run_turn(&mut agent, &prompt, &mut lines).await?;
        return Ok(match outcome {
            TurnOutcome::Completed => ExitCode::SUCCESS,
            _ => ExitCode::from(1),
        });
    }

    println!(
        "arvid {} — session {} ({} mode). /help for commands.",
        env!("CARGO_PKG_VERSION"),
        agent.session().id,
        agent.mode()
    );
    loop {
        print!("arvid> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match parse_slash_command(&line) {
            Some(Err(message)) => println!("{message}"),
            Some(Ok(command)) => handle_command(&mut agent, command)?,
            None => {
                run_turn(&mut agent, &line, &mut lines).await?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn Provider>> {
    match config.model.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider)),
        "openai_compat" => Ok(Arc::new(OpenAiCompatProvider::from_config(&config.model))),
        other => anyhow::bail!("unknown model provider '{other}'"),
    }
}

fn handle_command(agent: &mut Agent, command: SlashCommand) -> anyhow::Result<()> {
    match command {
        SlashCommand::Mode(mode) => {
            agent.set_mode(mode);
            println!("mode: {mode}");
        }
        SlashCommand::Sessions => {
            for summary in agent.store().list()? {
                println!(
                    "{}  {}  [{} msgs]  {}",
                    summary.id,
                    summary.updated_at.format("%Y-%m-%d %H:%M"),
                    summary.message_count,
                    summary.title
                );
            }
        }
        SlashCommand::Resume(id) => {
            let store = agent.store();
            let session = match id {
                Some(id) => Some(store.load(&id)?),
                None => {
                    let cwd = agent.session().working_directory.clone();
                    store.continue_latest(&cwd)?
                }
            };
            match session {
                Some(session) => {
                    println!("resumed session {} ({} messages)", session.id, session.messages.len());
                    agent.replace_session(session);
                }
                None => println!("no session to resume for this directory"),
            }
        }
        SlashCommand::Clear => {
            agent.clear()?;
            println!("started fresh session {}", agent.session().id);
        }
        SlashCommand::Help => println!("{HELP_TEXT}"),
        SlashCommand::Undo => match agent.undo_last()? {
            Some(message) => println!("{message}"),
            None => println!("nothing to undo"),
        },
        SlashCommand::History => {
            for msg in &agent.session().messages {
                match msg.as_text() {
                    Some(text) => println!("[{:?}] {text}", msg.role()),
                    None => println!("[{:?}] (tool traffic)", msg.role()),
                }
            }
        }
    }
    Ok(())
}

/// Drive one turn: feed events to the terminal as they arrive and answer
/// approval questions from stdin.  Ctrl-C cancels the turn.
async fn run_turn(
    agent: &mut Agent,
    text: &str,
    lines: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<TurnOutcome> {
    let broker = agent.approval_broker();
    let cancel = agent.cancel_token();
    let (tx, mut rx) = mpsc::channel(256);
    let turn = agent.start_turn(text, tx);
    tokio::pin!(turn);

    loop {
        tokio::select! {
            result = &mut turn => {
                while let Ok(ev) = rx.try_recv() {
                    print_event(&ev);
                }
                return result;
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("^C — cancelling turn");
                cancel.cancel();
            }
            Some(ev) = rx.recv() => {
                print_event(&ev);
                if let AgentEvent::ApprovalRequest { id, tool_name, .. } = &ev {
                    let reply = read_approval(lines, tool_name).await?;
                    broker.resolve(id, reply);
                }
            }
        }
    }
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::AssistantText(text) => println!("{text}"),
        AgentEvent::ToolCallStarted {
            tool_name,
            arguments,
            ..
        } => {
            println!(
                "· {tool_name} {}",
                serde_json::Value::Object(arguments.clone())
            );
        }
        AgentEvent::ApprovalRequest {
            tool_name,
            arguments,
            ..
        } => {
            println!(
                "approval needed: {tool_name} {}",
                serde_json::Value::Object(arguments.clone())
            );
        }
        AgentEvent::ToolCallFinished {
            tool_name,
            success,
            output,
            ..
        } => {
            let status = if *success { "ok" } else { "failed" };
            let first = output.lines().next().unwrap_or("");
            println!("· {tool_name} {status}: {first}");
        }
        AgentEvent::CompactionPerformed {
            tokens_before,
            tokens_after,
        } => {
            println!("context compacted: {tokens_before} → {tokens_after} tokens");
        }
        AgentEvent::ContextWarning {
            total_tokens,
            limit,
        } => {
            println!("context is filling up: {total_tokens} of {limit} tokens");
        }
        AgentEvent::TurnCompleted => {}
        AgentEvent::TurnAborted { reason } => println!("turn aborted: {reason}"),
        AgentEvent::TurnCancelled => println!("turn cancelled"),
    }
}

async fn read_approval(
    lines: &mut Lines<BufReader<Stdin>>,
    tool_name: &str,
) -> anyhow::Result<ApprovalReply> {
    print!("run {tool_name}? [y]es / [n]o / [a]lways this session / [d]eny this session: ");
    std::io::stdout().flush().ok();
    let answer = lines.next_line().await?.unwrap_or_default();
    Ok(match answer.trim() {
        "y" | "yes" => ApprovalReply::Yes,
        "a" | "always" => ApprovalReply::YesRememberSession,
        "d" | "deny" => ApprovalReply::NoRememberSession,
        _ => ApprovalReply::No,
    })
}
