// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::Parser;

use arvid_config::AgentMode;

/// arvid — an AI coding agent for your terminal.
///
/// With a PROMPT argument, runs a single turn and exits (suitable for
/// scripting and CI).  Without one, starts an interactive line-oriented
/// session.
#[derive(Debug, Parser)]
#[command(name = "arvid", version, about)]
pub struct Cli {
    /// One-shot prompt; omit for an interactive session
    pub prompt: Option<String>,

    /// Explicit config file (wins over discovered config layers)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Agent mode for this run
    #[arg(long, value_enum)]
    pub mode: Option<AgentMode>,

    /// Continue the most recent session for the working directory
    #[arg(long = "continue")]
    pub continue_latest: bool,

    /// List saved sessions and exit
    #[arg(long)]
    pub list_sessions: bool,

    /// Resume the session with this id
    #[arg(long, value_name = "ID")]
    pub session: Option<String>,

    /// Working directory for the session (default: current directory)
    #[arg(long, value_name = "PATH")]
    pub working_dir: Option<PathBuf>,
}

/// A slash command typed at the interactive prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum SlashCommand {
    Mode(AgentMode),
    Sessions,
    Resume(Option<String>),
    Clear,
    Help,
    Undo,
    History,
}

/// Parse a `/command` line.  Returns `None` for ordinary input and an error
/// string for an unrecognized or malformed command.
pub fn parse_slash_command(line: &str) -> Option<Result<SlashCommand, String>> {
    let line = line.trim();
    if !line.starts_with('/') {
        return None;
    }
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("/");
    let arg = parts.next();
    let parsed = match command {
        "/mode" => match arg {
            Some("plan") => Ok(SlashCommand::Mode(AgentMode::Plan)),
            Some("normal") => Ok(SlashCommand::Mode(AgentMode::Normal)),
            _ => Err("usage: /mode plan|normal".to_string()),
        },
        "/sessions" => Ok(SlashCommand::Sessions),
        "/resume" => Ok(SlashCommand::Resume(arg.map(str::to_string))),
        "/clear" => Ok(SlashCommand::Clear),
        "/help" => Ok(SlashCommand::Help),
        "/undo" => Ok(SlashCommand::Undo),
        "/history" => Ok(SlashCommand::History),
        other => Err(format!("unknown command {other}; try /help")),
    };
    Some(parsed)
}

pub const HELP_TEXT: &str = "\
Commands:
  /mode plan|normal   switch agent mode
  /sessions           list saved sessions
  /resume [id]        resume a session (latest for this directory when no id)
  /clear              start a fresh session
  /undo               revert the last reversible tool effect
  /history            print the current transcript
  /help               this help
Anything else is sent to the agent. Ctrl-D exits.";

// ─── Unit tests ──────────────────────────────────────────────────────────────
