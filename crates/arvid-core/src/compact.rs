// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Threshold-driven compaction of the transcript.
//!
//! When the token accountant reports the trigger crossed, the transcript is
//! partitioned into a recent tail (kept verbatim) and an old prefix, and the
//! prefix is replaced with a single summary message.  Exactly one summary is
//! retained at a time: a later compaction summarizes the previous summary
//! together with the newly-old segment, which keeps the operation
//! idempotent.
//!
//! Two summarizers exist: the model itself with a dedicated instruction, and
//! a deterministic rule-based extractor that is also the mandatory fallback
//! when the model call fails or returns nothing.  Compaction therefore never
//! depends on provider availability.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use arvid_config::ApprovalRule;
use arvid_model::{Message, MessageBody, Provider, Role};

use crate::session::Session;

const SUMMARIZE_INSTRUCTION: &str = "\
You are compacting the conversation history of a coding agent. Produce a \
dense summary that will replace the messages below. You MUST preserve: \
every file created or modified with a one-line description; every \
unresolved error or open question; the user's current stated objective; \
pending todo items; any approval rules established. You may discard verbose \
prose already acted upon, superseded intermediate reasoning, and duplicated \
tool outputs.";

/// Produces the summary text for an old transcript segment.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        old: &[Message],
        rules: &[ApprovalRule],
    ) -> anyhow::Result<String>;
}

/// Summarizes by asking the model with a dedicated instruction.
pub struct LlmSummarizer {
    provider: Arc<dyn Provider>,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        old: &[Message],
        rules: &[ApprovalRule],
    ) -> anyhow::Result<String> {
        let mut history = serialize_history(old);
        if !rules.is_empty() {
            history.push_str("\n\nApproval rules established:\n");
            for rule in rules {
                history.push_str(&format!(
                    "- {}: {} ({:?})\n",
                    rule.tool, rule.pattern, rule.decision
                ));
            }
        }
        let req = arvid_model::CompletionRequest {
            messages: vec![
                Message::system(SUMMARIZE_INSTRUCTION),
                Message::user(history),
            ],
            tools: vec![],
        };
        let completion = self.provider.complete(req).await?;
        anyhow::ensure!(!completion.content.trim().is_empty(), "empty summary");
        Ok(completion.content)
    }
}

/// Deterministic extractor used when no model is available (or the model
/// summarizer failed).  Walks the old segment and keeps exactly the facts
/// the compaction contract requires.
pub struct RuleBasedSummarizer;

#[async_trait]
impl Summarizer for RuleBasedSummarizer {
    async fn summarize(
        &self,
        old: &[Message],
        rules: &[ApprovalRule],
    ) -> anyhow::Result<String> {
        Ok(extract_summary(old, rules))
    }
}

/// Outcome of one compaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Transcript unchanged: nothing old enough to fold away.
    Unchanged,
    /// The old prefix was replaced with a summary message.
    Compacted,
}

/// Replace the old transcript prefix with one summary message, keeping the
/// last `keep_recent` messages verbatim.  The split never lands inside a
/// tool-call/tool-result group; it moves back to the enclosing turn
/// boundary so no orphaned tool message survives on either side.
pub async fn compact_session(
    session: &mut Session,
    summarizer: &dyn Summarizer,
    keep_recent: usize,
) -> CompactionOutcome {
    let n = session.messages.len();
    if n <= keep_recent {
        return CompactionOutcome::Unchanged;
    }
    let mut split = n - keep_recent;
    while split > 0 && session.messages[split].is_tool_message() {
        split -= 1;
    }
    if split == 0 {
        return CompactionOutcome::Unchanged;
    }
    // Re-running compaction on an already-compacted transcript finds only
    // the previous summary in the old segment; replacing it with a summary
    // of itself must be the identity.
    if split == 1 && session.messages[0].is_compaction_summary() {
        return CompactionOutcome::Unchanged;
    }

    let old: Vec<Message> = session.messages[..split].to_vec();
    let recent: Vec<Message> = session.messages[split..].to_vec();

    let summary_text = match summarizer.summarize(&old, &session.approval_rules).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!("summarizer returned an empty summary; using rule-based extractor");
            extract_summary(&old, &session.approval_rules)
        }
        Err(e) => {
            warn!(error = %e, "summarizer failed; using rule-based extractor");
            extract_summary(&old, &session.approval_rules)
        }
    };

    let mut rebuilt = Vec::with_capacity(recent.len() + 1);
    rebuilt.push(Message::compaction_summary(summary_text));
    rebuilt.extend(recent);
    session.messages = rebuilt;
    CompactionOutcome::Compacted
}

/// Serialize a message list into plain text for a summarization prompt.
pub fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let (role, text) = match &m.body {
                MessageBody::User { content } => ("User", content.clone()),
                MessageBody::Assistant { content, .. } => ("Assistant", content.clone()),
                MessageBody::System { content, .. } => ("System", content.clone()),
                MessageBody::ToolCall {
                    name, arguments, ..
                } => (
                    "Tool",
                    format!(
                        "[call {name}({})]",
                        serde_json::Value::Object(arguments.clone())
                    ),
                ),
                MessageBody::ToolResult {
                    success, content, ..
                } => (
                    "Tool",
                    format!(
                        "[{} result: {content}]",
                        if *success { "ok" } else { "failed" }
                    ),
                ),
            };
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Rule-based extraction ────────────────────────────────────────────────────

fn extract_summary(old: &[Message], rules: &[ApprovalRule]) -> String {
    let mut out = String::from("Conversation summary (compacted):\n");

    if let Some(carried) = old.first().filter(|m| m.is_compaction_summary()) {
        if let Some(text) = carried.as_text() {
            out.push_str("\nCarried from the earlier summary:\n");
            out.push_str(text);
            out.push('\n');
        }
    }

    if let Some(objective) = old
        .iter()
        .rev()
        .find(|m| m.role() == Role::User)
        .and_then(|m| m.as_text())
        .map(first_line)
    {
        out.push_str(&format!("\nObjective: {objective}\n"));
    }

    let files = changed_files(old);
    if !files.is_empty() {
        out.push_str("\nFiles created or modified:\n");
        for (path, verb) in files {
            out.push_str(&format!("- {path} ({verb})\n"));
        }
    }

    let errors = unresolved_errors(old);
    if !errors.is_empty() {
        out.push_str("\nUnresolved errors:\n");
        for line in errors {
            out.push_str(&format!("- {line}\n"));
        }
    }

    let questions = open_questions(old);
    if !questions.is_empty() {
        out.push_str("\nOpen questions:\n");
        for q in questions {
            out.push_str(&format!("- {q}\n"));
        }
    }

    let todos = pending_todos(old);
    if !todos.is_empty() {
        out.push_str("\nPending todo items:\n");
        for t in todos {
            out.push_str(&format!("- {t}\n"));
        }
    }

    if !rules.is_empty() {
        out.push_str("\nApproval rules established:\n");
        for rule in rules {
            out.push_str(&format!(
                "- {}: {} ({:?})\n",
                rule.tool, rule.pattern, rule.decision
            ));
        }
    }

    out.trim_end().to_string()
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or("").chars().take(160).collect()
}

/// Files touched by successful write_file / edit_file calls, in first-seen
/// order with the latest verb.
fn changed_files(old: &[Message]) -> Vec<(String, &'static str)> {
    let mut files: Vec<(String, &'static str)> = Vec::new();
    let mut pending: Option<(String, &'static str, String)> = None;
    for msg in old {
        match &msg.body {
            MessageBody::ToolCall {
                id,
                name,
                arguments,
                ..
            } if name == "write_file" || name == "edit_file" => {
                if let Some(path) = arguments.get("path").and_then(|v| v.as_str()) {
                    let verb = if name == "write_file" { "written" } else { "edited" };
                    pending = Some((path.to_string(), verb, id.clone()));
                }
            }
            MessageBody::ToolResult {
                tool_call_id,
                success: true,
                ..
            } => {
                if let Some((path, verb, id)) = pending.take() {
                    if &id == tool_call_id {
                        match files.iter().position(|(p, _)| p == &path) {
                            Some(i) => files[i].1 = verb,
                            None => files.push((path, verb)),
                        }
                    }
                }
            }
            _ => {
                pending = None;
            }
        }
    }
    files
}

/// Failing tool results with no later success of the identical call.
fn unresolved_errors(old: &[Message]) -> Vec<String> {
    // (name, canonical args) per call id, so a retry that succeeded clears
    // the earlier failure.
    let mut call_sig: std::collections::HashMap<&str, (String, String)> =
        std::collections::HashMap::new();
    for msg in old {
        if let MessageBody::ToolCall {
            id,
            name,
            arguments,
            ..
        } = &msg.body
        {
            call_sig.insert(
                id.as_str(),
                (name.clone(), arvid_tools::canonical_args(arguments)),
            );
        }
    }
    let mut failed: Vec<(String, String, String)> = Vec::new(); // sig name, sig args, line
    let mut resolved: BTreeSet<(String, String)> = BTreeSet::new();
    for msg in old {
        if let MessageBody::ToolResult {
            tool_call_id,
            success,
            content,
            ..
        } = &msg.body
        {
            if let Some((name, args)) = call_sig.get(tool_call_id.as_str()) {
                if *success {
                    resolved.insert((name.clone(), args.clone()));
                } else {
                    failed.push((
                        name.clone(),
                        args.clone(),
                        format!("{name}: {}", first_line(content)),
                    ));
                }
            }
        }
    }
    let mut seen = BTreeSet::new();
    failed
        .into_iter()
        .filter(|(name, args, _)| !resolved.contains(&(name.clone(), args.clone())))
        .filter_map(|(_, _, line)| seen.insert(line.clone()).then_some(line))
        .collect()
}

/// Question lines from assistant messages, most recent last, capped.
fn open_questions(old: &[Message]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for msg in old {
        if msg.role() != Role::Assistant {
            continue;
        }
        let Some(text) = msg.as_text() else { continue };
        for line in text.lines() {
            let line = line.trim();
            if line.ends_with('?') && seen.insert(line.to_string()) {
                out.push(line.to_string());
            }
        }
    }
    if out.len() > 5 {
        out.drain(..out.len() - 5);
    }
    out
}

/// Unchecked checkbox lines from any text message.
fn pending_todos(old: &[Message]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for msg in old {
        let Some(text) = msg.as_text() else { continue };
        for line in text.lines() {
            let line = line.trim();
            if let Some(item) = line.strip_prefix("- [ ]") {
                let item = item.trim().to_string();
                if !item.is_empty() && seen.insert(item.clone()) {
                    out.push(item);
                }
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
