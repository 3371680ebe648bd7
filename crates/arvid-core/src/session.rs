// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use arvid_config::ApprovalRule;
use arvid_model::{Message, MessageBody, Role};

use crate::playbook::Playbook;

/// The unit of persistence: an ordered transcript plus metadata, the
/// session-scoped approval rules, and the embedded playbook.
///
/// Messages are append-only until a compaction event replaces a contiguous
/// prefix with a single summary message.  During a turn the orchestrator
/// holds exclusive write access; everything else sees snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub working_directory: PathBuf,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub approval_rules: Vec<ApprovalRule>,
    /// Sum of the per-message cached token counts
    #[serde(default)]
    pub total_tokens: usize,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub playbook: Playbook,
}

impl Session {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            working_directory: working_directory.into(),
            messages: Vec::new(),
            approval_rules: Vec::new(),
            total_tokens: 0,
            metadata: serde_json::Map::new(),
            playbook: Playbook::default(),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.updated_at = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Index of the retained compaction summary, if one exists.
    /// At most one is ever present.
    pub fn compaction_summary_index(&self) -> Option<usize> {
        self.messages.iter().position(|m| m.is_compaction_summary())
    }

    /// Verify the tool-call pairing invariant: every tool call is followed
    /// in order by exactly one result with the same id, with nothing sharing
    /// that id in between — except a call marked interrupted, which has no
    /// result at all.
    pub fn check_tool_pairing(&self) -> Result<(), String> {
        let mut open: Option<&str> = None;
        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, msg) in self.messages.iter().enumerate() {
            match &msg.body {
                MessageBody::ToolCall {
                    id, interrupted, ..
                } => {
                    if let Some(prev) = open {
                        return Err(format!(
                            "tool call '{id}' at {i} while call '{prev}' is unresolved"
                        ));
                    }
                    if !seen_ids.insert(id.as_str()) {
                        return Err(format!("tool call id '{id}' reused at {i}"));
                    }
                    if !interrupted {
                        open = Some(id.as_str());
                    }
                }
                MessageBody::ToolResult { tool_call_id, .. } => match open.take() {
                    Some(expected) if expected == tool_call_id.as_str() => {}
                    Some(expected) => {
                        return Err(format!(
                            "tool result '{tool_call_id}' at {i} does not match open call '{expected}'"
                        ))
                    }
                    None => {
                        return Err(format!("orphan tool result '{tool_call_id}' at {i}"))
                    }
                },
                _ => {}
            }
        }
        match open {
            // An unresolved trailing call is only legal for a cancelled turn,
            // and those calls are marked interrupted above.
            Some(id) => Err(format!("tool call '{id}' has no result")),
            None => Ok(()),
        }
    }

    /// Verify the role alternation invariant over non-tool messages: no two
    /// consecutive user messages.  Consecutive assistant messages within a
    /// turn (continuations around tool batches) collapse into one logical
    /// reply.
    pub fn check_alternation(&self) -> Result<(), String> {
        let mut prev_user = false;
        for (i, msg) in self.messages.iter().enumerate() {
            if msg.is_tool_message() || msg.role() == Role::System {
                continue;
            }
            let is_user = msg.role() == Role::User;
            if is_user && prev_user {
                return Err(format!("two consecutive user messages at {i}"));
            }
            prev_user = is_user;
        }
        Ok(())
    }

    /// First line of the first user message, used as the display title.
    pub fn title(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role() == Role::User)
            .and_then(|m| m.as_text())
            .map(|t| t.lines().next().unwrap_or("").chars().take(80).collect())
            .unwrap_or_else(|| "(empty session)".to_string())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            working_directory: self.working_directory.clone(),
            message_count: self.messages.len(),
            title: self.title(),
        }
    }

    /// Compare working directories by canonical path where possible, so
    /// symlinked or relative spellings of the same directory still match.
    pub fn works_in(&self, dir: &Path) -> bool {
        let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        canonical(&self.working_directory) == canonical(dir)
    }
}

/// Listing entry for saved sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub working_directory: PathBuf,
    pub message_count: usize,
    pub title: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
