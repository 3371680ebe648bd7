// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{Map, Value};

use arvid_model::ErrorKind;

/// Events streamed from the agent loop to the front-end during one turn.
/// Consumers observe transcript updates in the same order as appends.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Final or intermediate assistant text
    AssistantText(String),
    /// A tool call is about to execute
    ToolCallStarted {
        call_id: String,
        tool_name: String,
        arguments: Map<String, Value>,
    },
    /// The policy wants a user decision for this call; answer through
    /// `ApprovalBroker::resolve` with the same id.
    ApprovalRequest {
        id: String,
        tool_name: String,
        arguments: Map<String, Value>,
    },
    /// A tool call finished (successfully or not)
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        success: bool,
        error_kind: Option<ErrorKind>,
    },
    /// The transcript was compacted; statistics for the user-visible notice
    CompactionPerformed {
        tokens_before: usize,
        tokens_after: usize,
    },
    /// The session crossed the warning band of the context budget
    ContextWarning { total_tokens: usize, limit: usize },
    /// The turn finished normally
    TurnCompleted,
    /// The turn hit a safety limit or an unrecoverable failure
    TurnAborted { reason: String },
    /// The turn was cancelled by the user
    TurnCancelled,
}

impl AgentEvent {
    /// True for the three terminal events of a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::TurnCompleted | AgentEvent::TurnAborted { .. } | AgentEvent::TurnCancelled
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
