// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn is_false(b: &bool) -> bool {
    !b
}

/// A tool invocation requested by the model inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// The role-specific payload of a message.  Serialized with `role` as the
/// tag so the session file reads as a flat list of role-tagged records.
///
/// The pairing between a `ToolCall` and its `ToolResult` is expressed only
/// through `tool_call_id` plus ordering — not through any in-memory pointer —
/// so it survives serialization unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageBody {
    User {
        content: String,
    },
    Assistant {
        content: String,
        /// Tool invocations the model requested alongside this text.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Map<String, serde_json::Value>,
        /// Set when a user cancellation landed between this call being
        /// recorded and its execution; no result follows an interrupted call.
        #[serde(default, skip_serializing_if = "is_false")]
        interrupted: bool,
    },
    ToolResult {
        tool_call_id: String,
        success: bool,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<crate::ErrorKind>,
    },
    System {
        content: String,
        /// Marks the single synthetic summary message produced by compaction.
        #[serde(default, skip_serializing_if = "is_false")]
        compaction_summary: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolCall,
    ToolResult,
}

/// A single message in the conversation transcript.
///
/// `token_count` is a cache filled by the token accountant on first read and
/// persisted with the session so that reloading does not re-tokenize.
/// `tokens_estimated` marks counts produced by the heuristic fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub tokens_estimated: bool,
}

impl Message {
    fn with_body(body: MessageBody) -> Self {
        Self {
            body,
            created_at: Utc::now(),
            token_count: None,
            tokens_estimated: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_body(MessageBody::User {
            content: text.into(),
        })
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_body(MessageBody::Assistant {
            content: text.into(),
            tool_calls: Vec::new(),
        })
    }

    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self::with_body(MessageBody::Assistant {
            content: text.into(),
            tool_calls: calls,
        })
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::with_body(MessageBody::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
            interrupted: false,
        })
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_body(MessageBody::ToolResult {
            tool_call_id: id.into(),
            success: true,
            content: content.into(),
            error_kind: None,
        })
    }

    pub fn tool_result_err(
        id: impl Into<String>,
        content: impl Into<String>,
        kind: crate::ErrorKind,
    ) -> Self {
        Self::with_body(MessageBody::ToolResult {
            tool_call_id: id.into(),
            success: false,
            content: content.into(),
            error_kind: Some(kind),
        })
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_body(MessageBody::System {
            content: text.into(),
            compaction_summary: false,
        })
    }

    pub fn compaction_summary(text: impl Into<String>) -> Self {
        Self::with_body(MessageBody::System {
            content: text.into(),
            compaction_summary: true,
        })
    }

    pub fn role(&self) -> Role {
        match &self.body {
            MessageBody::User { .. } => Role::User,
            MessageBody::Assistant { .. } => Role::Assistant,
            MessageBody::ToolCall { .. } => Role::ToolCall,
            MessageBody::ToolResult { .. } => Role::ToolResult,
            MessageBody::System { .. } => Role::System,
        }
    }

    /// `ToolCall` and `ToolResult` messages do not participate in the
    /// user/assistant alternation of the conversation.
    pub fn is_tool_message(&self) -> bool {
        matches!(
            self.body,
            MessageBody::ToolCall { .. } | MessageBody::ToolResult { .. }
        )
    }

    /// Plain text of this message where it has one (`User`, `Assistant`,
    /// `System`); `None` for tool messages.
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::User { content }
            | MessageBody::Assistant { content, .. }
            | MessageBody::System { content, .. } => Some(content),
            _ => None,
        }
    }

    /// The id linking a tool message to its pair, if this is a tool message.
    pub fn tool_pair_id(&self) -> Option<&str> {
        match &self.body {
            MessageBody::ToolCall { id, .. } => Some(id),
            MessageBody::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    pub fn is_compaction_summary(&self) -> bool {
        matches!(
            self.body,
            MessageBody::System {
                compaction_summary: true,
                ..
            }
        )
    }

    pub fn mark_interrupted(&mut self) {
        if let MessageBody::ToolCall { interrupted, .. } = &mut self.body {
            *interrupted = true;
        }
    }

    /// The text the token accountant measures for this message: visible
    /// content plus the serialized tool-call arguments or tool-result output.
    pub fn payload_text(&self) -> String {
        match &self.body {
            MessageBody::User { content } | MessageBody::System { content, .. } => content.clone(),
            MessageBody::Assistant {
                content,
                tool_calls,
            } => {
                let mut s = content.clone();
                for tc in tool_calls {
                    s.push_str(&tc.name);
                    s.push_str(&serde_json::Value::Object(tc.arguments.clone()).to_string());
                }
                s
            }
            MessageBody::ToolCall {
                name, arguments, ..
            } => {
                format!(
                    "{name}{}",
                    serde_json::Value::Object(arguments.clone())
                )
            }
            MessageBody::ToolResult { content, .. } => content.clone(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn args(json: &str) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(json).unwrap()
    }

    // ── Construction ─────────────────────────────────────────────────────────

    #[test]
    fn user_message_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role(), Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn assistant_message_role_and_text() {
        let m = Message::assistant("reply");
        assert_eq!(m.role(), Role::Assistant);
        assert_eq!(m.as_text(), Some("reply"));
    }

    #[test]
    fn system_message_is_not_summary_by_default() {
        let m = Message::system("prompt");
        assert_eq!(m.role(), Role::System);
        assert!(!m.is_compaction_summary());
    }

    #[test]
    fn compaction_summary_is_flagged() {
        let m = Message::compaction_summary("summary");
        assert!(m.is_compaction_summary());
        assert_eq!(m.as_text(), Some("summary"));
    }

    #[test]
    fn tool_messages_have_no_text() {
        let call = Message::tool_call("id-1", "read_file", args(r#"{"path":"a"}"#));
        let result = Message::tool_result("id-1", "body");
        assert!(call.as_text().is_none());
        assert!(result.as_text().is_none());
        assert!(call.is_tool_message());
        assert!(result.is_tool_message());
    }

    #[test]
    fn tool_pair_id_links_call_and_result() {
        let call = Message::tool_call("id-7", "shell", args("{}"));
        let result = Message::tool_result_err("id-7", "boom", ErrorKind::Subprocess);
        assert_eq!(call.tool_pair_id(), Some("id-7"));
        assert_eq!(result.tool_pair_id(), Some("id-7"));
    }

    #[test]
    fn mark_interrupted_only_touches_tool_calls() {
        let mut call = Message::tool_call("id", "shell", args("{}"));
        call.mark_interrupted();
        assert!(matches!(
            call.body,
            MessageBody::ToolCall {
                interrupted: true,
                ..
            }
        ));

        let mut user = Message::user("hi");
        user.mark_interrupted();
        assert_eq!(user.as_text(), Some("hi"));
    }

    #[test]
    fn new_message_has_no_cached_token_count() {
        let m = Message::user("x");
        assert!(m.token_count.is_none());
        assert!(!m.tokens_estimated);
    }

    // ── Payload text ──────────────────────────────────────────────────────────

    #[test]
    fn payload_text_covers_tool_call_arguments() {
        let m = Message::tool_call("id", "grep", args(r#"{"pattern":"fn main"}"#));
        let p = m.payload_text();
        assert!(p.contains("grep"));
        assert!(p.contains("fn main"));
    }

    #[test]
    fn payload_text_covers_assistant_requests() {
        let m = Message::assistant_with_calls(
            "running a search",
            vec![ToolCallRequest {
                id: "c1".into(),
                name: "grep".into(),
                arguments: args(r#"{"pattern":"needle"}"#),
            }],
        );
        let p = m.payload_text();
        assert!(p.contains("running a search"));
        assert!(p.contains("needle"));
    }

    #[test]
    fn payload_text_is_tool_result_output() {
        let m = Message::tool_result("id", "line1\nline2");
        assert_eq!(m.payload_text(), "line1\nline2");
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    #[test]
    fn role_tag_appears_in_json() {
        let m = Message::user("payload");
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn tool_result_serialises_tool_call_id() {
        let m = Message::tool_result("id-42", "out");
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"tool_call_id\":\"id-42\""));
    }

    #[test]
    fn error_kind_serialised_on_failures_only() {
        let ok = Message::tool_result("a", "fine");
        let err = Message::tool_result_err("b", "broken", ErrorKind::Io);
        assert!(!serde_json::to_string(&ok).unwrap().contains("error_kind"));
        assert!(serde_json::to_string(&err)
            .unwrap()
            .contains("\"error_kind\":\"io\""));
    }

    #[test]
    fn message_round_trips_through_json() {
        let originals = vec![
            Message::user("u"),
            Message::assistant_with_calls(
                "a",
                vec![ToolCallRequest {
                    id: "c".into(),
                    name: "shell".into(),
                    arguments: args(r#"{"command":"ls"}"#),
                }],
            ),
            Message::tool_call("c", "shell", args(r#"{"command":"ls"}"#)),
            Message::tool_result_err("c", "denied", ErrorKind::NotPermitted),
            Message::compaction_summary("s"),
        ];
        for original in originals {
            let json = serde_json::to_string(&original).unwrap();
            let back: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(back, original);
        }
    }

    #[test]
    fn cached_token_count_round_trips() {
        let mut m = Message::user("hello");
        m.token_count = Some(17);
        m.tokens_estimated = true;
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token_count, Some(17));
        assert!(back.tokens_estimated);
    }
}
