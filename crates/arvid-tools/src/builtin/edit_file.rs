// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use tracing::debug;

use arvid_model::ErrorKind;

use crate::tool::{
    ArgKind, ArgSpec, ExecutionContext, Tool, ToolCall, ToolOutcome, UndoRecord,
};

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of old_str with new_str in a file. \
         Fails when old_str is absent or ambiguous — include enough \
         surrounding context to make the match unique. Reversible with /undo."
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::required("path", ArgKind::String, "File to edit"),
            ArgSpec::required("old_str", ArgKind::String, "Exact text to replace"),
            ArgSpec::required("new_str", ArgKind::String, "Replacement text"),
        ]
    }

    fn dangerous(&self) -> bool {
        true
    }

    fn reversible(&self) -> bool {
        true
    }

    fn default_timeout_secs(&self) -> u64 {
        10
    }

    async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolOutcome {
        let get = |key: &str| call.args.get(key).and_then(|v| v.as_str());
        let (path, old_str, new_str) = match (get("path"), get("old_str"), get("new_str")) {
            (Some(p), Some(o), Some(n)) => (p.to_string(), o.to_string(), n.to_string()),
            _ => {
                return ToolOutcome::err(
                    ErrorKind::InvalidArguments,
                    "edit_file needs 'path', 'old_str' and 'new_str'",
                )
            }
        };
        if old_str.is_empty() {
            return ToolOutcome::err(ErrorKind::InvalidArguments, "old_str must not be empty");
        }

        let resolved = ctx.resolve(&path);
        debug!(path = %resolved.display(), "edit_file tool");

        let body = match tokio::fs::read_to_string(&resolved).await {
            Ok(b) => b,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::Io,
                    format!("cannot read {}: {e}", resolved.display()),
                )
            }
        };

        let matches = body.matches(&old_str).count();
        if matches == 0 {
            return ToolOutcome::err(
                ErrorKind::External,
                format!("old_str not found in {}", resolved.display()),
            );
        }
        if matches > 1 {
            return ToolOutcome::err(
                ErrorKind::External,
                format!(
                    "old_str matches {matches} locations in {}; add surrounding \
                     context to make it unique",
                    resolved.display()
                ),
            );
        }

        let previous = body.clone().into_bytes();
        let updated = body.replacen(&old_str, &new_str, 1);
        if let Err(e) = tokio::fs::write(&resolved, &updated).await {
            return ToolOutcome::err(
                ErrorKind::Io,
                format!("cannot write {}: {e}", resolved.display()),
            );
        }

        ToolOutcome::ok_with_undo(
            format!("edited {}", resolved.display()),
            UndoRecord {
                description: format!("edit_file {}", resolved.display()),
                path: resolved,
                previous: Some(previous),
            },
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args_json: &str) -> ToolCall {
        ToolCall {
            id: "c".into(),
            name: "edit_file".into(),
            args: serde_json::from_str(args_json).unwrap(),
        }
    }

    #[tokio::test]
    async fn replaces_unique_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "fn alpha() {}\n").unwrap();
        let out = EditFileTool
            .execute(
                &call(r#"{"path":"f.rs","old_str":"alpha","new_str":"beta"}"#),
                &ExecutionContext::new(dir.path()),
            )
            .await;
        assert!(out.success);
        let body = std::fs::read_to_string(dir.path().join("f.rs")).unwrap();
        assert_eq!(body, "fn beta() {}\n");
    }

    #[tokio::test]
    async fn missing_old_str_reports_external_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "nothing here\n").unwrap();
        let out = EditFileTool
            .execute(
                &call(r#"{"path":"f.rs","old_str":"ghost","new_str":"x"}"#),
                &ExecutionContext::new(dir.path()),
            )
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::External));
        assert!(out.output.contains("not found"));
    }

    #[tokio::test]
    async fn ambiguous_match_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "dup dup\n").unwrap();
        let out = EditFileTool
            .execute(
                &call(r#"{"path":"f.rs","old_str":"dup","new_str":"x"}"#),
                &ExecutionContext::new(dir.path()),
            )
            .await;
        assert!(!out.success);
        assert!(out.output.contains("2 locations"));
        // File untouched on failure.
        let body = std::fs::read_to_string(dir.path().join("f.rs")).unwrap();
        assert_eq!(body, "dup dup\n");
    }

    #[tokio::test]
    async fn undo_snapshot_holds_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "before\n").unwrap();
        let out = EditFileTool
            .execute(
                &call(r#"{"path":"f.rs","old_str":"before","new_str":"after"}"#),
                &ExecutionContext::new(dir.path()),
            )
            .await;
        let undo = out.undo.unwrap();
        assert_eq!(undo.previous.as_deref(), Some(b"before\n".as_slice()));
    }
}
