// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use tracing::debug;

use arvid_model::ErrorKind;

use crate::tool::{
    ArgKind, ArgSpec, ExecutionContext, Tool, ToolCall, ToolOutcome, UndoRecord,
};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Parent directories \
         are created as needed. The previous content is snapshotted so the \
         write can be reverted with /undo."
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::required("path", ArgKind::String, "Absolute or relative path to write"),
            ArgSpec::required("content", ArgKind::String, "Full file content"),
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
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutcome::err(ErrorKind::InvalidArguments, "missing 'path'"),
        };
        let content = call
            .args
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let resolved = ctx.resolve(&path);
        debug!(path = %resolved.display(), bytes = content.len(), "write_file tool");

        // Snapshot before mutating so the call can be reverted.
        let previous = tokio::fs::read(&resolved).await.ok();

        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutcome::err(
                        ErrorKind::Io,
                        format!("cannot create {}: {e}", parent.display()),
                    );
                }
            }
        }
        if let Err(e) = tokio::fs::write(&resolved, &content).await {
            return ToolOutcome::err(
                ErrorKind::Io,
                format!("cannot write {}: {e}", resolved.display()),
            );
        }

        let verb = if previous.is_some() { "overwrote" } else { "created" };
        ToolOutcome::ok_with_undo(
            format!("{verb} {} ({} bytes)", resolved.display(), content.len()),
            UndoRecord {
                description: format!("write_file {}", resolved.display()),
                path: resolved,
                previous,
            },
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
