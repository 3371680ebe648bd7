// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use tracing::debug;

use arvid_model::ErrorKind;

use crate::tool::{ArgKind, ArgSpec, ExecutionContext, Tool, ToolCall, ToolOutcome};

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory, sorted by name. Directories carry a \
         trailing slash. Defaults to the session working directory."
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![ArgSpec::optional(
            "path",
            ArgKind::String,
            "Directory to list (default: working directory)",
        )]
    }

    fn read_only(&self) -> bool {
        true
    }

    fn default_timeout_secs(&self) -> u64 {
        10
    }

    async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolOutcome {
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let resolved = ctx.resolve(path);
        debug!(path = %resolved.display(), "list_dir tool");

        let mut read_dir = match tokio::fs::read_dir(&resolved).await {
            Ok(rd) => rd,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::Io,
                    format!("cannot list {}: {e}", resolved.display()),
                )
            }
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        if entries.is_empty() {
            ToolOutcome::ok(format!("{} is empty", resolved.display()))
        } else {
            ToolOutcome::ok(entries.join("\n"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
