// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use tracing::debug;

use arvid_model::ErrorKind;

use crate::tool::{
    ArgKind, ArgSpec, ExecutionContext, OutputCategory, Tool, ToolCall, ToolOutcome,
};

/// Default number of lines returned when the caller does not specify a limit.
/// Kept small to avoid flooding the model context on the first read; the
/// agent can paginate with offset + limit to get more.
const DEFAULT_LINE_LIMIT: usize = 200;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Default: first 200 lines; paginate with offset (1-indexed) \
         and limit. Relative paths resolve against the session working directory. \
         When more lines exist, a pagination notice shows the next offset."
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::required("path", ArgKind::String, "Absolute or relative path to the file"),
            ArgSpec::optional(
                "offset",
                ArgKind::Integer,
                "1-indexed line number to start reading from (default 1)",
            ),
            ArgSpec::optional(
                "limit",
                ArgKind::Integer,
                "Maximum number of lines to return (default 200)",
            ),
        ]
    }

    fn read_only(&self) -> bool {
        true
    }

    fn default_timeout_secs(&self) -> u64 {
        10
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::FileContent
    }

    async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolOutcome {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => {
                return ToolOutcome::err(ErrorKind::InvalidArguments, "missing 'path'")
            }
        };
        let offset = call
            .args
            .get("offset")
            .and_then(|v| v.as_u64())
            .unwrap_or(1)
            .max(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        let resolved = ctx.resolve(&path);
        debug!(path = %resolved.display(), offset, limit, "read_file tool");

        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::Io,
                    format!("cannot read {}: {e}", resolved.display()),
                )
            }
        };

        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let start = offset - 1;
        if start >= total && total > 0 {
            return ToolOutcome::err(
                ErrorKind::InvalidArguments,
                format!("offset {offset} is past the end of the file ({total} lines)"),
            );
        }
        let slice = &lines[start.min(total)..start.saturating_add(limit).min(total)];
        let mut output = slice.join("\n");
        // Preserve a trailing newline so short files round-trip verbatim.
        if start + slice.len() >= total && text.ends_with('\n') && !output.is_empty() {
            output.push('\n');
        }
        let last = start + slice.len();
        if last < total {
            output.push_str(&format!(
                "\n[showing lines {}-{} of {}; use offset={} to continue]",
                offset,
                last,
                total,
                last + 1
            ));
        }
        ToolOutcome::ok(output)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args_json: &str) -> ToolCall {
        ToolCall {
            id: "c".into(),
            name: "read_file".into(),
            args: serde_json::from_str(args_json).unwrap(),
        }
    }

    fn ctx(dir: &std::path::Path) -> ExecutionContext {
        ExecutionContext::new(dir)
    }

    #[test]
    fn flags_are_read_only_observation() {
        let t = ReadFileTool;
        assert!(t.read_only());
        assert!(!t.dangerous());
        assert_eq!(t.output_category(), OutputCategory::FileContent);
    }

    #[tokio::test]
    async fn reads_whole_small_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi\n").unwrap();
        let out = ReadFileTool
            .execute(&call(r#"{"path":"hello.txt"}"#), &ctx(dir.path()))
            .await;
        assert!(out.success);
        assert_eq!(out.output, "hi\n");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = ReadFileTool
            .execute(&call(r#"{"path":"absent.txt"}"#), &ctx(dir.path()))
            .await;
        assert!(!out.success);
        assert_eq!(out.error_kind, Some(ErrorKind::Io));
    }

    #[tokio::test]
    async fn paginates_with_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=10).map(|i| format!("l{i}\n")).collect();
        std::fs::write(dir.path().join("f.txt"), body).unwrap();
        let out = ReadFileTool
            .execute(
                &call(r#"{"path":"f.txt","offset":3,"limit":2}"#),
                &ctx(dir.path()),
            )
            .await;
        assert!(out.success);
        assert!(out.output.starts_with("l3\nl4"));
        assert!(out.output.contains("use offset=5"));
    }

    #[tokio::test]
    async fn offset_past_end_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "one\n").unwrap();
        let out = ReadFileTool
            .execute(&call(r#"{"path":"f.txt","offset":99}"#), &ctx(dir.path()))
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::InvalidArguments));
    }
}
