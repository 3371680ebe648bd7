// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use arvid_model::ErrorKind;

use crate::tool::{
    ArgKind, ArgSpec, ExecutionContext, OutputCategory, Tool, ToolCall, ToolOutcome,
};

/// Cap on reported matches; files beyond it are not even opened.
const DEFAULT_MAX_RESULTS: usize = 100;

/// Files larger than this are skipped — binary blobs and generated artifacts
/// drown out source matches.
const MAX_FILE_BYTES: u64 = 1_000_000;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents recursively with a regular expression. Matches \
         are reported as path:line:text. Hidden directories, .git and target \
         are skipped. Results are capped; use a more specific pattern to \
         narrow them."
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::required("pattern", ArgKind::String, "Regular expression to search for"),
            ArgSpec::optional(
                "path",
                ArgKind::String,
                "File or directory to search (default: working directory)",
            ),
            ArgSpec::optional(
                "max_results",
                ArgKind::Integer,
                "Maximum matches to report (default 100)",
            ),
        ]
    }

    fn read_only(&self) -> bool {
        true
    }

    fn default_timeout_secs(&self) -> u64 {
        30
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::MatchList
    }

    async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolOutcome {
        let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutcome::err(ErrorKind::InvalidArguments, "missing 'pattern'"),
        };
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::InvalidArguments,
                    format!("invalid pattern: {e}"),
                )
            }
        };
        let root = ctx.resolve(
            call.args
                .get("path")
                .and_then(|v| v.as_str())
                .unwrap_or("."),
        );
        let max_results = call
            .args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_RESULTS as u64) as usize;

        debug!(pattern = %pattern, root = %root.display(), "grep tool");

        // File walking is synchronous; run it off the async worker so the
        // cancellation select in the executor stays responsive.
        let cancel = ctx.cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            let mut scanned = 0usize;
            for entry in WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    !(name.starts_with('.') && name.len() > 1 && e.depth() > 0)
                        && name != "target"
                        && name != "node_modules"
                })
                .filter_map(|e| e.ok())
            {
                if cancel.is_cancelled() || matches.len() >= max_results {
                    break;
                }
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_FILE_BYTES {
                    continue;
                }
                let Ok(body) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                scanned += 1;
                for (i, line) in body.lines().enumerate() {
                    if re.is_match(line) {
                        matches.push(format!(
                            "{}:{}:{}",
                            entry.path().display(),
                            i + 1,
                            line.trim_end()
                        ));
                        if matches.len() >= max_results {
                            break;
                        }
                    }
                }
            }
            (matches, scanned)
        })
        .await;

        match result {
            Ok((matches, scanned)) if matches.is_empty() => {
                ToolOutcome::ok(format!("no matches in {scanned} files"))
            }
            Ok((matches, _)) => ToolOutcome::ok(matches.join("\n")),
            Err(e) => ToolOutcome::err(ErrorKind::Internal, format!("grep task failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args_json: &str) -> ToolCall {
        ToolCall {
            id: "c".into(),
            name: "grep".into(),
            args: serde_json::from_str(args_json).unwrap(),
        }
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\nlet x = 1;\n").unwrap();
        let out = GrepTool
            .execute(&call(r#"{"pattern":"fn main"}"#), &ExecutionContext::new(dir.path()))
            .await;
        assert!(out.success);
        assert!(out.output.contains("a.rs:1:fn main() {}"));
    }

    #[tokio::test]
    async fn reports_when_nothing_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "plain\n").unwrap();
        let out = GrepTool
            .execute(&call(r#"{"pattern":"needle"}"#), &ExecutionContext::new(dir.path()))
            .await;
        assert!(out.success);
        assert!(out.output.contains("no matches"));
    }

    #[tokio::test]
    async fn invalid_regex_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = GrepTool
            .execute(&call(r#"{"pattern":"[unclosed"}"#), &ExecutionContext::new(dir.path()))
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::InvalidArguments));
    }

    #[tokio::test]
    async fn respects_max_results() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (0..50).map(|i| format!("hit {i}\n")).collect();
        std::fs::write(dir.path().join("a.txt"), body).unwrap();
        let out = GrepTool
            .execute(
                &call(r#"{"pattern":"hit","max_results":5}"#),
                &ExecutionContext::new(dir.path()),
            )
            .await;
        assert_eq!(out.output.lines().count(), 5);
    }

    #[tokio::test]
    async fn skips_hidden_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "secret\n").unwrap();
        std::fs::write(dir.path().join("visible.txt"), "secret\n").unwrap();
        let out = GrepTool
            .execute(&call(r#"{"pattern":"secret"}"#), &ExecutionContext::new(dir.path()))
            .await;
        assert!(out.output.contains("visible.txt"));
        assert!(!out.output.contains(".git"));
    }
}
