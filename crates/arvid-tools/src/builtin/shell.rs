// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use arvid_model::ErrorKind;

use crate::tool::{
    ArgKind, ArgSpec, ExecutionContext, OutputCategory, Tool, ToolCall, ToolOutcome,
};

/// Built-in tool that runs a shell command in the session working directory.
pub struct ShellTool {
    pub timeout_secs: u64,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr. Runs in the \
         session working directory. Prefer non-interactive commands; avoid \
         commands that require a TTY. Do NOT use shell for file operations — \
         use read_file / write_file / edit_file / grep / list_dir instead."
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::required(
                "command",
                ArgKind::String,
                "The complete bash one-liner to execute",
            ),
            ArgSpec::optional(
                "timeout_secs",
                ArgKind::Integer,
                "Execution timeout in seconds (optional)",
            ),
        ]
    }

    fn dangerous(&self) -> bool {
        true
    }

    fn default_timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolOutcome {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutcome::err(ErrorKind::InvalidArguments, "missing 'command'"),
        };

        debug!(cmd = %command, "executing shell tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        if !ctx.working_dir.as_os_str().is_empty() {
            cmd.current_dir(&ctx.working_dir);
        }
        // Isolate the subprocess from the interactive terminal: with stdin at
        // /dev/null, isatty(0) is false and terminal-manipulating code paths
        // are skipped.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ToolOutcome::err(ErrorKind::Io, format!("cannot spawn bash: {e}"))
            }
        };

        let output = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return ToolOutcome::err(ErrorKind::Cancelled, "command cancelled");
            }
            out = child.wait_with_output() => match out {
                Ok(o) => o,
                Err(e) => {
                    return ToolOutcome::err(ErrorKind::Io, format!("command failed to run: {e}"))
                }
            },
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        if output.status.success() {
            if combined.is_empty() {
                combined.push_str("(no output)");
            }
            ToolOutcome::ok(combined)
        } else {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into());
            ToolOutcome::err(
                ErrorKind::Subprocess,
                format!("exit status {code}\n{combined}"),
            )
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
