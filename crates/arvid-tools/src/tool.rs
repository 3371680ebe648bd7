// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use arvid_model::ErrorKind;

use crate::cancel::CancelToken;

/// A single tool invocation dispatched by the executor.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object
    pub args: Map<String, Value>,
}

/// Typed field descriptor for one tool argument.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
    pub required: bool,
    pub description: String,
}

impl ArgSpec {
    pub fn required(name: &str, kind: ArgKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: &str, kind: ArgKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ArgKind {
    pub fn json_type(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Integer => "integer",
            ArgKind::Number => "number",
            ArgKind::Boolean => "boolean",
            ArgKind::Array => "array",
            ArgKind::Object => "object",
        }
    }
}

/// Render a list of argument descriptors as a JSON Schema object.
///
/// Deriving the schema from the same descriptors the executor validates
/// against keeps the model-facing export and the validation logic from
/// drifting apart.
pub fn schema_from_specs(specs: &[ArgSpec]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for spec in specs {
        properties.insert(
            spec.name.clone(),
            json!({ "type": spec.kind.json_type(), "description": spec.description }),
        );
        if spec.required {
            required.push(Value::String(spec.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Snapshot allowing a file-mutating tool call to be reverted.
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub description: String,
    pub path: PathBuf,
    /// File bytes before the mutation; `None` when the file did not exist.
    pub previous: Option<Vec<u8>>,
}

/// The result of executing one tool call.  Failures are data, not errors:
/// the agent loop never sees a Rust error from a tool.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
    pub error_kind: Option<ErrorKind>,
    /// Present when the call can be reverted with `/undo`.
    pub undo: Option<UndoRecord>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_kind: None,
            undo: None,
        }
    }

    pub fn ok_with_undo(output: impl Into<String>, undo: UndoRecord) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_kind: None,
            undo: Some(undo),
        }
    }

    pub fn err(kind: ErrorKind, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error_kind: Some(kind),
            undo: None,
        }
    }
}

/// Describes the shape of a tool's text output for context-aware truncation.
/// Each tool declares its own category; the agent core never hard-codes tool
/// names when shaping oversized results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal / process output: keep leading and trailing lines so both
    /// the command preamble and the final result stay visible.
    HeadTail,
    /// Ordered match list: keep the leading matches (highest relevance first).
    MatchList,
    /// File content: keep a head and tail window with a separator.
    FileContent,
    /// Generic text: hard-truncate at the nearest line boundary.
    #[default]
    Generic,
}

/// Callback for optional streaming progress reports from long-running tools.
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call execution environment handed to every tool handler.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub working_dir: PathBuf,
    pub cancel: CancelToken,
    pub progress: Option<ProgressFn>,
}

impl ExecutionContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Resolve a possibly-relative path against the call's working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        }
    }

    pub fn report_progress(&self, message: &str) {
        if let Some(cb) = &self.progress {
            cb(message);
        }
    }
}

/// Trait that every built-in and dynamically registered tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Typed descriptors of the argument object
    fn arg_specs(&self) -> Vec<ArgSpec>;
    /// Dangerous tools always require a user decision in NORMAL mode
    fn dangerous(&self) -> bool {
        false
    }
    /// Reversible tools record an undo snapshot and qualify for auto-approval
    /// when they are also non-dangerous
    fn reversible(&self) -> bool {
        false
    }
    /// Read-only observation tools run in PLAN mode and are auto-approved
    fn read_only(&self) -> bool {
        false
    }
    /// Default maximum runtime; the executor enforces it
    fn default_timeout_secs(&self) -> u64 {
        30
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// JSON Schema for the parameters object, derived from `arg_specs`.
    fn parameters_schema(&self) -> Value {
        schema_from_specs(&self.arg_specs())
    }
    /// Execute the tool.  Failures are wrapped in [`ToolOutcome::err`].
    async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolOutcome;
}

/// Policy-relevant facts about a tool, detached from the trait object so the
/// pure authorization function stays trivially testable.
#[derive(Debug, Clone, Copy)]
pub struct ToolMeta {
    pub dangerous: bool,
    pub reversible: bool,
    pub read_only: bool,
}

impl ToolMeta {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            dangerous: tool.dangerous(),
            reversible: tool.reversible(),
            read_only: tool.read_only(),
        }
    }

    /// A tool is side-effecting iff it is not a read-only observation tool.
    pub fn side_effecting(&self) -> bool {
        !self.read_only
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
