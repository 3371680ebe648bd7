// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use arvid_model::ErrorKind;

use crate::registry::ToolRegistry;
use crate::tool::{ArgKind, ArgSpec, ExecutionContext, ToolCall, ToolOutcome};

/// Hard ceiling on any single tool invocation, regardless of what the tool
/// or an override declares.
pub const MAX_TOOL_TIMEOUT_SECS: u64 = 300;

/// Runs one tool call at a time: validates arguments against the tool's
/// schema, enforces the timeout, honors cancellation, and converts every
/// failure mode — including handler panics — into a [`ToolOutcome`].
pub struct Executor {
    registry: Arc<ToolRegistry>,
    timeout_overrides: HashMap<String, u64>,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeout_overrides: HashMap::new(),
        }
    }

    pub fn with_timeout_overrides(mut self, overrides: HashMap<String, u64>) -> Self {
        self.timeout_overrides = overrides;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    fn timeout_for(&self, name: &str, declared: u64) -> Duration {
        let secs = self
            .timeout_overrides
            .get(name)
            .copied()
            .unwrap_or(declared)
            .min(MAX_TOOL_TIMEOUT_SECS);
        Duration::from_secs(secs.max(1))
    }

    /// Execute one call to completion.  Never returns a Rust error; the
    /// agent loop reads everything it needs from the outcome.
    pub async fn run(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolOutcome {
        let tool = match self.registry.get(&call.name) {
            Some(t) => t,
            None => {
                return ToolOutcome::err(
                    ErrorKind::External,
                    format!("unknown tool: {}", call.name),
                )
            }
        };

        let specs = tool.arg_specs();
        let args = match validate_args(&specs, &call.args) {
            Ok(a) => a,
            Err(msg) => return ToolOutcome::err(ErrorKind::InvalidArguments, msg),
        };
        let call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args,
        };

        if ctx.cancel.is_cancelled() {
            return ToolOutcome::err(ErrorKind::Cancelled, ErrorKind::Cancelled.user_message());
        }

        let dur = self.timeout_for(&call.name, tool.default_timeout_secs());
        debug!(tool = %call.name, call_id = %call.id, timeout_secs = dur.as_secs(), "executing tool");

        let task_ctx = ctx.clone();
        let task_call = call.clone();
        let mut handle =
            tokio::spawn(async move { tool.execute(&task_call, &task_ctx).await });

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                // The handler was given the token; if it has not finished by
                // now it is abandoned and its eventual result ignored.
                handle.abort();
                ToolOutcome::err(ErrorKind::Cancelled, ErrorKind::Cancelled.user_message())
            }
            res = tokio::time::timeout(dur, &mut handle) => match res {
                Err(_elapsed) => {
                    handle.abort();
                    ToolOutcome::err(
                        ErrorKind::Timeout,
                        format!("tool '{}' exceeded its {}s timeout", call.name, dur.as_secs()),
                    )
                }
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_err)) => {
                    warn!(tool = %call.name, error = %join_err, "tool task failed");
                    ToolOutcome::err(
                        ErrorKind::External,
                        format!("tool '{}' panicked: {join_err}", call.name),
                    )
                }
            }
        }
    }
}

/// Check the argument object against the tool's descriptors.
///
/// Enforces required fields, rejects unknown fields, and coerces values to
/// the declared type where the conversion is unambiguous (string→integer,
/// string→number, string→boolean, scalar→string).  Returns the coerced
/// object or a human-readable rejection message.
pub fn validate_args(
    specs: &[ArgSpec],
    args: &Map<String, Value>,
) -> Result<Map<String, Value>, String> {
    for spec in specs {
        if spec.required && !args.contains_key(&spec.name) {
            return Err(format!("missing required argument '{}'", spec.name));
        }
    }
    let mut out = Map::new();
    for (key, value) in args {
        let spec = match specs.iter().find(|s| &s.name == key) {
            Some(s) => s,
            None => return Err(format!("unknown argument '{key}'")),
        };
        let coerced = coerce(value, spec.kind)
            .ok_or_else(|| {
                format!(
                    "argument '{}' expected {} but got {value}",
                    spec.name,
                    spec.kind.json_type()
                )
            })?;
        out.insert(key.clone(), coerced);
    }
    Ok(out)
}

fn coerce(value: &Value, kind: ArgKind) -> Option<Value> {
    match (kind, value) {
        (ArgKind::String, Value::String(_)) => Some(value.clone()),
        (ArgKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ArgKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (ArgKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (ArgKind::Integer, Value::String(s)) => {
            s.trim().parse::<i64>().ok().map(|n| Value::Number(n.into()))
        }
        (ArgKind::Number, Value::Number(_)) => Some(value.clone()),
        (ArgKind::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        (ArgKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ArgKind::Boolean, Value::String(s)) => match s.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (ArgKind::Array, Value::Array(_)) => Some(value.clone()),
        (ArgKind::Object, Value::Object(_)) => Some(value.clone()),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
