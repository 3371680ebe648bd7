// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider identifier: "openai_compat" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or self-hosted servers.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Per-request timeout for a single completion call in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai_compat".into(),
            name: "gpt-4o".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_agent_mode() -> AgentMode {
    AgentMode::Normal
}
fn default_max_iterations() -> u32 {
    30
}
fn default_max_turn_seconds() -> u64 {
    600
}
fn default_max_turn_tokens() -> usize {
    100_000
}
fn default_context_limit() -> usize {
    256_000
}
fn default_compaction_trigger() -> f32 {
    0.8
}
fn default_warn_ratio() -> f32 {
    0.7
}
fn default_reflection_window() -> usize {
    5
}
fn default_playbook_digest() -> usize {
    30
}
fn default_compaction_keep_recent() -> usize {
    20
}
fn default_reflection_confidence() -> f64 {
    0.65
}
fn default_tool_result_token_cap() -> usize {
    4000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default mode when none is specified on the CLI
    #[serde(default = "default_agent_mode")]
    pub default_mode: AgentMode,
    /// Maximum number of model-call iterations within one user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Wall-clock budget for one user turn in seconds (0 = no limit)
    #[serde(default = "default_max_turn_seconds")]
    pub max_turn_seconds: u64,
    /// Maximum tokens that may be appended to the transcript in one turn
    /// (0 = no limit)
    #[serde(default = "default_max_turn_tokens")]
    pub max_turn_tokens: usize,
    /// Hard context-window limit in tokens
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    /// Fraction of the context limit at which compaction triggers
    #[serde(default = "default_compaction_trigger")]
    pub compaction_trigger: f32,
    /// Fraction of the context limit at which a user-visible warning is
    /// emitted
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f32,
    /// Number of recent user-assistant interaction pairs included in the
    /// prompt sent to the model
    #[serde(default = "default_reflection_window")]
    pub reflection_window: usize,
    /// Number of top playbook strategies rendered into the prompt
    #[serde(default = "default_playbook_digest")]
    pub playbook_digest: usize,
    /// Number of recent messages preserved verbatim during compaction.
    /// Everything older is replaced by a single summary message.
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    /// Minimum confidence a reflection pattern needs to produce a strategy
    #[serde(default = "default_reflection_confidence")]
    pub reflection_confidence: f64,
    /// Maximum tokens allowed for a single tool result before it is
    /// deterministically truncated before entering the session.
    /// A value of 0 disables per-result truncation entirely.
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    /// System prompt override; leave None to use the built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: default_agent_mode(),
            max_iterations: default_max_iterations(),
            max_turn_seconds: default_max_turn_seconds(),
            max_turn_tokens: default_max_turn_tokens(),
            context_limit: default_context_limit(),
            compaction_trigger: default_compaction_trigger(),
            warn_ratio: default_warn_ratio(),
            reflection_window: default_reflection_window(),
            playbook_digest: default_playbook_digest(),
            compaction_keep_recent: default_compaction_keep_recent(),
            reflection_confidence: default_reflection_confidence(),
            tool_result_token_cap: default_tool_result_token_cap(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Observation only — side-effecting tools are proposed but never run
    Plan,
    /// Interactive mode with policy-gated side effects
    Normal,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Plan => write!(f, "plan"),
            AgentMode::Normal => write!(f, "normal"),
        }
    }
}

/// What a stored approval rule decides for a matching tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleDecision {
    AllowOnce,
    AllowSession,
    DenyOnce,
    DenySession,
}

impl RuleDecision {
    pub fn allows(&self) -> bool {
        matches!(self, RuleDecision::AllowOnce | RuleDecision::AllowSession)
    }

    pub fn denies(&self) -> bool {
        matches!(self, RuleDecision::DenyOnce | RuleDecision::DenySession)
    }
}

/// A stored approval rule.  Session-scoped rules live inside the session;
/// global rules live in `ToolsConfig::approval_rules`.
///
/// `pattern` is a glob (`*` / `?`) matched against the canonical argument
/// string of the tool call (whitespace-collapsed, lowercased JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub tool: String,
    pub pattern: String,
    pub decision: RuleDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default timeout in seconds for a single tool call
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-tool timeout overrides, keyed by tool name
    #[serde(default)]
    pub timeout_overrides: HashMap<String, u64>,
    /// Seconds to wait for a user approval decision (0 = wait forever)
    #[serde(default)]
    pub approval_timeout_secs: u64,
    /// Globally configured approval rules (lower precedence than session
    /// rules recorded during a conversation)
    #[serde(default)]
    pub approval_rules: Vec<ApprovalRule>,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            timeout_overrides: HashMap::new(),
            approval_timeout_secs: 0,
            approval_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding session files.
    /// Defaults to `~/.local/share/arvid/sessions` when unset.
    pub sessions_dir: Option<PathBuf>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
