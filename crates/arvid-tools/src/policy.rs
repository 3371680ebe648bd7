// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;
use serde_json::{Map, Value};

use arvid_config::{AgentMode, ApprovalRule};

use crate::tool::ToolMeta;

/// Outcome of the authorization function for one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    AutoAllow,
    AskUser,
    AutoDeny,
}

/// The user's reply to an approval question.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalReply {
    Yes,
    No,
    YesRememberSession,
    NoRememberSession,
    /// The user edited the arguments; the call is re-authorized and asked
    /// again with the new argument object.
    EditArguments(Map<String, Value>),
}

/// Canonical form of a tool-call argument object: compact JSON with sorted
/// keys, all whitespace collapsed to single spaces, lowercased.  Used both
/// for approval-rule matching and for stuck-state detection, so the exact
/// normalization is part of the contract.
pub fn canonical_args(args: &Map<String, Value>) -> String {
    let json = Value::Object(args.clone()).to_string();
    json.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Map `(mode, tool, arguments, rules)` to a decision.
///
/// Precedence, highest first:
/// 1. a matching deny rule (session rules checked before global)
/// 2. a matching allow rule
/// 3. PLAN-mode blanket deny for side-effecting tools
/// 4. dangerous tool → ask
/// 5. reversible or read-only, and non-dangerous → auto-allow
/// 6. otherwise → ask
///
/// The function is pure: recording a "remember" answer into session rules is
/// a separate step owned by the orchestrator.
pub fn authorize(
    mode: AgentMode,
    tool_name: &str,
    meta: ToolMeta,
    args: &Map<String, Value>,
    session_rules: &[ApprovalRule],
    global_rules: &[ApprovalRule],
) -> Decision {
    let canonical = canonical_args(args);

    for rule in session_rules.iter().chain(global_rules) {
        if rule.decision.denies() && rule_matches(rule, tool_name, &canonical) {
            return Decision::AutoDeny;
        }
    }
    for rule in session_rules.iter().chain(global_rules) {
        if rule.decision.allows() && rule_matches(rule, tool_name, &canonical) {
            return Decision::AutoAllow;
        }
    }

    if mode == AgentMode::Plan && meta.side_effecting() {
        return Decision::AutoDeny;
    }
    if meta.dangerous {
        return Decision::AskUser;
    }
    if (meta.reversible || meta.read_only) && !meta.dangerous {
        return Decision::AutoAllow;
    }
    Decision::AskUser
}

fn rule_matches(rule: &ApprovalRule, tool_name: &str, canonical: &str) -> bool {
    if rule.tool != tool_name {
        return false;
    }
    match glob_to_regex(&rule.pattern) {
        Some(re) => re.is_match(canonical),
        None => false,
    }
}

/// Convert a simple glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Build the session rule recorded for a "remember" reply: an exact match on
/// this call's canonical arguments.
pub fn remember_rule(
    tool_name: &str,
    args: &Map<String, Value>,
    allow: bool,
) -> ApprovalRule {
    ApprovalRule {
        tool: tool_name.to_string(),
        // Glob metacharacters in the canonical string would widen the match;
        // neutralize them with `?` (single-char wildcard) which can only
        // narrow it by one character per occurrence.
        pattern: canonical_args(args)
            .chars()
            .map(|c| if c == '*' { '?' } else { c })
            .collect(),
        decision: if allow {
            arvid_config::RuleDecision::AllowSession
        } else {
            arvid_config::RuleDecision::DenySession
        },
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
