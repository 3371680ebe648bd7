// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Reflection: distilling a completed turn's tool trace into playbook
//! strategies.
//!
//! The reflector is a deterministic pattern matcher over the sequence of
//! tool calls the turn actually executed — no model involved.  Each pattern
//! carries a fixed confidence; only matches at or above the configured
//! threshold produce a strategy proposal.  It runs after successfully
//! completed turns only, and it is best-effort: the orchestrator logs and
//! ignores any problem here rather than letting it touch the turn outcome.

use crate::playbook::StrategyCategory;

/// One executed tool call, as the reflector sees it.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub name: String,
    pub canonical_args: String,
    pub success: bool,
}

impl TraceEntry {
    pub fn new(name: &str, canonical_args: &str, success: bool) -> Self {
        Self {
            name: name.to_string(),
            canonical_args: canonical_args.to_string(),
            success,
        }
    }
}

/// A proposed strategy: category, content sentence, pattern confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub category: StrategyCategory,
    pub content: String,
    pub confidence: f64,
}

/// Minimum number of executed tool calls before any pattern may match.
pub const MIN_TRACE_LEN: usize = 2;

/// Run every pattern over the trace and return the proposals at or above
/// `threshold`, in a fixed pattern order.  Duplicate handling is the
/// playbook's job (normalized-content comparison on insert).
pub fn reflect(trace: &[TraceEntry], threshold: f64) -> Vec<Proposal> {
    if trace.len() < MIN_TRACE_LEN {
        return Vec::new();
    }
    let mut proposals = Vec::new();
    let mut propose = |category, content: &str, confidence: f64| {
        if confidence >= threshold {
            proposals.push(Proposal {
                category,
                content: content.to_string(),
                confidence,
            });
        }
    };

    if follows(trace, "list_dir", "read_file") {
        propose(
            StrategyCategory::CodeNavigation,
            "List the directory before reading files to confirm paths.",
            0.9,
        );
    }
    if follows(trace, "grep", "read_file") {
        propose(
            StrategyCategory::CodeNavigation,
            "Search for the symbol first, then read only the matching file.",
            0.85,
        );
    }
    if follows(trace, "read_file", "edit_file") || follows(trace, "read_file", "write_file") {
        propose(
            StrategyCategory::FileOperations,
            "Read a file before modifying it.",
            0.85,
        );
    }
    if edit_then_test(trace) {
        propose(
            StrategyCategory::Testing,
            "Run the tests after changing code.",
            0.8,
        );
    }
    if retry_after_failure(trace) {
        propose(
            StrategyCategory::ErrorHandling,
            "Adjust arguments and retry after a tool failure.",
            0.7,
        );
    }
    if shell_run_length(trace) >= 3 {
        propose(
            StrategyCategory::ShellCommands,
            "Batch related shell commands instead of many small invocations.",
            0.6,
        );
    }

    proposals
}

/// True when a successful `first` is followed (not necessarily adjacently)
/// by a successful `second`.
fn follows(trace: &[TraceEntry], first: &str, second: &str) -> bool {
    let mut saw_first = false;
    for entry in trace {
        if !entry.success {
            continue;
        }
        if entry.name == first {
            saw_first = true;
        } else if saw_first && entry.name == second {
            return true;
        }
    }
    false
}

/// A successful file mutation later followed by a test-looking shell command
/// that passed.
fn edit_then_test(trace: &[TraceEntry]) -> bool {
    let mut mutated = false;
    for entry in trace {
        if !entry.success {
            continue;
        }
        if entry.name == "edit_file" || entry.name == "write_file" {
            mutated = true;
        } else if mutated && entry.name == "shell" && entry.canonical_args.contains("test") {
            return true;
        }
    }
    false
}

/// A failed call followed by a successful call of the same tool with
/// different arguments.
fn retry_after_failure(trace: &[TraceEntry]) -> bool {
    for (i, failed) in trace.iter().enumerate() {
        if failed.success {
            continue;
        }
        if trace[i + 1..].iter().any(|later| {
            later.success
                && later.name == failed.name
                && later.canonical_args != failed.canonical_args
        }) {
            return true;
        }
    }
    false
}

/// Longest run of consecutive successful shell calls.
fn shell_run_length(trace: &[TraceEntry]) -> usize {
    let mut best = 0;
    let mut run = 0;
    for entry in trace {
        if entry.name == "shell" && entry.success {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(name: &str) -> TraceEntry {
        TraceEntry::new(name, "{}", true)
    }

    fn fail(name: &str, args: &str) -> TraceEntry {
        TraceEntry::new(name, args, false)
    }

    const THRESHOLD: f64 = 0.65;

    // ── Gate conditions ───────────────────────────────────────────────────────

    #[test]
    fn single_call_emits_nothing() {
        let trace = [ok("list_dir")];
        assert!(reflect(&trace, THRESHOLD).is_empty());
    }

    #[test]
    fn empty_trace_emits_nothing() {
        assert!(reflect(&[], THRESHOLD).is_empty());
    }

    #[test]
    fn below_threshold_patterns_are_dropped() {
        // Three shell calls match the batching pattern at confidence 0.6,
        // which is below the default 0.65 threshold.
        let trace = [ok("shell"), ok("shell"), ok("shell")];
        assert!(reflect(&trace, THRESHOLD).is_empty());
        assert_eq!(reflect(&trace, 0.5).len(), 1);
    }

    // ── Patterns ──────────────────────────────────────────────────────────────

    #[test]
    fn list_then_read_is_code_navigation() {
        let trace = [ok("list_dir"), ok("read_file")];
        let proposals = reflect(&trace, THRESHOLD);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].category, StrategyCategory::CodeNavigation);
        assert!(proposals[0]
            .content
            .to_lowercase()
            .contains("list the directory before reading files"));
    }

    #[test]
    fn grep_then_read_is_code_navigation() {
        let trace = [ok("grep"), ok("read_file")];
        let proposals = reflect(&trace, THRESHOLD);
        assert!(proposals
            .iter()
            .any(|p| p.category == StrategyCategory::CodeNavigation));
    }

    #[test]
    fn read_then_edit_is_file_operations() {
        let trace = [ok("read_file"), ok("edit_file")];
        let proposals = reflect(&trace, THRESHOLD);
        assert!(proposals
            .iter()
            .any(|p| p.category == StrategyCategory::FileOperations));
    }

    #[test]
    fn edit_then_test_run_is_testing() {
        let trace = [
            ok("edit_file"),
            TraceEntry::new("shell", r#"{"command":"cargo test"}"#, true),
        ];
        let proposals = reflect(&trace, THRESHOLD);
        assert!(proposals
            .iter()
            .any(|p| p.category == StrategyCategory::Testing));
    }

    #[test]
    fn failed_then_adjusted_retry_is_error_handling() {
        let trace = [
            fail("read_file", r#"{"path":"missing.txt"}"#),
            TraceEntry::new("read_file", r#"{"path":"present.txt"}"#, true),
        ];
        let proposals = reflect(&trace, THRESHOLD);
        assert!(proposals
            .iter()
            .any(|p| p.category == StrategyCategory::ErrorHandling));
    }

    #[test]
    fn identical_failing_retry_is_not_error_handling() {
        let trace = [
            fail("read_file", r#"{"path":"x"}"#),
            fail("read_file", r#"{"path":"x"}"#),
        ];
        assert!(reflect(&trace, THRESHOLD).is_empty());
    }

    #[test]
    fn unrelated_sequence_matches_nothing() {
        let trace = [ok("write_file"), ok("list_dir")];
        assert!(reflect(&trace, THRESHOLD).is_empty());
    }

    #[test]
    fn order_matters_for_follow_patterns() {
        // read_file before list_dir is not the navigation pattern.
        let trace = [ok("read_file"), ok("list_dir")];
        assert!(reflect(&trace, THRESHOLD).is_empty());
    }

    #[test]
    fn failed_steps_do_not_count_toward_patterns() {
        let trace = [fail("list_dir", "{}"), ok("read_file")];
        assert!(reflect(&trace, THRESHOLD).is_empty());
    }

    #[test]
    fn reflection_is_deterministic() {
        let trace = [ok("list_dir"), ok("read_file"), ok("edit_file")];
        assert_eq!(reflect(&trace, THRESHOLD), reflect(&trace, THRESHOLD));
    }

    #[test]
    fn multiple_patterns_can_fire_together() {
        let trace = [
            ok("list_dir"),
            ok("read_file"),
            ok("edit_file"),
            TraceEntry::new("shell", r#"{"command":"npm test"}"#, true),
        ];
        let proposals = reflect(&trace, THRESHOLD);
        let categories: Vec<_> = proposals.iter().map(|p| p.category).collect();
        assert!(categories.contains(&StrategyCategory::CodeNavigation));
        assert!(categories.contains(&StrategyCategory::FileOperations));
        assert!(categories.contains(&StrategyCategory::Testing));
    }
}
