// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt assembly: the message list sent to the model for one call.
//!
//! The assembler is a pure function of (session state, configuration).  It
//! never reads clocks or the environment, and the synthetic messages it
//! fabricates are stamped with the session's creation time, so identical
//! inputs produce byte-identical output.  The reflection window is a
//! computed projection of the transcript; it is never stored.

use arvid_config::AgentMode;
use arvid_model::{Message, Role};

use crate::playbook::Playbook;
use crate::prompts::system_prompt;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    /// Number of trailing user-assistant interaction pairs to include
    pub window_pairs: usize,
    /// Number of top playbook strategies rendered into the digest
    pub digest_size: usize,
    /// Full system-prompt override
    pub system_prompt_override: Option<String>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            window_pairs: 5,
            digest_size: 30,
            system_prompt_override: None,
        }
    }
}

impl AssemblyConfig {
    pub fn from_config(cfg: &arvid_config::AgentConfig) -> Self {
        Self {
            window_pairs: cfg.reflection_window,
            digest_size: cfg.playbook_digest,
            system_prompt_override: cfg.system_prompt.clone(),
        }
    }
}

/// Produce the ordered message list for one model call:
///
/// 1. the static system prompt;
/// 2. the playbook digest, when the playbook is non-empty;
/// 3. the retained compaction summary, when one exists;
/// 4. the reflection window — the transcript suffix starting at the W-th
///    user message from the end (the current user message is the last one).
///
/// The session must already contain the current user message.
pub fn assemble(session: &Session, mode: AgentMode, cfg: &AssemblyConfig) -> Vec<Message> {
    let stamp = session.created_at;
    let mut out = Vec::new();

    let mut sys = Message::system(system_prompt(mode, cfg.system_prompt_override.as_deref()));
    sys.created_at = stamp;
    out.push(sys);

    if let Some(digest) = playbook_digest(&session.playbook, cfg.digest_size) {
        let mut msg = Message::system(digest);
        msg.created_at = stamp;
        out.push(msg);
    }

    if let Some(idx) = session.compaction_summary_index() {
        out.push(session.messages[idx].clone());
    }

    out.extend(reflection_window(&session.messages, cfg.window_pairs));
    out
}

/// Render the top-K strategies as a bulleted system block, ordered by
/// effectiveness descending with ties broken by recency.
pub fn playbook_digest(playbook: &Playbook, k: usize) -> Option<String> {
    if playbook.is_empty() || k == 0 {
        return None;
    }
    let mut digest = String::from("Playbook (strategies learned in earlier sessions):\n");
    for strategy in playbook.top(k) {
        digest.push_str(&format!(
            "- [{}/{}] {}\n",
            strategy.category, strategy.id, strategy.content
        ));
    }
    digest.pop();
    Some(digest)
}

/// The transcript suffix containing the last `pairs` user-assistant
/// interaction pairs, with their tool calls and results in order.
///
/// The window always begins at a `User` message: any tool results from an
/// earlier turn that precede the first retained user message are dropped,
/// and `System` messages (the prompt and the compaction summary are
/// assembled separately) never appear in it.
pub fn reflection_window(messages: &[Message], pairs: usize) -> Vec<Message> {
    if pairs == 0 {
        return Vec::new();
    }
    let user_positions: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role() == Role::User)
        .map(|(i, _)| i)
        .collect();
    let start = match user_positions.len() {
        0 => return Vec::new(),
        n if n <= pairs => user_positions[0],
        n => user_positions[n - pairs],
    };
    messages[start..]
        .iter()
        .filter(|m| m.role() != Role::System)
        .cloned()
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::StrategyCategory;
    use arvid_model::Message;

    fn args(json: &str) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(json).unwrap()
    }

    fn session_with(messages: Vec<Message>) -> Session {
        let mut s = Session::new("/tmp");
        for m in messages {
            s.push(m);
        }
        s
    }

    // ── Reflection window ─────────────────────────────────────────────────────

    #[test]
    fn window_keeps_last_n_pairs() {
        let msgs = vec![
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
            Message::assistant("a2"),
            Message::user("q3"),
            Message::assistant("a3"),
        ];
        let w = reflection_window(&msgs, 2);
        assert_eq!(w.len(), 4);
        assert_eq!(w[0].as_text(), Some("q2"));
        assert_eq!(w[3].as_text(), Some("a3"));
    }

    #[test]
    fn window_shorter_history_kept_whole() {
        let msgs = vec![Message::user("q1"), Message::assistant("a1")];
        let w = reflection_window(&msgs, 5);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn window_begins_at_a_user_message() {
        let msgs = vec![
            Message::user("q1"),
            Message::tool_call("c1", "shell", args("{}")),
            Message::tool_result("c1", "out"),
            Message::assistant("a1"),
            Message::user("q2"),
            Message::assistant("a2"),
        ];
        let w = reflection_window(&msgs, 1);
        assert_eq!(w[0].as_text(), Some("q2"));
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn loose_leading_tool_results_are_dropped() {
        // A window cut below the previous turn's tool traffic must not start
        // with orphaned tool messages.
        let msgs = vec![
            Message::user("q1"),
            Message::tool_call("c1", "shell", args("{}")),
            Message::tool_result("c1", "out"),
            Message::user("q2"),
        ];
        let w = reflection_window(&msgs, 1);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].as_text(), Some("q2"));
    }

    #[test]
    fn window_includes_tool_traffic_of_kept_pairs() {
        let msgs = vec![
            Message::user("q1"),
            Message::tool_call("c1", "list_dir", args("{}")),
            Message::tool_result("c1", "a\nb"),
            Message::assistant("a1"),
        ];
        let w = reflection_window(&msgs, 5);
        assert_eq!(w.len(), 4);
        assert!(w[1].is_tool_message());
        assert!(w[2].is_tool_message());
    }

    #[test]
    fn window_excludes_system_messages() {
        let msgs = vec![
            Message::compaction_summary("old stuff"),
            Message::user("q"),
            Message::assistant("a"),
        ];
        let w = reflection_window(&msgs, 5);
        assert!(w.iter().all(|m| m.role() != Role::System));
    }

    #[test]
    fn empty_transcript_empty_window() {
        assert!(reflection_window(&[], 5).is_empty());
    }

    // ── Digest ────────────────────────────────────────────────────────────────

    #[test]
    fn empty_playbook_has_no_digest() {
        assert!(playbook_digest(&Playbook::default(), 30).is_none());
    }

    #[test]
    fn digest_renders_category_id_and_content() {
        let mut p = Playbook::default();
        p.add(StrategyCategory::CodeNavigation, "grep before reading", 0.9);
        let d = playbook_digest(&p, 30).unwrap();
        assert!(d.contains("[code_navigation/code_navigation-0]"));
        assert!(d.contains("grep before reading"));
    }

    #[test]
    fn digest_caps_at_k() {
        let mut p = Playbook::default();
        for i in 0..10 {
            p.add(StrategyCategory::Other, &format!("tip {i}"), 0.7);
        }
        let d = playbook_digest(&p, 3).unwrap();
        assert_eq!(d.lines().count(), 4); // header + 3 bullets
    }

    #[test]
    fn digest_orders_by_effectiveness() {
        let mut p = Playbook::default();
        let weak = p.add(StrategyCategory::Other, "weak advice", 0.7).unwrap();
        let strong = p.add(StrategyCategory::Other, "strong advice", 0.7).unwrap();
        p.mark_harmful(&weak);
        p.mark_helpful(&strong);
        let d = playbook_digest(&p, 30).unwrap();
        assert!(d.find("strong advice").unwrap() < d.find("weak advice").unwrap());
    }

    // ── Assembly ──────────────────────────────────────────────────────────────

    #[test]
    fn assembly_order_is_system_digest_summary_window() {
        let mut s = session_with(vec![
            Message::compaction_summary("earlier work summary"),
            Message::user("current question"),
        ]);
        s.playbook
            .add(StrategyCategory::Testing, "always run tests", 0.8);
        let out = assemble(&s, AgentMode::Normal, &AssemblyConfig::default());
        assert_eq!(out[0].role(), Role::System); // prompt
        assert!(out[1].as_text().unwrap().contains("Playbook"));
        assert!(out[2].is_compaction_summary());
        assert_eq!(out[3].as_text(), Some("current question"));
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn assembly_without_playbook_or_summary() {
        let s = session_with(vec![Message::user("hi")]);
        let out = assemble(&s, AgentMode::Normal, &AssemblyConfig::default());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role(), Role::System);
        assert_eq!(out[1].as_text(), Some("hi"));
    }

    #[test]
    fn assembly_is_byte_deterministic() {
        let mut s = session_with(vec![
            Message::compaction_summary("sum"),
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
        ]);
        s.playbook.add(StrategyCategory::Other, "tip", 0.7);
        let cfg = AssemblyConfig::default();
        let a = serde_json::to_vec(&assemble(&s, AgentMode::Normal, &cfg)).unwrap();
        let b = serde_json::to_vec(&assemble(&s, AgentMode::Normal, &cfg)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn plan_mode_changes_only_the_prompt() {
        let s = session_with(vec![Message::user("hi")]);
        let cfg = AssemblyConfig::default();
        let normal = assemble(&s, AgentMode::Normal, &cfg);
        let plan = assemble(&s, AgentMode::Plan, &cfg);
        assert_ne!(normal[0].as_text(), plan[0].as_text());
        assert_eq!(normal[1], plan[1]);
    }
}
