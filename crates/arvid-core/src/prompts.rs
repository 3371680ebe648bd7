// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The static system prompt.
//!
//! Pure function of the mode (plus an optional override), with no clocks or
//! environment reads, so prompt assembly stays byte-deterministic.

use arvid_config::AgentMode;

const BASE_PROMPT: &str = "\
You are arvid, an AI coding assistant operating inside the user's project \
directory. You work in a loop: reason about the request, call tools to \
observe or act, read their results, and continue until you can answer.

Tool-use conventions:
- Call tools through the structured tool-call protocol only; never describe \
a tool call in prose instead of making it.
- Use read_file / list_dir / grep for observation, write_file / edit_file \
for changes, and shell only for things no dedicated tool covers.
- Tool results come back as tool messages; treat failed results as \
information and adapt rather than repeating the identical call.
- Some calls require user approval; a call may be denied. Respect denials \
and find another way or explain the limitation.";

const NORMAL_SECTION: &str = "\
Mode: NORMAL. You may request side-effecting tools; non-trivial side \
effects are subject to user approval.";

const PLAN_SECTION: &str = "\
Mode: PLAN. You may only observe (read files, list directories, search). \
Side-effecting tools are unavailable and will be denied; instead of acting, \
produce a concrete plan describing what you would do.";

const GUIDANCE_SECTION: &str = "\
Guidance that proved useful in earlier sessions is listed under \
\"Playbook\" when present; prefer it when applicable.";

/// Build the system prompt for a mode.  `custom` fully replaces the built-in
/// text when provided.
pub fn system_prompt(mode: AgentMode, custom: Option<&str>) -> String {
    if let Some(text) = custom {
        return text.to_string();
    }
    let mode_section = match mode {
        AgentMode::Normal => NORMAL_SECTION,
        AgentMode::Plan => PLAN_SECTION,
    };
    format!("{BASE_PROMPT}\n\n{mode_section}\n\n{GUIDANCE_SECTION}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_prompt_mentions_approval() {
        let p = system_prompt(AgentMode::Normal, None);
        assert!(p.contains("NORMAL"));
        assert!(p.contains("approval"));
    }

    #[test]
    fn plan_prompt_forbids_side_effects() {
        let p = system_prompt(AgentMode::Plan, None);
        assert!(p.contains("PLAN"));
        assert!(p.contains("denied"));
    }

    #[test]
    fn custom_prompt_replaces_builtin() {
        let p = system_prompt(AgentMode::Normal, Some("be terse"));
        assert_eq!(p, "be terse");
    }

    #[test]
    fn prompt_is_deterministic() {
        assert_eq!(
            system_prompt(AgentMode::Plan, None),
            system_prompt(AgentMode::Plan, None)
        );
    }
}
