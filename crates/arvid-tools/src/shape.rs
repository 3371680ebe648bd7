// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic, content-aware truncation of oversized tool results.
//!
//! Dispatches on [`OutputCategory`] rather than tool names so the shaping
//! stays independent of the concrete tool list; each tool declares its own
//! category.  Every truncated result ends with an explicit notice so the
//! model knows additional content exists and how to retrieve it.

use crate::tool::OutputCategory;

/// Approximate bytes-per-token factor used to convert the cap.
const CHARS_PER_TOKEN: usize = 4;

/// Maximum head lines preserved for terminal output.
const TERMINAL_HEAD_LINES: usize = 60;
/// Maximum tail lines preserved for terminal output.  Errors and summaries
/// almost always appear at the end of process output, so the tail matters
/// as much as the head.
const TERMINAL_TAIL_LINES: usize = 40;

/// Return `content` unchanged when it fits within `cap_tokens`; otherwise
/// apply the category's extraction strategy.  A cap of 0 disables shaping.
pub fn shape_output(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * CHARS_PER_TOKEN;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len() - cap_chars;
    match category {
        OutputCategory::HeadTail => split_keep(
            content,
            cap_chars,
            TERMINAL_HEAD_LINES,
            TERMINAL_TAIL_LINES,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => split_keep(
            content,
            cap_chars,
            usize::MAX,
            0,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                 use a more specific pattern to see them ...]"
            ),
        ),
        OutputCategory::FileContent => split_keep(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!(
                "[... {{lines}} lines omitted ({omitted_bytes} bytes); \
                 use read_file with offset/limit to see more ...]"
            ),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars]
                .rfind('\n')
                .map(|p| p + 1)
                .unwrap_or(cap_chars);
            format!(
                "{}\n[... {omitted_bytes} bytes omitted; \
                 content truncated to fit context budget ...]",
                &content[..cut]
            )
        }
    }
}

/// Keep up to `max_head` leading and `max_tail` trailing lines within the
/// character budget, joining them with the omission notice.  A `max_tail` of
/// 0 keeps the full budget for the head (match-list shape).
fn split_keep(
    content: &str,
    cap_chars: usize,
    max_head: usize,
    max_tail: usize,
    notice_template: &str,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let head_budget = if max_tail == 0 { cap_chars } else { cap_chars / 2 };
    let tail_budget = cap_chars - head_budget;

    let mut head = String::with_capacity(head_budget);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = line.len() + usize::from(!head.is_empty());
        if head.len() + needed > head_budget {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = line.len() + usize::from(!tail_lines.is_empty());
        if tail_chars + needed > tail_budget {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail_count = tail_lines.len();

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    if tail_lines.is_empty() {
        format!("{head}\n{notice}")
    } else {
        format!("{head}\n{notice}\n{}", tail_lines.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
