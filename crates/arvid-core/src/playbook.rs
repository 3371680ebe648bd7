// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The per-session playbook: distilled procedural strategies learned from
//! prior tool traces, with effectiveness counters.
//!
//! Strategies are keyed by a stable id derived from category + insertion
//! index.  Ids are never reused: the per-category index only grows, even
//! when a strategy is removed.  The map is a `BTreeMap` so serialization is
//! deterministic (stable id order).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyCategory {
    FileOperations,
    CodeNavigation,
    Testing,
    ShellCommands,
    ErrorHandling,
    Other,
}

impl StrategyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyCategory::FileOperations => "file_operations",
            StrategyCategory::CodeNavigation => "code_navigation",
            StrategyCategory::Testing => "testing",
            StrategyCategory::ShellCommands => "shell_commands",
            StrategyCategory::ErrorHandling => "error_handling",
            StrategyCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for StrategyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One playbook entry: a sentence of advice with provenance counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub category: StrategyCategory,
    pub content: String,
    /// Confidence assigned by the reflector at creation
    pub confidence: f64,
    pub helpful_count: u32,
    pub harmful_count: u32,
    pub neutral_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl Strategy {
    /// `(helpful − harmful) / max(1, helpful + harmful + neutral)`
    pub fn effectiveness(&self) -> f64 {
        let votes = self.helpful_count + self.harmful_count + self.neutral_count;
        (self.helpful_count as f64 - self.harmful_count as f64) / (votes.max(1) as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    strategies: BTreeMap<String, Strategy>,
    /// Per-category insertion counters; monotonic so ids are never reused
    #[serde(default)]
    next_index: BTreeMap<String, u64>,
}

impl Playbook {
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Strategy> {
        self.strategies.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.values()
    }

    /// Add a strategy unless one with the same normalized content already
    /// exists.  Returns the id of the new entry, `None` on duplicate.
    pub fn add(
        &mut self,
        category: StrategyCategory,
        content: &str,
        confidence: f64,
    ) -> Option<String> {
        if self.contains_content(content) {
            return None;
        }
        let index = self
            .next_index
            .entry(category.as_str().to_string())
            .or_insert(0);
        let id = format!("{}-{}", category.as_str(), *index);
        *index += 1;
        let now = Utc::now();
        self.strategies.insert(
            id.clone(),
            Strategy {
                id: id.clone(),
                category,
                content: content.trim().to_string(),
                confidence,
                helpful_count: 0,
                harmful_count: 0,
                neutral_count: 0,
                created_at: now,
                last_used_at: now,
            },
        );
        Some(id)
    }

    pub fn contains_content(&self, content: &str) -> bool {
        let wanted = normalize_content(content);
        self.strategies
            .values()
            .any(|s| normalize_content(&s.content) == wanted)
    }

    pub fn mark_helpful(&mut self, id: &str) {
        if let Some(s) = self.strategies.get_mut(id) {
            s.helpful_count += 1;
        }
    }

    pub fn mark_harmful(&mut self, id: &str) {
        if let Some(s) = self.strategies.get_mut(id) {
            s.harmful_count += 1;
        }
    }

    pub fn mark_neutral(&mut self, id: &str) {
        if let Some(s) = self.strategies.get_mut(id) {
            s.neutral_count += 1;
        }
    }

    pub fn touch(&mut self, id: &str) {
        if let Some(s) = self.strategies.get_mut(id) {
            s.last_used_at = Utc::now();
        }
    }

    /// Explicit removal only; nothing in the core prunes automatically.
    pub fn remove(&mut self, id: &str) -> Option<Strategy> {
        self.strategies.remove(id)
    }

    /// The top `k` strategies by effectiveness descending, ties broken by
    /// recency (`last_used_at`, then `created_at`, then id for stability).
    pub fn top(&self, k: usize) -> Vec<&Strategy> {
        let mut all: Vec<&Strategy> = self.strategies.values().collect();
        all.sort_by(|a, b| {
            b.effectiveness()
                .partial_cmp(&a.effectiveness())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.last_used_at.cmp(&a.last_used_at))
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        all.truncate(k);
        all
    }
}

/// Normalization used for duplicate detection: lowercased, whitespace
/// collapsed, trailing punctuation stripped.
pub fn normalize_content(content: &str) -> String {
    content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!'])
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Ids ───────────────────────────────────────────────────────────────────

    #[test]
    fn ids_derive_from_category_and_index() {
        let mut p = Playbook::default();
        let a = p.add(StrategyCategory::Testing, "run the tests", 0.8).unwrap();
        let b = p.add(StrategyCategory::Testing, "run them twice", 0.7).unwrap();
        let c = p
            .add(StrategyCategory::CodeNavigation, "grep first", 0.9)
            .unwrap();
        assert_eq!(a, "testing-0");
        assert_eq!(b, "testing-1");
        assert_eq!(c, "code_navigation-0");
    }

    #[test]
    fn removed_ids_are_never_reused() {
        let mut p = Playbook::default();
        let a = p.add(StrategyCategory::Other, "first", 0.7).unwrap();
        p.remove(&a);
        let b = p.add(StrategyCategory::Other, "second", 0.7).unwrap();
        assert_eq!(b, "other-1");
    }

    // ── Dedup ─────────────────────────────────────────────────────────────────

    #[test]
    fn duplicate_content_not_added() {
        let mut p = Playbook::default();
        assert!(p
            .add(StrategyCategory::Testing, "Run the tests after edits.", 0.8)
            .is_some());
        assert!(p
            .add(StrategyCategory::Testing, "run the  tests after edits", 0.9)
            .is_none());
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn normalization_collapses_case_space_punctuation() {
        assert_eq!(
            normalize_content("  List   Directory first. "),
            "list directory first"
        );
    }

    // ── Effectiveness ─────────────────────────────────────────────────────────

    #[test]
    fn effectiveness_of_fresh_strategy_is_zero() {
        let mut p = Playbook::default();
        let id = p.add(StrategyCategory::Other, "advice", 0.7).unwrap();
        assert_eq!(p.get(&id).unwrap().effectiveness(), 0.0);
    }

    #[test]
    fn effectiveness_formula() {
        let mut p = Playbook::default();
        let id = p.add(StrategyCategory::Other, "advice", 0.7).unwrap();
        p.mark_helpful(&id);
        p.mark_helpful(&id);
        p.mark_harmful(&id);
        p.mark_neutral(&id);
        // (2 - 1) / 4
        assert!((p.get(&id).unwrap().effectiveness() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn counters_are_monotonic() {
        let mut p = Playbook::default();
        let id = p.add(StrategyCategory::Other, "advice", 0.7).unwrap();
        for _ in 0..5 {
            p.mark_helpful(&id);
            p.mark_harmful(&id);
            p.mark_neutral(&id);
        }
        let s = p.get(&id).unwrap();
        assert_eq!(
            (s.helpful_count, s.harmful_count, s.neutral_count),
            (5, 5, 5)
        );
    }

    // ── Ranking ───────────────────────────────────────────────────────────────

    #[test]
    fn top_orders_by_effectiveness_desc() {
        let mut p = Playbook::default();
        let low = p.add(StrategyCategory::Other, "low", 0.7).unwrap();
        let high = p.add(StrategyCategory::Other, "high", 0.7).unwrap();
        p.mark_harmful(&low);
        p.mark_helpful(&high);
        let top = p.top(2);
        assert_eq!(top[0].id, high);
        assert_eq!(top[1].id, low);
    }

    #[test]
    fn top_truncates_to_k() {
        let mut p = Playbook::default();
        for i in 0..10 {
            p.add(StrategyCategory::Other, &format!("advice {i}"), 0.7);
        }
        assert_eq!(p.top(3).len(), 3);
    }

    #[test]
    fn ties_break_by_recency() {
        let mut p = Playbook::default();
        let older = p.add(StrategyCategory::Other, "older", 0.7).unwrap();
        let newer = p.add(StrategyCategory::Other, "newer", 0.7).unwrap();
        // Equal effectiveness; touching `older` makes it the most recent.
        p.touch(&older);
        let top = p.top(2);
        assert_eq!(top[0].id, older);
        assert_eq!(top[1].id, newer);
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    #[test]
    fn serialization_is_deterministic() {
        let mut p = Playbook::default();
        p.add(StrategyCategory::Testing, "b", 0.7);
        p.add(StrategyCategory::CodeNavigation, "a", 0.8);
        p.add(StrategyCategory::Other, "c", 0.9);
        let one = serde_json::to_string(&p).unwrap();
        let two = serde_json::to_string(&p).unwrap();
        assert_eq!(one, two);
        // BTreeMap ordering puts code_navigation before testing.
        let cn = one.find("code_navigation-0").unwrap();
        let t = one.find("testing-0").unwrap();
        assert!(cn < t);
    }

    #[test]
    fn playbook_round_trips() {
        let mut p = Playbook::default();
        let id = p.add(StrategyCategory::ErrorHandling, "retry once", 0.75).unwrap();
        p.mark_helpful(&id);
        let json = serde_json::to_string(&p).unwrap();
        let back: Playbook = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn category_serialises_snake_case() {
        let s = serde_json::to_string(&StrategyCategory::CodeNavigation).unwrap();
        assert_eq!(s, "\"code_navigation\"");
    }
}
