// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Token accounting for the bounded-context policy.
//!
//! The counter itself is pluggable: a real tokenizer can be installed at
//! startup, and the deterministic character heuristic is always available as
//! the fallback.  Counts are memoized per message (the cached value is
//! persisted with the session) and per payload hash (the in-memory memo
//! table), so neither reloading a session nor re-assembling a prompt pays
//! for tokenization twice.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use arvid_model::Message;

use crate::session::Session;

/// Heuristic factor: one token per 3.5 characters, in integer math.
fn heuristic_count(text: &str) -> usize {
    ((text.len() * 2 + 6) / 7).max(1)
}

/// A pure text→count function.  Implementations must be deterministic.
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;
    fn count(&self, text: &str) -> anyhow::Result<usize>;
}

/// The always-available fallback counter (1 token per 3.5 characters).
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn name(&self) -> &str {
        "heuristic"
    }
    fn count(&self, text: &str) -> anyhow::Result<usize> {
        Ok(heuristic_count(text))
    }
}

/// The three numeric tunables of the context policy.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    /// Hard context limit L
    pub limit: usize,
    /// Compaction triggers at `trigger_ratio * L`
    pub trigger_ratio: f32,
    /// A user-visible warning is emitted at `warn_ratio * L`
    pub warn_ratio: f32,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            limit: 256_000,
            trigger_ratio: 0.8,
            warn_ratio: 0.7,
        }
    }
}

impl TokenBudget {
    pub fn from_config(cfg: &arvid_config::AgentConfig) -> Self {
        Self {
            limit: cfg.context_limit,
            trigger_ratio: cfg.compaction_trigger,
            warn_ratio: cfg.warn_ratio,
        }
    }

    /// The limit in force.  When the heuristic fallback is counting, the
    /// hard limit shrinks by 10% to leave margin for estimation error, so
    /// fallback activation can only make compaction fire earlier.
    pub fn effective_limit(&self, fallback_active: bool) -> usize {
        if fallback_active {
            self.limit / 10 * 9
        } else {
            self.limit
        }
    }

    pub fn needs_compaction(&self, total: usize, fallback_active: bool) -> bool {
        let limit = self.effective_limit(fallback_active) as f32;
        total as f32 >= limit * self.trigger_ratio
    }

    pub fn in_warning_band(&self, total: usize, fallback_active: bool) -> bool {
        let limit = self.effective_limit(fallback_active) as f32;
        total as f32 >= limit * self.warn_ratio
    }
}

/// Message-level token accountant with a short-held memo table.
///
/// The tokenizer runs outside the memo lock, so concurrent counts of
/// distinct messages never serialize on each other; the lock is held only
/// for a hash lookup or insert.
pub struct TokenAccountant {
    tokenizer: Arc<dyn Tokenizer>,
    memo: Mutex<HashMap<u64, usize>>,
    fallback_active: AtomicBool,
}

impl Default for TokenAccountant {
    fn default() -> Self {
        // The heuristic is the primary counter by default; it is exact about
        // its own contract, so no fallback flag is raised for it.
        Self::new(Arc::new(HeuristicTokenizer))
    }
}

impl TokenAccountant {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            memo: Mutex::new(HashMap::new()),
            fallback_active: AtomicBool::new(false),
        }
    }

    /// True once any count has come from the heuristic because the primary
    /// tokenizer failed.  Sticky for the life of the accountant.
    pub fn fallback_active(&self) -> bool {
        self.fallback_active.load(Ordering::SeqCst)
    }

    /// Count raw text.  Falls back to the heuristic when the tokenizer
    /// errors; the orchestrator is never interrupted by a counting failure.
    pub fn count_text(&self, text: &str) -> usize {
        let key = hash_text(text);
        if let Some(cached) = self.memo.lock().unwrap().get(&key) {
            return *cached;
        }
        let count = self.count_uncached(text).0;
        self.memo.lock().unwrap().insert(key, count);
        count
    }

    fn count_uncached(&self, text: &str) -> (usize, bool) {
        match self.tokenizer.count(text) {
            Ok(n) => (n, false),
            Err(e) => {
                if !self.fallback_active.swap(true, Ordering::SeqCst) {
                    warn!(
                        tokenizer = self.tokenizer.name(),
                        error = %e,
                        "tokenizer failed; falling back to character heuristic \
                         (context limit reduced by 10%)"
                    );
                }
                (heuristic_count(text), true)
            }
        }
    }

    /// Count one message, filling its persistent cache on first read.
    pub fn count_message(&self, msg: &mut Message) -> usize {
        if let Some(cached) = msg.token_count {
            return cached;
        }
        let payload = msg.payload_text();
        let key = hash_text(&payload);
        let cached = { self.memo.lock().unwrap().get(&key).copied() };
        let count = match cached {
            Some(n) => n,
            None => {
                let (n, estimated) = self.count_uncached(&payload);
                msg.tokens_estimated = estimated;
                self.memo.lock().unwrap().insert(key, n);
                n
            }
        };
        msg.token_count = Some(count);
        count
    }

    /// Sum of per-message counts for the whole transcript, using cached
    /// values where present and filling them where absent.
    pub fn session_total(&self, session: &mut Session) -> usize {
        let total = session
            .messages
            .iter_mut()
            .map(|m| self.count_message(m))
            .sum();
        session.total_tokens = total;
        total
    }
}

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use arvid_model::Message;

    struct BrokenTokenizer;
    impl Tokenizer for BrokenTokenizer {
        fn name(&self) -> &str {
            "broken"
        }
        fn count(&self, _text: &str) -> anyhow::Result<usize> {
            anyhow::bail!("no tokenizer model loaded")
        }
    }

    struct ExactTokenizer;
    impl Tokenizer for ExactTokenizer {
        fn name(&self) -> &str {
            "exact"
        }
        fn count(&self, text: &str) -> anyhow::Result<usize> {
            Ok(text.split_whitespace().count())
        }
    }

    // ── Heuristic ─────────────────────────────────────────────────────────────

    #[test]
    fn heuristic_is_one_token_per_3_5_chars() {
        assert_eq!(heuristic_count("1234567"), 2); // 7 chars / 3.5
        assert_eq!(heuristic_count("12345678901234"), 4); // 14 / 3.5
    }

    #[test]
    fn heuristic_minimum_is_one() {
        assert_eq!(heuristic_count(""), 1);
        assert_eq!(heuristic_count("a"), 1);
    }

    #[test]
    fn heuristic_is_deterministic() {
        let s = "the same string every time";
        assert_eq!(heuristic_count(s), heuristic_count(s));
    }

    // ── Budget thresholds ─────────────────────────────────────────────────────

    #[test]
    fn default_budget_constants() {
        let b = TokenBudget::default();
        assert_eq!(b.limit, 256_000);
        assert_eq!(b.trigger_ratio, 0.8);
        assert_eq!(b.warn_ratio, 0.7);
    }

    #[test]
    fn compaction_triggers_at_eighty_percent() {
        let b = TokenBudget {
            limit: 1000,
            trigger_ratio: 0.8,
            warn_ratio: 0.7,
        };
        assert!(!b.needs_compaction(799, false));
        assert!(b.needs_compaction(800, false));
    }

    #[test]
    fn warning_band_starts_at_seventy_percent() {
        let b = TokenBudget {
            limit: 1000,
            trigger_ratio: 0.8,
            warn_ratio: 0.7,
        };
        assert!(!b.in_warning_band(699, false));
        assert!(b.in_warning_band(700, false));
    }

    #[test]
    fn fallback_shrinks_the_limit_by_ten_percent() {
        let b = TokenBudget {
            limit: 1000,
            trigger_ratio: 0.8,
            warn_ratio: 0.7,
        };
        assert_eq!(b.effective_limit(false), 1000);
        assert_eq!(b.effective_limit(true), 900);
        // 80% of 900 = 720: a total that is safe normally triggers under
        // fallback, never the other way around.
        assert!(!b.needs_compaction(750, false));
        assert!(b.needs_compaction(750, true));
    }

    // ── Accountant ────────────────────────────────────────────────────────────

    #[test]
    fn count_message_fills_the_cache() {
        let acc = TokenAccountant::default();
        let mut m = Message::user("some words here");
        assert!(m.token_count.is_none());
        let n = acc.count_message(&mut m);
        assert_eq!(m.token_count, Some(n));
    }

    #[test]
    fn cached_count_is_reused_verbatim() {
        let acc = TokenAccountant::default();
        let mut m = Message::user("irrelevant");
        m.token_count = Some(1234);
        assert_eq!(acc.count_message(&mut m), 1234);
    }

    #[test]
    fn broken_tokenizer_falls_back_and_flags_message() {
        let acc = TokenAccountant::new(Arc::new(BrokenTokenizer));
        let mut m = Message::user("1234567");
        let n = acc.count_message(&mut m);
        assert_eq!(n, 2);
        assert!(m.tokens_estimated);
        assert!(acc.fallback_active());
    }

    #[test]
    fn working_tokenizer_does_not_flag_messages() {
        let acc = TokenAccountant::new(Arc::new(ExactTokenizer));
        let mut m = Message::user("three words total");
        assert_eq!(acc.count_message(&mut m), 3);
        assert!(!m.tokens_estimated);
        assert!(!acc.fallback_active());
    }

    #[test]
    fn session_total_sums_and_stores() {
        let acc = TokenAccountant::new(Arc::new(ExactTokenizer));
        let mut s = Session::new("/tmp");
        s.push(Message::user("one two"));
        s.push(Message::assistant("three four five"));
        let total = acc.session_total(&mut s);
        assert_eq!(total, 5);
        assert_eq!(s.total_tokens, 5);
        assert!(s.messages.iter().all(|m| m.token_count.is_some()));
    }

    #[test]
    fn memo_survives_across_equal_payloads() {
        let acc = TokenAccountant::new(Arc::new(ExactTokenizer));
        let a = acc.count_text("repeated payload");
        let b = acc.count_text("repeated payload");
        assert_eq!(a, b);
    }

    #[test]
    fn concurrent_counts_on_distinct_messages_do_not_block() {
        use std::sync::Barrier;
        use std::time::{Duration, Instant};

        // A tokenizer that sleeps: if counts serialized on the memo lock,
        // 8 threads × 30ms would take ≥240ms; parallel execution stays well
        // under that.
        struct SlowTokenizer;
        impl Tokenizer for SlowTokenizer {
            fn name(&self) -> &str {
                "slow"
            }
            fn count(&self, text: &str) -> anyhow::Result<usize> {
                std::thread::sleep(Duration::from_millis(30));
                Ok(text.len())
            }
        }

        let acc = Arc::new(TokenAccountant::new(Arc::new(SlowTokenizer)));
        let barrier = Arc::new(Barrier::new(8));
        let start = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let acc = Arc::clone(&acc);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    acc.count_text(&format!("distinct message {i}"))
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(
            start.elapsed() < Duration::from_millis(200),
            "distinct messages must tokenize concurrently, took {:?}",
            start.elapsed()
        );
    }
}
