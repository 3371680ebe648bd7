// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod compact;
mod context;
mod events;
mod playbook;
mod prompts;
mod reflect;
mod session;
mod store;
mod tokens;
mod undo;

pub use agent::{Agent, ApprovalBroker, TurnOutcome};
pub use compact::{
    compact_session, serialize_history, CompactionOutcome, LlmSummarizer, RuleBasedSummarizer,
    Summarizer,
};
pub use context::{assemble, playbook_digest, reflection_window, AssemblyConfig};
pub use events::AgentEvent;
pub use playbook::{normalize_content, Playbook, Strategy, StrategyCategory};
pub use prompts::system_prompt;
pub use reflect::{reflect, Proposal, TraceEntry, MIN_TRACE_LEN};
pub use session::{Session, SessionSummary};
pub use store::SessionStore;
pub use tokens::{HeuristicTokenizer, TokenAccountant, TokenBudget, Tokenizer};
pub use undo::UndoLog;
