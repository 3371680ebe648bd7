// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use arvid_config::{AgentMode, Config};
use arvid_model::{Completion, CompletionRequest, ErrorKind, Message, Provider, ToolSchema};
use arvid_tools::{
    authorize, canonical_args, remember_rule, shape_output, ApprovalReply, CancelToken, Decision,
    ExecutionContext, Executor, ToolCall, ToolMeta, ToolRegistry,
};

use crate::compact::{compact_session, CompactionOutcome, LlmSummarizer, Summarizer};
use crate::context::{assemble, AssemblyConfig};
use crate::events::AgentEvent;
use crate::reflect::{reflect, TraceEntry};
use crate::session::Session;
use crate::store::SessionStore;
use crate::tokens::{TokenAccountant, TokenBudget};
use crate::undo::UndoLog;

/// Model-call attempts per thinking step before the turn gives up.
const LLM_ATTEMPTS: u32 = 3;
/// Base delay of the exponential backoff between model-call attempts.
const LLM_BACKOFF: Duration = Duration::from_millis(250);
/// Identical failing attempts that constitute a stuck state.  This is a
/// contract: exactly three, never two, never five.
const STUCK_THRESHOLD: u32 = 3;

/// How one user turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Aborted(String),
}

/// Routes approval answers from the front-end into a turn that is awaiting
/// them.  Cloneable so it can live on the UI side while `start_turn` holds
/// the agent.
#[derive(Clone, Default)]
pub struct ApprovalBroker {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ApprovalReply>>>>,
}

impl ApprovalBroker {
    fn register(&self, id: &str) -> oneshot::Receiver<ApprovalReply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.to_string(), tx);
        rx
    }

    /// Deliver the user's reply to a pending `ApprovalRequest`.  Returns
    /// false when the id is unknown (already resolved or timed out).
    pub fn resolve(&self, id: &str, reply: ApprovalReply) -> bool {
        match self.pending.lock().unwrap().remove(id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    fn forget(&self, id: &str) {
        self.pending.lock().unwrap().remove(id);
    }
}

/// Consecutive-identical-failure tracker for stuck detection.
/// Arguments are compared by their canonical string (whitespace-collapsed,
/// lowercased JSON) — the same normalization approval rules match against.
#[derive(Default)]
struct StuckDetector {
    last: Option<(String, String)>,
    failures: u32,
}

impl StuckDetector {
    /// Record one attempt; returns true when this was the third identical
    /// failure in a row.
    fn record(&mut self, tool: &str, canonical: &str, success: bool) -> bool {
        if success {
            self.last = None;
            self.failures = 0;
            return false;
        }
        let key = (tool.to_string(), canonical.to_string());
        if self.last.as_ref() == Some(&key) {
            self.failures += 1;
        } else {
            self.last = Some(key);
            self.failures = 1;
        }
        self.failures >= STUCK_THRESHOLD
    }
}

enum AskOutcome {
    Reply(ApprovalReply),
    TimedOut,
    Cancelled,
}

enum Resolution {
    Allow,
    Deny,
    ApprovalTimeout,
    Cancelled,
}

/// The ReAct orchestrator: drives the model ↔ tool loop for one session.
///
/// A turn cannot overlap another: `start_turn` takes `&mut self`, so a
/// queued second turn waits until the first reaches a terminal state.  The
/// front-end talks to a running turn only through the event stream, the
/// approval broker, and the cancellation token.
pub struct Agent {
    session: Session,
    store: SessionStore,
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    executor: Executor,
    summarizer: Box<dyn Summarizer>,
    accountant: TokenAccountant,
    budget: TokenBudget,
    config: Config,
    mode: AgentMode,
    cancel: CancelToken,
    approvals: ApprovalBroker,
    undo: UndoLog,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        config: Config,
        session: Session,
        store: SessionStore,
    ) -> Self {
        let executor = Executor::new(Arc::clone(&registry))
            .with_timeout_overrides(config.tools.timeout_overrides.clone());
        let summarizer = Box::new(LlmSummarizer::new(Arc::clone(&provider)));
        let budget = TokenBudget::from_config(&config.agent);
        let mode = config.agent.default_mode;
        Self {
            session,
            store,
            provider,
            registry,
            executor,
            summarizer,
            accountant: TokenAccountant::default(),
            budget,
            config,
            mode,
            cancel: CancelToken::new(),
            approvals: ApprovalBroker::default(),
            undo: UndoLog::default(),
        }
    }

    /// Install a tokenizer other than the character heuristic.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn crate::tokens::Tokenizer>) -> Self {
        self.accountant = TokenAccountant::new(tokenizer);
        self
    }

    /// Replace the compaction summarizer (tests use the rule-based one to
    /// keep the mock provider scripts aligned with the turn's model calls).
    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: AgentMode) {
        self.mode = mode;
    }

    /// Handle for `resolve_approval`; clone it to the front-end.
    pub fn approval_broker(&self) -> ApprovalBroker {
        self.approvals.clone()
    }

    /// Handle for `cancel_turn`; clone it to the front-end.  Valid across
    /// turns (it is re-armed when a turn starts).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Revert the most recent reversible tool effect (`/undo`).
    pub fn undo_last(&mut self) -> anyhow::Result<Option<String>> {
        self.undo.undo_last()
    }

    /// Start over with a fresh session in the same working directory
    /// (`/clear`).  The old session file stays on disk.
    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.session = Session::new(self.session.working_directory.clone());
        self.undo = UndoLog::default();
        self.store.save(&self.session)
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Swap in a different session (`/resume`).  The undo journal belongs
    /// to the replaced session and is dropped with it.
    pub fn replace_session(&mut self, session: Session) {
        self.session = session;
        self.undo = UndoLog::default();
    }

    /// Run one user turn to a terminal state, streaming events through `tx`.
    ///
    /// Events always end with exactly one of `TurnCompleted`, `TurnAborted`
    /// or `TurnCancelled`.  The transcript — including partial progress of
    /// aborted and cancelled turns — is persisted before this returns.
    pub async fn start_turn(
        &mut self,
        user_text: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<TurnOutcome> {
        self.cancel.reset();
        let started = Instant::now();
        let mut turn_tokens = 0usize;
        let mut warned = false;
        let mut trace: Vec<TraceEntry> = Vec::new();
        let mut stuck = StuckDetector::default();
        let mut reflect_allowed = true;

        // Budget gate before the first model call, so an oversized resumed
        // session compacts before anything else happens.
        self.check_context(&tx, &mut warned).await?;

        turn_tokens += self.push_counted(Message::user(user_text));
        self.store.save(&self.session)?;

        let assembly = AssemblyConfig::from_config(&self.config.agent);
        let mut iteration = 0u32;

        let outcome: TurnOutcome = loop {
            if self.cancel.is_cancelled() {
                break TurnOutcome::Cancelled;
            }
            iteration += 1;
            if iteration > self.config.agent.max_iterations {
                break TurnOutcome::Aborted(format!(
                    "iteration budget exhausted ({} model calls)",
                    self.config.agent.max_iterations
                ));
            }
            if self.config.agent.max_turn_seconds > 0
                && started.elapsed().as_secs() >= self.config.agent.max_turn_seconds
            {
                break TurnOutcome::Aborted(format!(
                    "turn exceeded its wall-clock budget of {}s",
                    self.config.agent.max_turn_seconds
                ));
            }
            if self.config.agent.max_turn_tokens > 0
                && turn_tokens >= self.config.agent.max_turn_tokens
            {
                break TurnOutcome::Aborted(format!(
                    "turn exceeded its token budget of {} tokens",
                    self.config.agent.max_turn_tokens
                ));
            }

            // Budget gate between thinking cycles: tool results from the
            // previous cycle may have pushed the session over the trigger.
            self.check_context(&tx, &mut warned).await?;

            let prompt = assemble(&self.session, self.mode, &assembly);
            let tools = self.registry.schemas_for_mode(self.mode);
            let completion = match self.complete_with_retry(prompt, tools).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "model unreachable after {LLM_ATTEMPTS} attempts");
                    let apology = "I could not reach the model.";
                    turn_tokens += self.push_counted(Message::assistant(apology));
                    let _ = tx.send(AgentEvent::AssistantText(apology.into())).await;
                    // Back to idle without reflection; the session survives.
                    reflect_allowed = false;
                    break TurnOutcome::Completed;
                }
            };

            if let Some(usage) = completion.usage {
                self.session.metadata.insert(
                    "provider_total_tokens".into(),
                    Value::Number(usage.total_tokens.into()),
                );
            }

            if !completion.content.is_empty() {
                let msg = if completion.tool_calls.is_empty() {
                    Message::assistant(&completion.content)
                } else {
                    Message::assistant_with_calls(
                        &completion.content,
                        completion.tool_calls.clone(),
                    )
                };
                turn_tokens += self.push_counted(msg);
                let _ = tx
                    .send(AgentEvent::AssistantText(completion.content.clone()))
                    .await;
            }

            if completion.tool_calls.is_empty() {
                break TurnOutcome::Completed;
            }

            match self
                .run_tool_batch(&completion, &tx, &mut trace, &mut stuck, &mut turn_tokens)
                .await?
            {
                Some(terminal) => break terminal,
                None => {}
            }

            self.store.save(&self.session)?;
        };

        match &outcome {
            TurnOutcome::Completed => {
                let _ = tx.send(AgentEvent::TurnCompleted).await;
                if reflect_allowed {
                    self.reflect_turn(&trace);
                }
            }
            TurnOutcome::Cancelled => {
                let _ = tx.send(AgentEvent::TurnCancelled).await;
            }
            TurnOutcome::Aborted(reason) => {
                warn!(reason = %reason, "turn aborted");
                let _ = tx
                    .send(AgentEvent::TurnAborted {
                        reason: reason.clone(),
                    })
                    .await;
            }
        }
        self.store.save(&self.session)?;
        Ok(outcome)
    }

    /// Execute one assistant message's tool-call batch in the returned
    /// order.  Returns a terminal outcome when the batch ended the turn.
    async fn run_tool_batch(
        &mut self,
        completion: &Completion,
        tx: &mpsc::Sender<AgentEvent>,
        trace: &mut Vec<TraceEntry>,
        stuck: &mut StuckDetector,
        turn_tokens: &mut usize,
    ) -> anyhow::Result<Option<TurnOutcome>> {
        let batch_len = completion.tool_calls.len();
        for (index, request) in completion.tool_calls.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let mut call_msg =
                    Message::tool_call(&request.id, &request.name, request.arguments.clone());
                call_msg.mark_interrupted();
                *turn_tokens += self.push_counted(call_msg);
                return Ok(Some(TurnOutcome::Cancelled));
            }

            let meta = self.registry.meta(&request.name).unwrap_or(ToolMeta {
                dangerous: false,
                reversible: false,
                read_only: false,
            });

            let mut args = request.arguments.clone();
            let resolution = self
                .resolve_approval(&request.id, &request.name, meta, &mut args, tx)
                .await;

            if matches!(resolution, Resolution::Cancelled) {
                let mut call_msg = Message::tool_call(&request.id, &request.name, args);
                call_msg.mark_interrupted();
                *turn_tokens += self.push_counted(call_msg);
                return Ok(Some(TurnOutcome::Cancelled));
            }

            *turn_tokens +=
                self.push_counted(Message::tool_call(&request.id, &request.name, args.clone()));

            let canonical = canonical_args(&args);
            let (success, halt_batch) = match resolution {
                Resolution::Allow => {
                    let _ = tx
                        .send(AgentEvent::ToolCallStarted {
                            call_id: request.id.clone(),
                            tool_name: request.name.clone(),
                            arguments: args.clone(),
                        })
                        .await;
                    let ctx = ExecutionContext {
                        working_dir: self.session.working_directory.clone(),
                        cancel: self.cancel.clone(),
                        progress: None,
                    };
                    let call = ToolCall {
                        id: request.id.clone(),
                        name: request.name.clone(),
                        args,
                    };
                    let outcome = self.executor.run(&call, &ctx).await;
                    if let Some(undo) = outcome.undo.clone() {
                        self.undo.push(undo);
                    }
                    let shaped = shape_output(
                        &outcome.output,
                        self.registry.output_category(&request.name),
                        self.config.agent.tool_result_token_cap,
                    );
                    let result_msg = if outcome.success {
                        Message::tool_result(&request.id, &shaped)
                    } else {
                        Message::tool_result_err(
                            &request.id,
                            &shaped,
                            outcome.error_kind.unwrap_or(ErrorKind::External),
                        )
                    };
                    *turn_tokens += self.push_counted(result_msg);
                    let _ = tx
                        .send(AgentEvent::ToolCallFinished {
                            call_id: request.id.clone(),
                            tool_name: request.name.clone(),
                            output: shaped,
                            success: outcome.success,
                            error_kind: outcome.error_kind,
                        })
                        .await;
                    trace.push(TraceEntry::new(&request.name, &canonical, outcome.success));
                    if outcome.error_kind == Some(ErrorKind::Cancelled) {
                        return Ok(Some(TurnOutcome::Cancelled));
                    }
                    (outcome.success, false)
                }
                Resolution::Deny => {
                    let detail = if self.mode == AgentMode::Plan {
                        "side-effecting tools are not permitted in plan mode"
                    } else {
                        ErrorKind::NotPermitted.user_message()
                    };
                    *turn_tokens += self.push_counted(Message::tool_result_err(
                        &request.id,
                        detail,
                        ErrorKind::NotPermitted,
                    ));
                    let _ = tx
                        .send(AgentEvent::ToolCallFinished {
                            call_id: request.id.clone(),
                            tool_name: request.name.clone(),
                            output: detail.into(),
                            success: false,
                            error_kind: Some(ErrorKind::NotPermitted),
                        })
                        .await;
                    // A denial on a dangerous tool invalidates the rest of
                    // the batch unless the user explicitly continues.
                    (false, meta.dangerous)
                }
                Resolution::ApprovalTimeout => {
                    let detail = "approval request timed out";
                    *turn_tokens += self.push_counted(Message::tool_result_err(
                        &request.id,
                        detail,
                        ErrorKind::Timeout,
                    ));
                    let _ = tx
                        .send(AgentEvent::ToolCallFinished {
                            call_id: request.id.clone(),
                            tool_name: request.name.clone(),
                            output: detail.into(),
                            success: false,
                            error_kind: Some(ErrorKind::Timeout),
                        })
                        .await;
                    (false, false)
                }
                Resolution::Cancelled => unreachable!("handled above"),
            };

            if stuck.record(&request.name, &canonical, success) {
                return Ok(Some(TurnOutcome::Aborted(format!(
                    "stuck: {} failed {STUCK_THRESHOLD} times with identical arguments",
                    request.name
                ))));
            }

            let calls_remain = index + 1 < batch_len;
            if halt_batch && calls_remain && !self.confirm_batch_continue(&request.id, tx).await {
                debug!("remaining batch calls skipped after denied dangerous call");
                break;
            }
        }
        Ok(None)
    }

    /// Drive the approval cycle for one call: consult the pure policy, ask
    /// the user when required, record "remember" answers as session rules,
    /// and re-ask after argument edits.
    ///
    /// Once the policy returns AutoAllow it is not consulted again for this
    /// call; once it returns AutoDeny the tool will not execute.
    async fn resolve_approval(
        &mut self,
        call_id: &str,
        tool_name: &str,
        meta: ToolMeta,
        args: &mut Map<String, Value>,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Resolution {
        loop {
            let decision = authorize(
                self.mode,
                tool_name,
                meta,
                args,
                &self.session.approval_rules,
                &self.config.tools.approval_rules,
            );
            match decision {
                Decision::AutoAllow => return Resolution::Allow,
                Decision::AutoDeny => return Resolution::Deny,
                Decision::AskUser => {
                    match self.ask_user(call_id, tool_name, args, tx).await {
                        AskOutcome::Cancelled => return Resolution::Cancelled,
                        AskOutcome::TimedOut => return Resolution::ApprovalTimeout,
                        AskOutcome::Reply(ApprovalReply::Yes) => return Resolution::Allow,
                        AskOutcome::Reply(ApprovalReply::No) => return Resolution::Deny,
                        AskOutcome::Reply(ApprovalReply::YesRememberSession) => {
                            let rule = remember_rule(tool_name, args, true);
                            self.session.approval_rules.push(rule);
                            return Resolution::Allow;
                        }
                        AskOutcome::Reply(ApprovalReply::NoRememberSession) => {
                            let rule = remember_rule(tool_name, args, false);
                            self.session.approval_rules.push(rule);
                            return Resolution::Deny;
                        }
                        AskOutcome::Reply(ApprovalReply::EditArguments(new_args)) => {
                            *args = new_args;
                            // Ask again with the edited arguments.
                        }
                    }
                }
            }
        }
    }

    /// Emit an `ApprovalRequest` and wait for the front-end's reply,
    /// honoring cancellation and the configured approval timeout
    /// (0 = wait forever).
    async fn ask_user(
        &self,
        id: &str,
        tool_name: &str,
        args: &Map<String, Value>,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> AskOutcome {
        let rx = self.approvals.register(id);
        let _ = tx
            .send(AgentEvent::ApprovalRequest {
                id: id.to_string(),
                tool_name: tool_name.to_string(),
                arguments: args.clone(),
            })
            .await;

        let timeout_secs = self.config.tools.approval_timeout_secs;
        let outcome = if timeout_secs == 0 {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => AskOutcome::Cancelled,
                reply = rx => match reply {
                    Ok(r) => AskOutcome::Reply(r),
                    Err(_) => AskOutcome::TimedOut,
                },
            }
        } else {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => AskOutcome::Cancelled,
                _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => AskOutcome::TimedOut,
                reply = rx => match reply {
                    Ok(r) => AskOutcome::Reply(r),
                    Err(_) => AskOutcome::TimedOut,
                },
            }
        };
        self.approvals.forget(id);
        outcome
    }

    /// Ask whether to run the rest of a batch after a dangerous call was
    /// denied.  Anything but an explicit yes skips the remaining calls.
    async fn confirm_batch_continue(&self, call_id: &str, tx: &mpsc::Sender<AgentEvent>) -> bool {
        let id = format!("{call_id}:continue");
        match self
            .ask_user(&id, "continue_batch", &Map::new(), tx)
            .await
        {
            AskOutcome::Reply(ApprovalReply::Yes)
            | AskOutcome::Reply(ApprovalReply::YesRememberSession) => true,
            _ => false,
        }
    }

    /// One model call with bounded retries and exponential backoff.
    async fn complete_with_retry(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolSchema>,
    ) -> anyhow::Result<Completion> {
        let req = CompletionRequest { messages, tools };
        let call_timeout = Duration::from_secs(self.config.model.request_timeout_secs.max(1));
        let mut delay = LLM_BACKOFF;
        let mut last_error = None;
        for attempt in 1..=LLM_ATTEMPTS {
            match tokio::time::timeout(call_timeout, self.provider.complete(req.clone())).await {
                Ok(Ok(completion)) => return Ok(completion),
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "model call failed");
                    last_error = Some(anyhow::Error::from(e));
                }
                Err(_) => {
                    warn!(attempt, timeout_secs = call_timeout.as_secs(), "model call timed out");
                    last_error = Some(anyhow::anyhow!(
                        "model call timed out after {}s",
                        call_timeout.as_secs()
                    ));
                }
            }
            if attempt < LLM_ATTEMPTS {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay *= 2;
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("model call failed")))
    }

    /// Evaluate the context budget: warn once per turn in the warning band,
    /// compact above the trigger, and announce the result.
    async fn check_context(
        &mut self,
        tx: &mpsc::Sender<AgentEvent>,
        warned: &mut bool,
    ) -> anyhow::Result<()> {
        let total = self.accountant.session_total(&mut self.session);
        let fallback = self.accountant.fallback_active();
        if self.budget.needs_compaction(total, fallback) {
            let outcome = compact_session(
                &mut self.session,
                self.summarizer.as_ref(),
                self.config.agent.compaction_keep_recent,
            )
            .await;
            if outcome == CompactionOutcome::Compacted {
                let after = self.accountant.session_total(&mut self.session);
                let _ = tx
                    .send(AgentEvent::CompactionPerformed {
                        tokens_before: total,
                        tokens_after: after,
                    })
                    .await;
                self.store.save(&self.session)?;
            }
        } else if !*warned && self.budget.in_warning_band(total, fallback) {
            *warned = true;
            let _ = tx
                .send(AgentEvent::ContextWarning {
                    total_tokens: total,
                    limit: self.budget.effective_limit(fallback),
                })
                .await;
        }
        Ok(())
    }

    /// Distill the completed turn's tool trace into playbook strategies.
    /// Best-effort: problems are logged and never affect the turn outcome.
    fn reflect_turn(&mut self, trace: &[TraceEntry]) {
        let proposals = reflect(trace, self.config.agent.reflection_confidence);
        if proposals.is_empty() {
            return;
        }
        for proposal in proposals {
            if let Some(id) =
                self.session
                    .playbook
                    .add(proposal.category, &proposal.content, proposal.confidence)
            {
                debug!(strategy = %id, "playbook strategy added");
            }
        }
        if let Err(e) = self.store.save(&self.session) {
            error!(error = %e, "failed to persist playbook update");
        }
    }

    fn push_counted(&mut self, mut msg: Message) -> usize {
        let tokens = self.accountant.count_message(&mut msg);
        self.session.push(msg);
        self.session.total_tokens += tokens;
        tokens
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
