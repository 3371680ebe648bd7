// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    Completion, CompletionRequest, Provider, ProviderError, Role, ToolCallRequest, Usage,
};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<Completion, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role() == Role::User)
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();
        Ok(Completion {
            content: format!("MOCK: {reply}"),
            tool_calls: Vec::new(),
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 10,
                total_tokens: 20,
            }),
        })
    }
}

/// A pre-scripted provider.  Each call to `complete` pops the next completion
/// from the front of the queue.  This lets tests specify exact response
/// sequences — including tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Completion>>,
    /// The last `CompletionRequest` seen by this provider.
    /// Written on each `complete()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// Number of `complete()` calls made so far.
    pub calls: Arc<AtomicU32>,
}

impl ScriptedProvider {
    /// Build a provider from the ordered list of completions to return.
    pub fn new(scripts: Vec<Completion>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            last_request: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Completion::text(reply)])
    }

    /// Convenience: provider that returns one tool call, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: &str,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Completion {
                content: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: serde_json::from_str(args_json).unwrap_or_default(),
                }],
                usage: None,
            },
            Completion::text(final_text),
        ])
    }

    /// Build a tool-call completion for use in a script.
    pub fn calls_completion(calls: Vec<(&str, &str, &str)>) -> Completion {
        Completion {
            content: String::new(),
            tool_calls: calls
                .into_iter()
                .map(|(id, name, args)| ToolCallRequest {
                    id: id.into(),
                    name: name.into(),
                    arguments: serde_json::from_str(args).unwrap_or_default(),
                })
                .collect(),
            usage: None,
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            // Default fallback when all scripts are consumed
            Ok(Completion::text("[no more scripts]"))
        } else {
            Ok(scripts.remove(0))
        }
    }
}

/// Fails the first `failures` calls with an API error, then behaves like
/// [`ScriptedProvider`].  Used to exercise the orchestrator's retry path.
pub struct FlakyProvider {
    failures: AtomicU32,
    inner: ScriptedProvider,
}

impl FlakyProvider {
    pub fn new(failures: u32, then: Vec<Completion>) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            inner: ScriptedProvider::new(then),
        }
    }
}

#[async_trait]
impl Provider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky-mock"
    }
    fn model_name(&self) -> &str {
        "flaky-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<Completion, ProviderError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Api {
                status: 503,
                body: "synthetic outage".into(),
            });
        }
        self.inner.complete(req).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn req(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user(text)],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider;
        let c = p.complete(req("hi")).await.unwrap();
        assert!(c.content.contains("MOCK: hi"));
    }

    #[tokio::test]
    async fn scripted_returns_in_order() {
        let p = ScriptedProvider::new(vec![Completion::text("one"), Completion::text("two")]);
        assert_eq!(p.complete(req("a")).await.unwrap().content, "one");
        assert_eq!(p.complete(req("b")).await.unwrap().content, "two");
    }

    #[tokio::test]
    async fn scripted_fallback_when_exhausted() {
        let p = ScriptedProvider::new(vec![]);
        let c = p.complete(req("x")).await.unwrap();
        assert!(c.content.contains("no more scripts"));
    }

    #[tokio::test]
    async fn scripted_captures_last_request() {
        let p = ScriptedProvider::always_text("ok");
        p.complete(req("inspect me")).await.unwrap();
        let captured = p.last_request.lock().unwrap().take().unwrap();
        assert_eq!(captured.messages[0].as_text(), Some("inspect me"));
    }

    #[tokio::test]
    async fn tool_then_text_produces_two_rounds() {
        let p = ScriptedProvider::tool_then_text("c1", "shell", r#"{"command":"ls"}"#, "done");
        let first = p.complete(req("go")).await.unwrap();
        assert!(first.has_tool_calls());
        assert_eq!(first.tool_calls[0].name, "shell");
        let second = p.complete(req("go")).await.unwrap();
        assert_eq!(second.content, "done");
    }

    #[tokio::test]
    async fn flaky_fails_then_succeeds() {
        let p = FlakyProvider::new(2, vec![Completion::text("recovered")]);
        assert!(p.complete(req("a")).await.is_err());
        assert!(p.complete(req("b")).await.is_err());
        assert_eq!(p.complete(req("c")).await.unwrap().content, "recovered");
    }
}
