// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Driver for OpenAI-compatible chat completion APIs.
//!
//! A large number of hosted and local providers speak the same
//! `/chat/completions` wire format; this single driver covers them all,
//! configured with a base URL and an optional bearer key.  The agent core
//! consumes whole completions, so the request is sent non-streaming and the
//! first choice is decoded into a [`Completion`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    Completion, CompletionRequest, Message, MessageBody, Provider, ProviderError,
    ToolCallRequest, Usage,
};

pub struct OpenAiCompatProvider {
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// `base_url` ends before `/chat/completions`, e.g.
    /// `https://api.openai.com/v1`.
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        request_timeout: Duration,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_config(cfg: &arvid_config::ModelConfig) -> Self {
        let api_key = cfg.api_key.clone().or_else(|| {
            cfg.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
        });
        let base = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self::new(
            cfg.name.clone(),
            api_key,
            &base,
            cfg.max_tokens,
            cfg.temperature,
            Duration::from_secs(cfg.request_timeout_secs),
        )
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai_compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> Result<Completion, ProviderError> {
        let messages = build_wire_messages(&req.messages);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %self.model,
            tool_count = req.tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let mut http_req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            http_req = http_req.bearer_auth(key);
        }

        let resp = http_req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        decode_completion(&payload)
    }
}

/// Map the transcript onto the OpenAI wire shape.  Assistant-side tool
/// requests become `tool_calls` entries; the standalone `ToolCall` records in
/// the transcript are folded into them so the wire sees the protocol it
/// expects (assistant tool_calls followed by role=tool results).
fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len());
    for msg in messages {
        match &msg.body {
            MessageBody::System { content, .. } => {
                wire.push(json!({ "role": "system", "content": content }));
            }
            MessageBody::User { content } => {
                wire.push(json!({ "role": "user", "content": content }));
            }
            MessageBody::Assistant {
                content,
                tool_calls,
            } => {
                let mut m = json!({ "role": "assistant", "content": content });
                if !tool_calls.is_empty() {
                    m["tool_calls"] = json!(tool_calls
                        .iter()
                        .map(wire_tool_call)
                        .collect::<Vec<Value>>());
                }
                wire.push(m);
            }
            MessageBody::ToolCall {
                id,
                name,
                arguments,
                ..
            } => {
                // The wire protocol has no standalone tool-call record; emit
                // it as an assistant message carrying exactly this call.
                let tc = ToolCallRequest {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                };
                wire.push(json!({
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [wire_tool_call(&tc)],
                }));
            }
            MessageBody::ToolResult {
                tool_call_id,
                content,
                ..
            } => {
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
        }
    }
    wire
}

fn wire_tool_call(tc: &ToolCallRequest) -> Value {
    json!({
        "id": tc.id,
        "type": "function",
        "function": {
            "name": tc.name,
            "arguments": Value::Object(tc.arguments.clone()).to_string(),
        }
    })
}

/// Decode `choices[0].message` plus `usage` into a [`Completion`].
fn decode_completion(payload: &Value) -> Result<Completion, ProviderError> {
    let message = payload["choices"]
        .get(0)
        .map(|c| &c["message"])
        .ok_or(ProviderError::Empty)?;

    let content = message["content"].as_str().unwrap_or_default().to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for (i, call) in calls.iter().enumerate() {
            let name = call["function"]["name"].as_str().unwrap_or_default();
            if name.is_empty() {
                warn!("dropping tool call with empty name from model; cannot dispatch");
                continue;
            }
            let id = match call["id"].as_str() {
                Some(s) if !s.is_empty() => s.to_string(),
                // An empty id would break the call/result pairing invariant
                // downstream; substitute a synthetic one.
                _ => {
                    warn!(tool_name = %name, "tool call from model had empty id; generated synthetic id");
                    format!("tc_synthetic_{i}")
                }
            };
            let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
            let arguments = parse_arguments(name, &id, raw_args);
            tool_calls.push(ToolCallRequest {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    let usage = payload.get("usage").and_then(|u| {
        let total = u["total_tokens"].as_u64()?;
        Some(Usage {
            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: total as u32,
        })
    });

    Ok(Completion {
        content,
        tool_calls,
        usage,
    })
}

/// Parse the JSON-encoded argument string into an object.  Models
/// occasionally send malformed or empty arguments; substitute `{}` so the
/// executor can reject the call through normal schema validation instead of
/// the turn failing here.
fn parse_arguments(
    name: &str,
    id: &str,
    raw: &str,
) -> serde_json::Map<String, serde_json::Value> {
    if raw.trim().is_empty() {
        warn!(tool_name = %name, tool_call_id = %id, "model sent tool call with empty arguments; substituting {{}}");
        return serde_json::Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(
                tool_name = %name,
                tool_call_id = %id,
                got = %other,
                "tool call arguments were not a JSON object; substituting {{}}"
            );
            serde_json::Map::new()
        }
        Err(e) => {
            warn!(
                tool_name = %name,
                tool_call_id = %id,
                error = %e,
                "model sent tool call with invalid JSON arguments; substituting {{}}"
            );
            serde_json::Map::new()
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Wire message construction ─────────────────────────────────────────────

    #[test]
    fn system_and_user_map_directly() {
        let msgs = vec![Message::system("sys"), Message::user("hi")];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "sys");
        assert_eq!(wire[1]["role"], "user");
    }

    #[test]
    fn standalone_tool_call_becomes_assistant_tool_calls() {
        let args: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"path":"a.txt"}"#).unwrap();
        let msgs = vec![Message::tool_call("c1", "read_file", args)];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["tool_calls"][0]["id"], "c1");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "read_file");
    }

    #[test]
    fn tool_result_maps_to_tool_role() {
        let msgs = vec![Message::tool_result("c1", "file body")];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "c1");
        assert_eq!(wire[0]["content"], "file body");
    }

    #[test]
    fn tool_call_arguments_are_json_encoded_string() {
        let args: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"command":"ls"}"#).unwrap();
        let msgs = vec![Message::tool_call("c1", "shell", args)];
        let wire = build_wire_messages(&msgs);
        let encoded = wire[0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        let back: Value = serde_json::from_str(encoded).unwrap();
        assert_eq!(back["command"], "ls");
    }

    // ── Response decoding ─────────────────────────────────────────────────────

    #[test]
    fn decodes_plain_text_completion() {
        let payload = json!({
            "choices": [{ "message": { "content": "four" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
        });
        let c = decode_completion(&payload).unwrap();
        assert_eq!(c.content, "four");
        assert!(!c.has_tool_calls());
        assert_eq!(c.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn decodes_tool_calls() {
        let payload = json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "read_file", "arguments": "{\"path\":\"hello.txt\"}" }
                }]
            }}]
        });
        let c = decode_completion(&payload).unwrap();
        assert_eq!(c.content, "");
        assert_eq!(c.tool_calls.len(), 1);
        assert_eq!(c.tool_calls[0].name, "read_file");
        assert_eq!(
            c.tool_calls[0].arguments.get("path").unwrap(),
            "hello.txt"
        );
    }

    #[test]
    fn empty_choices_is_an_error() {
        let payload = json!({ "choices": [] });
        assert!(matches!(
            decode_completion(&payload),
            Err(ProviderError::Empty)
        ));
    }

    #[test]
    fn missing_usage_is_tolerated() {
        let payload = json!({ "choices": [{ "message": { "content": "ok" } }] });
        let c = decode_completion(&payload).unwrap();
        assert!(c.usage.is_none());
    }

    #[test]
    fn tool_call_with_empty_name_is_dropped() {
        let payload = json!({
            "choices": [{ "message": {
                "tool_calls": [{ "id": "x", "function": { "name": "", "arguments": "{}" } }]
            }}]
        });
        let c = decode_completion(&payload).unwrap();
        assert!(c.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_with_empty_id_gets_synthetic_id() {
        let payload = json!({
            "choices": [{ "message": {
                "tool_calls": [{ "id": "", "function": { "name": "shell", "arguments": "{}" } }]
            }}]
        });
        let c = decode_completion(&payload).unwrap();
        assert_eq!(c.tool_calls[0].id, "tc_synthetic_0");
    }

    // ── Argument parsing ──────────────────────────────────────────────────────

    #[test]
    fn invalid_argument_json_becomes_empty_object() {
        let args = parse_arguments("shell", "id", "{not json");
        assert!(args.is_empty());
    }

    #[test]
    fn non_object_arguments_become_empty_object() {
        let args = parse_arguments("shell", "id", "[1,2,3]");
        assert!(args.is_empty());
    }

    #[test]
    fn valid_arguments_parse() {
        let args = parse_arguments("shell", "id", r#"{"command":"echo hi"}"#);
        assert_eq!(args.get("command").unwrap(), "echo hi");
    }
}
