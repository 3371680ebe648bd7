// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod error;
mod message;
mod mock;
mod openai_compat;
mod provider;

pub use error::ErrorKind;
pub use message::{Message, MessageBody, Role, ToolCallRequest};
pub use mock::{FlakyProvider, MockProvider, ScriptedProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{Completion, CompletionRequest, Provider, ProviderError, ToolSchema, Usage};
