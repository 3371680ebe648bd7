// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod cancel;
pub mod exec;
pub mod policy;
pub mod registry;
pub mod shape;
pub mod tool;

pub use cancel::CancelToken;
pub use exec::{validate_args, Executor, MAX_TOOL_TIMEOUT_SECS};
pub use policy::{authorize, canonical_args, remember_rule, ApprovalReply, Decision};
pub use registry::ToolRegistry;
pub use shape::shape_output;
pub use tool::{
    ArgKind, ArgSpec, ExecutionContext, OutputCategory, ProgressFn, Tool, ToolCall, ToolMeta,
    ToolOutcome, UndoRecord,
};

pub use builtin::edit_file::EditFileTool;
pub use builtin::grep::GrepTool;
pub use builtin::list_dir::ListDirTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::shell::ShellTool;
pub use builtin::write_file::WriteFileTool;
