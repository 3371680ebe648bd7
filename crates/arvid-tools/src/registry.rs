// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use arvid_config::AgentMode;
use arvid_model::ToolSchema;

use crate::tool::{OutputCategory, Tool, ToolMeta};

/// Central registry holding all available tools by name.
///
/// Registration is idempotent by name: re-registering a name replaces the
/// previous tool, which is what dynamic (remote) tool refreshes rely on.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry pre-loaded with every built-in tool.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(crate::builtin::read_file::ReadFileTool);
        reg.register(crate::builtin::write_file::WriteFileTool);
        reg.register(crate::builtin::edit_file::EditFileTool);
        reg.register(crate::builtin::list_dir::ListDirTool);
        reg.register(crate::builtin::grep::GrepTool);
        reg.register(crate::builtin::shell::ShellTool::default());
        reg
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn meta(&self, name: &str) -> Option<ToolMeta> {
        self.tools.get(name).map(|t| ToolMeta::of(t.as_ref()))
    }

    pub fn output_category(&self, name: &str) -> OutputCategory {
        self.tools
            .get(name)
            .map(|t| t.output_category())
            .unwrap_or_default()
    }

    /// Produce schemas for ALL registered tools, sorted by name so the
    /// export is deterministic.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Schemas for tools usable in the given mode.  PLAN mode exports only
    /// read-only observation tools; side-effecting tools are withheld so the
    /// model plans instead of attempting them.
    pub fn schemas_for_mode(&self, mode: AgentMode) -> Vec<ToolSchema> {
        match mode {
            AgentMode::Normal => self.schemas(),
            AgentMode::Plan => {
                let mut schemas: Vec<ToolSchema> = self
                    .tools
                    .values()
                    .filter(|t| t.read_only())
                    .map(|t| ToolSchema {
                        name: t.name().to_string(),
                        description: t.description().to_string(),
                        parameters: t.parameters_schema(),
                    })
                    .collect();
                schemas.sort_by(|a, b| a.name.cmp(&b.name));
                schemas
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
