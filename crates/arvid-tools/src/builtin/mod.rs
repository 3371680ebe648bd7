// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod edit_file;
pub mod grep;
pub mod list_dir;
pub mod read_file;
pub mod shell;
pub mod write_file;

// ─── Tool profile contract tests ─────────────────────────────────────────────
//
// Each builtin's policy-relevant flags are pinned here so a rename or a
// copy-paste error cannot silently change how approval treats the tool.
#[cfg(test)]
mod profile_tests {
    use crate::tool::{OutputCategory, Tool, ToolMeta};

    // ── Read-only observation tools ───────────────────────────────────────────

    #[test]
    fn read_file_is_read_only() {
        let meta = ToolMeta::of(&super::read_file::ReadFileTool);
        assert!(meta.read_only);
        assert!(!meta.dangerous);
        assert!(!meta.side_effecting());
    }

    #[test]
    fn list_dir_is_read_only() {
        let meta = ToolMeta::of(&super::list_dir::ListDirTool);
        assert!(meta.read_only);
        assert!(!meta.side_effecting());
    }

    #[test]
    fn grep_is_read_only_matchlist() {
        let t = super::grep::GrepTool;
        assert!(t.read_only());
        assert_eq!(t.output_category(), OutputCategory::MatchList);
    }

    // ── Mutating tools ────────────────────────────────────────────────────────

    #[test]
    fn write_file_requires_approval_and_is_undoable() {
        let meta = ToolMeta::of(&super::write_file::WriteFileTool);
        assert!(meta.dangerous);
        assert!(meta.reversible);
        assert!(meta.side_effecting());
    }

    #[test]
    fn edit_file_requires_approval_and_is_undoable() {
        let meta = ToolMeta::of(&super::edit_file::EditFileTool);
        assert!(meta.dangerous);
        assert!(meta.reversible);
    }

    #[test]
    fn shell_requires_approval_and_is_not_undoable() {
        let meta = ToolMeta::of(&super::shell::ShellTool::default());
        assert!(meta.dangerous);
        assert!(!meta.reversible);
    }

    // ── Output categories ─────────────────────────────────────────────────────

    #[test]
    fn shell_is_headtail() {
        let t = super::shell::ShellTool::default();
        assert_eq!(t.output_category(), OutputCategory::HeadTail);
    }

    #[test]
    fn read_file_is_filecontent() {
        let t = super::read_file::ReadFileTool;
        assert_eq!(t.output_category(), OutputCategory::FileContent);
    }

    #[test]
    fn write_and_edit_and_list_are_generic() {
        assert_eq!(
            super::write_file::WriteFileTool.output_category(),
            OutputCategory::Generic
        );
        assert_eq!(
            super::edit_file::EditFileTool.output_category(),
            OutputCategory::Generic
        );
        assert_eq!(
            super::list_dir::ListDirTool.output_category(),
            OutputCategory::Generic
        );
    }
}
