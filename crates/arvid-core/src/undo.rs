// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use tracing::debug;

use arvid_tools::UndoRecord;

/// Journal of reversible tool effects, most recent last.  Backs the `/undo`
/// command: popping an entry restores the previous file bytes, or removes
/// the file when the tool created it.
#[derive(Default)]
pub struct UndoLog {
    records: Vec<UndoRecord>,
}

impl UndoLog {
    pub fn push(&mut self, record: UndoRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Revert the most recent reversible effect.  Returns a description of
    /// what was reverted, or `None` when the journal is empty.
    pub fn undo_last(&mut self) -> anyhow::Result<Option<String>> {
        let Some(record) = self.records.pop() else {
            return Ok(None);
        };
        debug!(path = %record.path.display(), "reverting {}", record.description);
        match &record.previous {
            Some(bytes) => {
                std::fs::write(&record.path, bytes)
                    .with_context(|| format!("restoring {}", record.path.display()))?;
                Ok(Some(format!(
                    "restored previous content of {}",
                    record.path.display()
                )))
            }
            None => {
                std::fs::remove_file(&record.path)
                    .with_context(|| format!("removing {}", record.path.display()))?;
                Ok(Some(format!(
                    "removed created file {}",
                    record.path.display()
                )))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
