// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Crash-safe session persistence.
//!
//! One JSON document per session at `<sessions_dir>/<id>.json`.  Every write
//! goes to a temporary file in the same directory, is fsynced, and then
//! renamed over the target, so a reader observes either the old or the new
//! file and never a torn one.  Destroyed sessions are moved into an
//! `archive/` subdirectory rather than deleted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::session::{Session, SessionSummary};

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.local/share/arvid/sessions` (XDG data dir), or a relative
    /// fallback when no home directory is resolvable.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join("arvid")
            .join("sessions")
    }

    pub fn from_config(cfg: &arvid_config::StoreConfig) -> Self {
        Self::new(
            cfg.sessions_dir
                .clone()
                .unwrap_or_else(Self::default_dir),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn archive_dir(&self) -> PathBuf {
        self.dir.join("archive")
    }

    /// Persist the session atomically.  A transient failure is retried once;
    /// the previous file stays intact when both attempts fail.
    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        match self.save_once(session) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(session = %session.id, error = %first, "session save failed; retrying once");
                self.save_once(session)
                    .with_context(|| format!("saving session {} (after retry)", session.id))
            }
        }
    }

    fn save_once(&self, session: &Session) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating sessions directory {}", self.dir.display()))?;
        let target = self.session_path(&session.id);
        let tmp = self.dir.join(format!("{}.json.tmp", session.id));
        let json = serde_json::to_vec_pretty(session).context("serializing session")?;

        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(&json)
            .with_context(|| format!("writing {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing {}", tmp.display()))?;
        drop(file);

        fs::rename(&tmp, &target)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        debug!(session = %session.id, path = %target.display(), "session saved");
        Ok(())
    }

    pub fn load(&self, id: &str) -> anyhow::Result<Session> {
        let path = self.session_path(id);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading session {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing session {}", path.display()))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.session_path(id).is_file()
    }

    /// All saved sessions, sorted by updated-time descending.
    pub fn list(&self) -> anyhow::Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Ok(summaries),
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .ok()
                .and_then(|t| serde_json::from_str::<Session>(&t).ok())
            {
                Some(session) => summaries.push(session.summary()),
                None => {
                    warn!(path = %path.display(), "skipping unreadable session file");
                }
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// The most recently updated session whose working directory is `cwd`
    /// (compared by canonical path).
    pub fn continue_latest(&self, cwd: &Path) -> anyhow::Result<Option<Session>> {
        for summary in self.list()? {
            let session = self.load(&summary.id)?;
            if session.works_in(cwd) {
                return Ok(Some(session));
            }
        }
        Ok(None)
    }

    /// Destroy a session: its file is moved to the archive directory.
    pub fn archive(&self, id: &str) -> anyhow::Result<PathBuf> {
        let source = self.session_path(id);
        anyhow::ensure!(source.is_file(), "no session file for id {id}");
        let archive = self.archive_dir();
        fs::create_dir_all(&archive)
            .with_context(|| format!("creating {}", archive.display()))?;
        let target = archive.join(format!("{id}.json"));
        fs::rename(&source, &target)
            .with_context(|| format!("archiving session {id}"))?;
        Ok(target)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
