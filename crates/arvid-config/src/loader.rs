// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/arvid/config.yaml"));
    paths.push(PathBuf::from("/etc/arvid/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/arvid/config.yaml"));
        paths.push(home.join(".config/arvid/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("arvid/config.yaml"));
        paths.push(cfg.join("arvid/config.yml"));
    }

    // 3. Project-local
    paths.push(PathBuf::from(".arvid/config.yaml"));
    paths.push(PathBuf::from(".arvid/config.yml"));
    paths.push(PathBuf::from(".arvid.yaml"));
    paths.push(PathBuf::from(".arvid.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files, then overlaying
/// environment variables.  The `extra` argument may provide an explicit path
/// (e.g. a `--config` CLI flag), which wins over every discovered file.
/// CLI flag overrides are applied by the caller on the returned value, so the
/// full precedence chain is: global file → project file → environment →
/// explicit file → CLI flags.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    apply_env(&mut config);
    Ok(config)
}

/// Overlay recognised `ARVID_*` environment variables onto a loaded config.
/// Invalid numeric values are ignored rather than failing the load.
fn apply_env(config: &mut Config) {
    if let Ok(v) = std::env::var("ARVID_PROVIDER") {
        if !v.is_empty() {
            config.model.provider = v;
        }
    }
    if let Ok(v) = std::env::var("ARVID_MODEL") {
        if !v.is_empty() {
            config.model.name = v;
        }
    }
    if let Ok(v) = std::env::var("ARVID_API_KEY") {
        if !v.is_empty() {
            config.model.api_key = Some(v);
        }
    }
    if let Ok(v) = std::env::var("ARVID_BASE_URL") {
        if !v.is_empty() {
            config.model.base_url = Some(v);
        }
    }
    if let Ok(v) = std::env::var("ARVID_CONTEXT_LIMIT") {
        if let Ok(n) = v.parse::<usize>() {
            config.agent.context_limit = n;
        }
    }
    if let Ok(v) = std::env::var("ARVID_SESSIONS_DIR") {
        if !v.is_empty() {
            config.store.sessions_dir = Some(PathBuf::from(v));
        }
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
