// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::Result;

use super::migration;
use super::Settings;

const SETTINGS_FILE: &str = "settings.json";

impl Settings {
    /// Directory holding warden state: `$WARDEN_HOME`, else `~/.warden`.
    pub fn warden_home() -> PathBuf {
        match std::env::var_os("WARDEN_HOME") {
            Some(home) => PathBuf::from(home),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".warden"),
        }
    }

    pub fn default_path() -> PathBuf {
        Self::warden_home().join(SETTINGS_FILE)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load settings from `path`. A missing file yields defaults; legacy
    /// layouts are migrated before deserializing.
    pub fn load_from(path: &Path) -> Result<Self> {
        let Some(raw) = read_json(path)? else {
            debug!(target: "warden.config", path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        };
        let settings = serde_json::from_value(migration::migrate_on_load(raw))?;
        debug!(target: "warden.config", path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save to `path`, merged over whatever is already there so keys this
    /// build does not model are kept. An unreadable file is replaced.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let ours = serde_json::to_value(self)?;
        let merged = match read_json(path) {
            Ok(Some(existing)) => migration::deep_merge(existing, ours),
            Ok(None) => ours,
            Err(e) => {
                warn!(target: "warden.config", path = %path.display(), error = %e, "replacing unreadable settings file");
                ours
            }
        };
        write_atomic(path, &merged)
    }

    /// Save to `path` without merging; unknown keys on disk are dropped.
    pub fn save_to_clean(&self, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_value(self)?)
    }
}

fn read_json(path: &Path) -> Result<Option<Value>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write through a temp file in the target directory, then persist over the target.
fn write_atomic(path: &Path, value: &Value) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir)?;
    }
    let mut staging = match parent {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };
    staging.write_all(serde_json::to_string_pretty(value)?.as_bytes())?;
    staging.as_file_mut().sync_all()?;
    staging.persist(path).map_err(|e| e.error)?;
    Ok(())
}
