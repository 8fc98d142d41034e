//! Durable publishing state.
//!
//! The orchestrator flushes its state to `<state_dir>/state.json` after every
//! per-package transition, always via write-then-rename so a crash never
//! leaves a torn file. The file is removed on clean completion and otherwise
//! left in place for resume.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::types::PublishingState;

/// Current state schema version
pub const CURRENT_STATE_VERSION: &str = "convoy.state.v1";

pub const STATE_FILE: &str = "state.json";

pub fn state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILE)
}

/// A fresh state covering the given publishing order.
pub fn new_state(publishing_order: &[String]) -> PublishingState {
    PublishingState {
        state_version: CURRENT_STATE_VERSION.to_string(),
        started_at: Utc::now(),
        resumed_at: None,
        completed: Vec::new(),
        failed: Vec::new(),
        remaining: publishing_order.to_vec(),
        current: None,
    }
}

pub fn load_state(state_dir: &Path) -> Result<Option<PublishingState>> {
    let path = state_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("cannot read state file {}", path.display()))?;
    let st: PublishingState = serde_json::from_str(&content)
        .with_context(|| format!("state file {} is not valid JSON", path.display()))?;
    Ok(Some(st))
}

pub fn save_state(state_dir: &Path, state: &PublishingState) -> Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("cannot create state directory {}", state_dir.display()))?;

    write_json_durably(&state_path(state_dir), state)
}

/// Remove the state file. Missing files are fine; this runs on every clean
/// completion.
pub fn clear_state(state_dir: &Path) -> Result<()> {
    let path = state_path(state_dir);
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("cannot remove state file {}", path.display()))?;
    }
    Ok(())
}

/// Write `value` as pretty JSON through a staged sibling file and an atomic
/// rename, so a crash mid-write never leaves a torn state file behind.
fn write_json_durably<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(STATE_FILE);
    let staged = path.with_file_name(format!("{file_name}.staged"));

    let mut json = serde_json::to_string_pretty(value).context("state is not serializable")?;
    json.push('\n');

    let mut file = fs::File::create(&staged)
        .with_context(|| format!("cannot stage state at {}", staged.display()))?;
    file.write_all(json.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("cannot write staged state {}", staged.display()))?;
    drop(file);

    fs::rename(&staged, path)
        .with_context(|| format!("cannot move staged state into {}", path.display()))?;

    // The rename itself must survive a crash too.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
