//! Snapshot persistence for the CLI.
//!
//! The engine core never reads this file; it exists so `kse status` and
//! other processes can inspect the last known orchestration state.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::models::OrchestrationState;

/// Location of the persisted snapshot inside a workspace.
pub fn status_path(workspace_root: &Path) -> PathBuf {
    workspace_root
        .join(".kiro")
        .join("config")
        .join("orchestration-status.json")
}

/// Persist a snapshot atomically (write to a temp file, then rename).
pub fn save(workspace_root: &Path, snapshot: &OrchestrationState) -> Result<()> {
    let path = status_path(workspace_root);
    let dir = path.parent().context("Status path has no parent")?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
    Ok(())
}

/// Load the last persisted snapshot.
pub fn load(workspace_root: &Path) -> Result<OrchestrationState> {
    let path = status_path(workspace_root);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("No orchestration status at {}", path.display()))?;
    serde_json::from_str(&raw).context("Failed to parse orchestration status")
}
