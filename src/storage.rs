//! Local history of watched runs.
//!
//! Records live as one pretty-printed JSON file per run under the user's local
//! data directory.

use crate::model::RunRecord;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directory that holds saved run records.
pub fn history_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory on this platform")?;
    Ok(base.join("runwatch").join("runs"))
}

pub fn load_recent(limit: usize) -> Result<Vec<RunRecord>> {
    load_recent_in(&history_dir()?, limit)
}

pub fn save_run_in(dir: &Path, record: &RunRecord) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create history directory {}", dir.display()))?;
    let path = dir.join(file_name(record));
    export_json(&path, record)?;
    Ok(path)
}

/// Most recent records first. Unreadable files are skipped.
pub fn load_recent_in(dir: &Path, limit: usize) -> Result<Vec<RunRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read history directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    // File names start with a sortable UTC timestamp.
    paths.sort();
    paths.reverse();

    let mut records = Vec::new();
    for path in paths {
        if records.len() >= limit {
            break;
        }
        let loaded = std::fs::read(&path)
            .ok()
            .and_then(|raw| serde_json::from_slice::<RunRecord>(&raw).ok());
        match loaded {
            Some(record) => records.push(record),
            None => tracing::debug!(path = %path.display(), "skipping unreadable run record"),
        }
    }
    Ok(records)
}

pub fn export_json(path: &Path, record: &RunRecord) -> Result<()> {
    let out = serde_json::to_vec_pretty(record)?;
    std::fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn file_name(record: &RunRecord) -> String {
    let stamp: String = record
        .timestamp_utc
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let run_id: String = record
        .run
        .run_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{stamp}-{run_id}.json")
}
