//! Post-run processing utilities.
//!
//! Builds the run record, then handles auto-save and exports after a run finishes.

use super::FinishedRun;
use crate::model::{RunKind, RunRecord};
use crate::storage;
use std::path::{Path, PathBuf};

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub record: RunRecord,
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<PathBuf>,
}

/// Where a finished run should be written.
pub(crate) struct PostProcessOptions<'a> {
    pub history_dir: Option<&'a Path>,
    pub export_json: Option<&'a Path>,
}

/// Turn a finished run into a record, auto-save it and run exports.
pub(crate) fn process_run_completion(
    kind: RunKind,
    base_url: &str,
    request: serde_json::Value,
    finished: FinishedRun,
    opts: PostProcessOptions<'_>,
) -> ProcessedRun {
    let record = RunRecord {
        timestamp_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        kind,
        base_url: base_url.to_string(),
        request,
        run: finished.handle,
        artifacts: finished.artifacts,
    };

    let auto_saved_path = opts.history_dir.and_then(|dir| {
        storage::save_run_in(dir, &record)
            .map_err(|e| tracing::warn!(error = %format!("{e:#}"), "auto-save failed"))
            .ok()
    });

    let mut export_messages = Vec::new();
    if let Some(export_path) = opts.export_json {
        match storage::export_json(export_path, &record) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedRun {
        record,
        export_messages,
        auto_saved_path,
    }
}
