//! Text summary builder for CLI output.
//!
//! This module formats human-readable lines for a finished run and its artifacts.

use crate::model::{ArtifactSet, RunRecord};
use serde_json::Value;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

const MAX_LISTED: usize = 5;

/// Build a text summary from a finished run record.
pub(crate) fn build_text_summary(record: &RunRecord) -> TextSummary {
    let mut lines = Vec::new();
    let run = &record.run;

    lines.push(format!("Run: {} ({:?})", run.run_id, record.kind));
    match run.step.as_deref() {
        Some(step) => lines.push(format!("Status: {} at {}", run.status, step)),
        None => lines.push(format!("Status: {}", run.status)),
    }
    if let Some(error) = run.error.as_deref() {
        lines.push(format!("Error: {error}"));
    }
    if let Some(progress) = run.progress.as_ref().and_then(Value::as_object) {
        let counters: Vec<String> = progress
            .iter()
            .map(|(k, v)| format!("{k}={}", scalar(v)))
            .collect();
        if !counters.is_empty() {
            lines.push(format!("Progress: {}", counters.join(", ")));
        }
    }

    artifact_lines(&record.artifacts, &mut lines);
    TextSummary { lines }
}

fn artifact_lines(artifacts: &ArtifactSet, lines: &mut Vec<String>) {
    if artifacts.is_empty() {
        lines.push("Artifacts: none".to_string());
        return;
    }

    for (kind, payload) in artifacts.iter() {
        match kind {
            "themes" => {
                let themes = artifacts.list(kind);
                lines.push(format!("Themes ({}):", themes.len()));
                for theme in themes.iter().take(MAX_LISTED) {
                    let label = theme.get("label").map(scalar).unwrap_or_else(|| scalar(theme));
                    match theme.get("count") {
                        Some(count) => lines.push(format!("  - {label} ({})", scalar(count))),
                        None => lines.push(format!("  - {label}")),
                    }
                }
            }
            "evidence" => {
                let evidence = artifacts.list(kind);
                lines.push(format!("Evidence ({} items):", evidence.len()));
                for item in evidence.iter().take(MAX_LISTED) {
                    let title = item.get("title").map(scalar).unwrap_or_default();
                    let url = item.get("url").map(scalar).unwrap_or_default();
                    lines.push(format!("  - {title} {url}").trim_end().to_string());
                }
            }
            "brief" => match payload {
                Value::String(text) => lines.push(format!("Brief: {text}")),
                other => {
                    lines.push("Brief:".to_string());
                    let pretty = serde_json::to_string_pretty(other).unwrap_or_default();
                    lines.extend(pretty.lines().map(|l| format!("  {l}")));
                }
            },
            "run_logs" => {
                lines.push(format!("Run logs: {} entries", artifacts.list(kind).len()));
            }
            other => lines.push(format!("{other}: {}", shape(payload))),
        }
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn shape(v: &Value) -> String {
    match v {
        Value::Array(items) => format!("{} items", items.len()),
        Value::Object(map) => format!("{} fields", map.len()),
        other => scalar(other),
    }
}
