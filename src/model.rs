use crate::errors::TrackerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default time window for feature research when the caller gives none.
pub const DEFAULT_TIME_WINDOW_DAYS: u32 = 180;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub stall_after: Duration,
    pub user_agent: String,
}

/// Remote status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// The remote workflow is blocked on a person. Still polled.
    NeedsUserAction,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// `completed` and `failed` end the polling lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::NeedsUserAction => "needs_user_action",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known state of one tracked remote run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: Option<serde_json::Value>,
}

impl RunHandle {
    /// A freshly submitted run, before its first poll.
    pub fn queued(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Queued,
            step: None,
            error: None,
            progress: None,
        }
    }

    /// Overwrite every polled field with the server's report.
    pub fn apply(&mut self, report: RunReport) {
        self.status = report.status;
        self.step = report.step;
        self.error = report.error;
        self.progress = report.progress;
    }
}

/// One status response, normalized across the agent and operator APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    #[serde(default, alias = "current_step")]
    pub step: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: Option<serde_json::Value>,
}

#[cfg(test)]
impl RunReport {
    pub fn new(status: RunStatus) -> Self {
        Self {
            status,
            step: None,
            error: None,
            progress: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Outputs of a run keyed by artifact type. Replaced wholesale on each fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactSet(BTreeMap<String, serde_json::Value>);

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn insert(&mut self, kind: impl Into<String>, payload: serde_json::Value) {
        self.0.insert(kind.into(), payload);
    }

    pub fn get(&self, kind: &str) -> Option<&serde_json::Value> {
        self.0.get(kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Array-shaped artifact (`themes`, `evidence`, `run_logs`), empty when absent.
    pub fn list(&self, kind: &str) -> &[serde_json::Value] {
        self.get(kind)
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl FromIterator<(String, serde_json::Value)> for ArtifactSet {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A request that can start a remote run.
pub trait RunRequest: Serialize + Send + Sync + 'static {
    /// Which kind of run this request starts.
    fn kind(&self) -> RunKind;

    /// Reject requests whose required fields are blank.
    fn validate(&self) -> Result<(), TrackerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Research,
    Decision,
}

/// Parameters for a feature-research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub feature: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default)]
    pub competitors: Vec<String>,
    pub time_window_days: u32,
}

impl ResearchRequest {
    /// Normalize raw form input: trims fields, drops a blank persona, splits the
    /// comma-separated competitor list and defaults the time window.
    pub fn from_input(
        feature: &str,
        category: &str,
        persona: Option<&str>,
        competitors: Option<&str>,
        time_window_days: Option<u32>,
    ) -> Self {
        Self {
            feature: feature.trim().to_string(),
            category: category.trim().to_string(),
            persona: persona
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            competitors: competitors
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            time_window_days: time_window_days
                .filter(|d| *d > 0)
                .unwrap_or(DEFAULT_TIME_WINDOW_DAYS),
        }
    }
}

impl RunRequest for ResearchRequest {
    fn kind(&self) -> RunKind {
        RunKind::Research
    }

    fn validate(&self) -> Result<(), TrackerError> {
        if self.feature.trim().is_empty() {
            return Err(TrackerError::InvalidRequest { field: "feature" });
        }
        if self.category.trim().is_empty() {
            return Err(TrackerError::InvalidRequest { field: "category" });
        }
        Ok(())
    }
}

/// Parameters for a decision-operator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub feature_name: String,
}

impl DecisionRequest {
    pub fn new(feature_name: &str) -> Self {
        Self {
            feature_name: feature_name.trim().to_string(),
        }
    }
}

impl RunRequest for DecisionRequest {
    fn kind(&self) -> RunKind {
        RunKind::Decision
    }

    fn validate(&self) -> Result<(), TrackerError> {
        if self.feature_name.trim().is_empty() {
            return Err(TrackerError::InvalidRequest {
                field: "feature_name",
            });
        }
        Ok(())
    }
}

/// Summary row from the decision-operator run list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRunSummary {
    pub id: String,
    #[serde(default)]
    pub feature_name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Events emitted by the tracker and consumed by presentation layers.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Submitted {
        handle: RunHandle,
    },
    StatusUpdated {
        handle: RunHandle,
    },
    ArtifactsUpdated {
        run_id: String,
        kinds: Vec<String>,
    },
    PollFailed {
        run_id: String,
        message: String,
    },
    Finished {
        handle: RunHandle,
        artifacts: ArtifactSet,
    },
    Cancelled {
        run_id: String,
    },
    Info(InfoEvent),
}

/// Structured info events for UI/CLI layers.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    DemoMode,
    StillWaiting { run_id: String, status: RunStatus },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::DemoMode => "Remote agent is running in demo mode".to_string(),
            InfoEvent::StillWaiting { run_id, status } => {
                format!("Still waiting on run {} ({})", run_id, status)
            }
        }
    }
}

/// Persisted outcome of a watched run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(default)]
    pub timestamp_utc: String,
    pub kind: RunKind,
    pub base_url: String,
    pub request: serde_json::Value,
    pub run: RunHandle,
    #[serde(default)]
    pub artifacts: ArtifactSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn research_request_normalizes_form_input() {
        let req = ResearchRequest::from_input(
            "  SSO support ",
            "auth",
            Some("   "),
            Some("okta, , auth0 ,"),
            Some(0),
        );
        assert_eq!(req.feature, "SSO support");
        assert_eq!(req.persona, None);
        assert_eq!(req.competitors, vec!["okta", "auth0"]);
        assert_eq!(req.time_window_days, DEFAULT_TIME_WINDOW_DAYS);

        let body = serde_json::to_value(&req).unwrap();
        assert!(body.get("persona").is_none());
    }

    #[test]
    fn blank_required_fields_are_rejected() {
        let req = ResearchRequest::from_input("SSO", " ", None, None, None);
        assert!(matches!(
            req.validate(),
            Err(TrackerError::InvalidRequest { field: "category" })
        ));
        assert!(DecisionRequest::new("  ").validate().is_err());
        assert!(DecisionRequest::new("Dark Mode").validate().is_ok());
    }

    #[test]
    fn report_tolerates_missing_optional_fields() {
        let report: RunReport = serde_json::from_value(json!({ "status": "running" })).unwrap();
        assert_eq!(report, RunReport::new(RunStatus::Running));

        let report: RunReport = serde_json::from_value(json!({
            "status": "needs_user_action",
            "current_step": "JIRA_CREATE_EPIC",
            "error": null
        }))
        .unwrap();
        assert_eq!(report.status, RunStatus::NeedsUserAction);
        assert_eq!(report.step.as_deref(), Some("JIRA_CREATE_EPIC"));
        assert!(!report.status.is_terminal());
    }

    #[test]
    fn unrecognized_status_is_not_terminal() {
        let report: RunReport = serde_json::from_value(json!({ "status": "paused" })).unwrap();
        assert_eq!(report.status, RunStatus::Unknown);
        assert!(!report.status.is_terminal());
    }

    #[test]
    fn apply_replaces_every_polled_field() {
        let mut handle = RunHandle::queued("r-1");
        handle.error = Some("Unable to poll run state".into());
        handle.apply(RunReport::new(RunStatus::Running).with_step("gathering evidence"));
        assert_eq!(handle.status, RunStatus::Running);
        assert_eq!(handle.step.as_deref(), Some("gathering evidence"));
        assert_eq!(handle.error, None);
        assert_eq!(handle.run_id, "r-1");
    }

    #[test]
    fn artifact_list_defaults_to_empty() {
        let set: ArtifactSet =
            serde_json::from_value(json!({ "themes": [{ "label": "SSO", "count": 5 }], "brief": "x" }))
                .unwrap();
        assert_eq!(set.list("themes").len(), 1);
        assert!(set.list("brief").is_empty());
        assert!(set.list("evidence").is_empty());
        assert_eq!(set.kinds().collect::<Vec<_>>(), vec!["brief", "themes"]);
    }
}
