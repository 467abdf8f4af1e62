//! Client for the decision-operator API.
//!
//! The operator has no separate artifacts route: artifacts ride along in the
//! run detail as a list of `{ type, json }` entries.

use super::http::HttpClient;
use super::RunApi;
use crate::errors::ApiError;
use crate::model::{
    ArtifactSet, DecisionRequest, DecisionRunSummary, RunReport, RunStatus, TrackerConfig,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    decision_run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtifactEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    json: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RunDetail {
    status: RunStatus,
    #[serde(default)]
    current_step: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    artifacts: Vec<ArtifactEntry>,
}

impl RunDetail {
    fn report(&self) -> RunReport {
        RunReport {
            status: self.status,
            step: self.current_step.clone(),
            error: self.error.clone(),
            progress: None,
        }
    }

    /// Later entries of the same type win.
    fn into_artifacts(self) -> ArtifactSet {
        self.artifacts
            .into_iter()
            .map(|entry| (entry.kind, entry.json))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct OperatorApi {
    http: HttpClient,
}

impl OperatorApi {
    pub(crate) fn new(cfg: &TrackerConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(cfg)?,
        })
    }

    async fn detail(&self, run_id: &str) -> Result<RunDetail, ApiError> {
        self.http
            .get_json(self.http.url(&["api", "operator", "decision-runs", run_id]))
            .await
    }

    /// All runs the operator knows about, as the operator orders them.
    pub(crate) async fn list_runs(&self) -> Result<Vec<DecisionRunSummary>, ApiError> {
        self.http
            .get_json(self.http.url(&["api", "operator", "decision-runs"]))
            .await
    }

    /// Operator health, `offline` when it cannot be reached.
    pub(crate) async fn health(&self) -> String {
        match self
            .http
            .get_json::<HealthResponse>(self.http.url(&["api", "operator", "health"]))
            .await
        {
            Ok(resp) => resp
                .status
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "ok".to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "decision operator health check failed");
                "offline".to_string()
            }
        }
    }
}

#[async_trait]
impl RunApi for OperatorApi {
    type Request = DecisionRequest;

    async fn submit(&self, request: &DecisionRequest) -> Result<String, ApiError> {
        let url = self.http.url(&["api", "operator", "decision-runs"]);
        let endpoint = url.path().to_string();
        let resp: SubmitResponse = self.http.post_json(url, request).await?;
        resp.decision_run_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::Decode {
                endpoint,
                reason: "response carried no decision_run_id".into(),
            })
    }

    async fn fetch_status(&self, run_id: &str) -> Result<RunReport, ApiError> {
        Ok(self.detail(run_id).await?.report())
    }

    async fn fetch_artifacts(&self, run_id: &str) -> Result<ArtifactSet, ApiError> {
        Ok(self.detail(run_id).await?.into_artifacts())
    }
}
