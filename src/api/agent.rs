//! Client for the feature-research agent API.

use super::http::HttpClient;
use super::RunApi;
use crate::errors::ApiError;
use crate::model::{ArtifactSet, ResearchRequest, RunReport, TrackerConfig};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default, rename = "runId", alias = "run_id")]
    run_id: Option<String>,
    #[serde(default)]
    demo_mode: Option<bool>,
}

/// Remote agent settings relevant to the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct AgentConfig {
    #[serde(default)]
    pub demo_mode: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct AgentApi {
    http: HttpClient,
}

impl AgentApi {
    pub(crate) fn new(cfg: &TrackerConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(cfg)?.with_error_keys(&["error"]),
        })
    }

    pub(crate) async fn fetch_config(&self) -> Result<AgentConfig, ApiError> {
        self.http
            .get_json(self.http.url(&["api", "agent", "config"]))
            .await
    }
}

#[async_trait]
impl RunApi for AgentApi {
    type Request = ResearchRequest;

    async fn submit(&self, request: &ResearchRequest) -> Result<String, ApiError> {
        let url = self.http.url(&["api", "agent", "feature-research"]);
        let endpoint = url.path().to_string();
        let resp: SubmitResponse = self.http.post_json(url, request).await?;
        if resp.demo_mode == Some(true) {
            tracing::info!("feature research accepted in demo mode");
        }
        resp.run_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::Decode {
                endpoint,
                reason: "response carried no runId".into(),
            })
    }

    async fn fetch_status(&self, run_id: &str) -> Result<RunReport, ApiError> {
        self.http
            .get_json(self.http.url(&["api", "agent", "runs", run_id]))
            .await
    }

    async fn fetch_artifacts(&self, run_id: &str) -> Result<ArtifactSet, ApiError> {
        self.http
            .get_json(self.http.url(&["api", "agent", "runs", run_id, "artifacts"]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_server;
    use crate::model::RunStatus;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn api(router: Router) -> AgentApi {
        let base = test_server::spawn(router).await;
        AgentApi::new(&test_server::config(&base)).unwrap()
    }

    fn sso_request() -> ResearchRequest {
        ResearchRequest::from_input("SSO support", "auth", None, None, None)
    }

    #[tokio::test]
    async fn submit_returns_run_id_and_sends_normalized_body() {
        let router = Router::new().route(
            "/api/agent/feature-research",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["feature"], "SSO support");
                assert_eq!(body["category"], "auth");
                assert_eq!(body["time_window_days"], 180);
                Json(json!({ "runId": "r-1", "demo_mode": true }))
            }),
        );
        let api = api(router).await;
        assert_eq!(api.submit(&sso_request()).await.unwrap(), "r-1");
    }

    #[tokio::test]
    async fn submit_surfaces_server_error_message() {
        let router = Router::new().route(
            "/api/agent/feature-research",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "rate limited" })),
                )
            }),
        );
        let err = api(router).await.submit(&sso_request()).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.server_message(), Some("rate limited"));
    }

    #[tokio::test]
    async fn submit_error_message_comes_from_error_field_only() {
        let router = Router::new().route(
            "/api/agent/feature-research",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "detail": "upstream quota", "error": "rate limited" })),
                )
            }),
        );
        let err = api(router).await.submit(&sso_request()).await.unwrap_err();
        assert_eq!(err.server_message(), Some("rate limited"));
    }

    #[tokio::test]
    async fn submit_without_run_id_is_a_decode_error() {
        let router = Router::new().route(
            "/api/agent/feature-research",
            post(|| async { Json(json!({})) }),
        );
        let err = api(router).await.submit(&sso_request()).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[tokio::test]
    async fn status_and_artifacts_decode_sparse_responses() {
        let router = Router::new()
            .route(
                "/api/agent/runs/{id}",
                get(|Path(id): Path<String>| async move {
                    assert_eq!(id, "r-1");
                    Json(json!({ "status": "running", "step": "gathering evidence" }))
                }),
            )
            .route(
                "/api/agent/runs/{id}/artifacts",
                get(|| async { Json(json!({ "themes": [{ "label": "SSO", "count": 5 }] })) }),
            );
        let api = api(router).await;

        let report = api.fetch_status("r-1").await.unwrap();
        assert_eq!(report.status, RunStatus::Running);
        assert_eq!(report.step.as_deref(), Some("gathering evidence"));
        assert_eq!(report.error, None);
        assert_eq!(report.progress, None);

        let artifacts = api.fetch_artifacts("r-1").await.unwrap();
        assert_eq!(artifacts.list("themes")[0]["count"], 5);
    }

    #[tokio::test]
    async fn not_found_status_is_a_fetch_failure() {
        let api = api(Router::new()).await;
        let err = api.fetch_status("missing").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let api = AgentApi::new(&test_server::config(&base)).unwrap();
        let err = api.fetch_artifacts("r-1").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport { .. }));
    }

    #[tokio::test]
    async fn reads_demo_mode_flag() {
        let router = Router::new().route(
            "/api/agent/config",
            get(|| async { Json(json!({ "demo_mode": true })) }),
        );
        assert!(api(router).await.fetch_config().await.unwrap().demo_mode);
    }
}
