use crate::errors::ApiError;
use crate::model::TrackerConfig;
use anyhow::{Context, Result};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Shared HTTP plumbing for the run API clients.
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    http: reqwest::Client,
    base: Url,
    error_keys: &'static [&'static str],
}

/// Body fields read, in order, for the message of a failed request.
const DEFAULT_ERROR_KEYS: &[&str] = &["detail", "error"];

impl HttpClient {
    pub(crate) fn new(cfg: &TrackerConfig) -> Result<Self> {
        let base = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base URL: {}", cfg.base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("base URL cannot carry a path: {}", cfg.base_url);
        }
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base,
            error_keys: DEFAULT_ERROR_KEYS,
        })
    }

    /// Read the server message of a failed request from `keys` only.
    pub(crate) fn with_error_keys(mut self, keys: &'static [&'static str]) -> Self {
        self.error_keys = keys;
        self
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    pub(crate) fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let endpoint = url.path().to_string();
        tracing::trace!(%endpoint, "GET");
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        decode(endpoint, resp, self.error_keys).await
    }

    pub(crate) async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let endpoint = url.path().to_string();
        tracing::trace!(%endpoint, "POST");
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        decode(endpoint, resp, self.error_keys).await
    }
}

/// Any non-2xx is a failure of this exchange; the first of `error_keys` found
/// in the body becomes the server message.
async fn decode<T: DeserializeOwned>(
    endpoint: String,
    resp: reqwest::Response,
    error_keys: &[&str],
) -> Result<T, ApiError> {
    let status = resp.status();
    let body = resp.bytes().await.map_err(|e| ApiError::Transport {
        endpoint: endpoint.clone(),
        reason: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(ApiError::Status {
            endpoint,
            status: status.as_u16(),
            message: error_message(&body, error_keys),
        });
    }

    serde_json::from_slice(&body).map_err(|e| ApiError::Decode {
        endpoint,
        reason: e.to_string(),
    })
}

fn error_message(body: &[u8], keys: &[&str]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    keys.iter().find_map(|key| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|msg| !msg.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client(base_url: &str) -> HttpClient {
        HttpClient::new(&TrackerConfig {
            base_url: base_url.to_string(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            stall_after: Duration::from_secs(30),
            user_agent: "runwatch-test".into(),
        })
        .unwrap()
    }

    #[test]
    fn url_joins_and_encodes_segments() {
        let c = client("http://localhost:8080/");
        assert_eq!(
            c.url(&["api", "agent", "runs", "r 1/x"]).as_str(),
            "http://localhost:8080/api/agent/runs/r%201%2Fx"
        );

        let c = client("http://localhost:8080/proxy");
        assert_eq!(
            c.url(&["api", "operator", "health"]).as_str(),
            "http://localhost:8080/proxy/api/operator/health"
        );
    }

    #[test]
    fn error_message_prefers_detail_over_error() {
        let keys = DEFAULT_ERROR_KEYS;
        assert_eq!(
            error_message(br#"{"detail":"quota","error":"rate limited"}"#, keys).as_deref(),
            Some("quota")
        );
        assert_eq!(
            error_message(br#"{"error":"rate limited"}"#, keys).as_deref(),
            Some("rate limited")
        );
        assert_eq!(error_message(br#"{"error":"  "}"#, keys), None);
        assert_eq!(error_message(b"<html>bad gateway</html>", keys), None);
    }

    #[test]
    fn error_message_reads_only_the_configured_keys() {
        assert_eq!(
            error_message(br#"{"detail":"quota","error":"rate limited"}"#, &["error"]).as_deref(),
            Some("rate limited")
        );
        assert_eq!(error_message(br#"{"detail":"quota"}"#, &["error"]), None);
    }

    #[test]
    fn rejects_unusable_base_url() {
        let cfg = TrackerConfig {
            base_url: "mailto:ops@example.com".into(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            stall_after: Duration::from_secs(30),
            user_agent: "runwatch-test".into(),
        };
        assert!(HttpClient::new(&cfg).is_err());
    }
}
