//! Typed errors for run tracking.
//!
//! - `TrackerError` — what callers of the tracker see
//! - `ApiError` — the outcome of a single HTTP exchange; never crosses the polling boundary

use thiserror::Error;

/// Message used when a submission fails without a server-provided reason.
pub const SUBMIT_FALLBACK_MESSAGE: &str = "Failed to start run";

/// Errors surfaced to callers of the run tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{message}")]
    SubmissionFailed { message: String },

    #[error("A submission is already in flight")]
    SubmissionInFlight,

    #[error("Required field `{field}` is empty")]
    InvalidRequest { field: &'static str },

    #[error("Run {run_id} is not being tracked")]
    NotTracking { run_id: String },

    #[error("Run {run_id} failed: {message}")]
    RemoteJobFailed { run_id: String, message: String },
}

/// Failure of one request against the remote run API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{endpoint} returned HTTP {status}")]
    Status {
        endpoint: String,
        status: u16,
        message: Option<String>,
    },

    #[error("{endpoint} unreachable: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} sent an unexpected response: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl ApiError {
    /// Reason the server gave in its error body, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl TrackerError {
    /// Wrap a failed submission, preferring the server's own message.
    pub fn submission(err: &ApiError) -> Self {
        TrackerError::SubmissionFailed {
            message: err
                .server_message()
                .unwrap_or(SUBMIT_FALLBACK_MESSAGE)
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_prefers_server_message() {
        let err = ApiError::Status {
            endpoint: "/api/agent/feature-research".into(),
            status: 500,
            message: Some("rate limited".into()),
        };
        assert_eq!(TrackerError::submission(&err).to_string(), "rate limited");
    }

    #[test]
    fn submission_falls_back_for_transport_errors() {
        let err = ApiError::Transport {
            endpoint: "/api/agent/feature-research".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            TrackerError::submission(&err).to_string(),
            SUBMIT_FALLBACK_MESSAGE
        );
        assert_eq!(err.status(), None);
    }
}
