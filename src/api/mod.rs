//! REST clients for the remote run APIs.
//!
//! Both the feature-research agent and the decision operator expose the same
//! submit / status / artifacts shape, so the tracker only sees [`RunApi`].

mod agent;
mod http;
mod operator;

pub(crate) use agent::{AgentApi, AgentConfig};
pub(crate) use operator::OperatorApi;

use crate::errors::ApiError;
use crate::model::{ArtifactSet, RunReport, RunRequest};
use async_trait::async_trait;

/// Remote system that runs jobs on our behalf.
#[async_trait]
pub trait RunApi: Send + Sync + 'static {
    type Request: RunRequest;

    /// Start a run and return the id the remote system assigned to it.
    async fn submit(&self, request: &Self::Request) -> Result<String, ApiError>;

    async fn fetch_status(&self, run_id: &str) -> Result<RunReport, ApiError>;

    async fn fetch_artifacts(&self, run_id: &str) -> Result<ArtifactSet, ApiError>;
}
