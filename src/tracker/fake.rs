//! Scripted run API for exercising the tracker without a network.

use crate::api::RunApi;
use crate::errors::ApiError;
use crate::model::{ArtifactSet, ResearchRequest, RunReport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Scripted stand-in for a remote run API. The last scripted reply for a run
/// repeats once its queue drains.
#[derive(Default)]
pub(crate) struct FakeApi {
    pub(crate) submissions: Mutex<VecDeque<Result<String, ApiError>>>,
    pub(crate) statuses: Mutex<HashMap<String, VecDeque<Result<RunReport, ApiError>>>>,
    pub(crate) artifacts: Mutex<HashMap<String, VecDeque<Result<ArtifactSet, ApiError>>>>,
    pub(crate) status_gates: Mutex<HashMap<String, Arc<Notify>>>,
    pub(crate) submit_gate: Mutex<Option<Arc<Notify>>>,
    pub(crate) status_calls: Mutex<Vec<String>>,
    pub(crate) artifact_calls: AtomicUsize,
}

pub(crate) fn unreachable(endpoint: &str) -> ApiError {
    ApiError::Transport {
        endpoint: endpoint.to_string(),
        reason: "connection reset".into(),
    }
}

fn next<T: Clone>(queue: Option<&mut VecDeque<T>>) -> Option<T> {
    let queue = queue?;
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl FakeApi {
    pub(crate) fn accept(self, run_id: &str) -> Self {
        self.submissions
            .lock()
            .unwrap()
            .push_back(Ok(run_id.to_string()));
        self
    }

    pub(crate) fn reject(self, err: ApiError) -> Self {
        self.submissions.lock().unwrap().push_back(Err(err));
        self
    }

    pub(crate) fn status(self, run_id: &str, reply: Result<RunReport, ApiError>) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .entry(run_id.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub(crate) fn artifacts(self, run_id: &str, reply: Result<ArtifactSet, ApiError>) -> Self {
        self.artifacts
            .lock()
            .unwrap()
            .entry(run_id.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Hold status fetches for `run_id` until the returned gate is notified.
    pub(crate) fn gate_status(&self, run_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.status_gates
            .lock()
            .unwrap()
            .insert(run_id.to_string(), gate.clone());
        gate
    }

    pub(crate) fn gate_submit(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.submit_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunApi for FakeApi {
    type Request = ResearchRequest;

    async fn submit(&self, _request: &ResearchRequest) -> Result<String, ApiError> {
        let gate = self.submit_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(unreachable("/runs")))
    }

    async fn fetch_status(&self, run_id: &str) -> Result<RunReport, ApiError> {
        self.status_calls.lock().unwrap().push(run_id.to_string());
        let gate = self.status_gates.lock().unwrap().get(run_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        next(self.statuses.lock().unwrap().get_mut(run_id))
            .unwrap_or_else(|| Err(unreachable("/runs/{id}")))
    }

    async fn fetch_artifacts(&self, run_id: &str) -> Result<ArtifactSet, ApiError> {
        self.artifact_calls.fetch_add(1, Ordering::SeqCst);
        next(self.artifacts.lock().unwrap().get_mut(run_id))
            .unwrap_or_else(|| Ok(ArtifactSet::new()))
    }
}
