//! Client-side watch over one remote run.
//!
//! The tracker owns the single "current run" identity and the single polling
//! task. Every transition that invalidates in-flight work (submit, start/stop
//! polling, cancel) advances a generation counter; a poll tick applies its
//! responses only if the generation it captured is still current.

use crate::api::RunApi;
use crate::errors::TrackerError;
use crate::model::{ArtifactSet, RunHandle, RunRequest, RunStatus, TrackerEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Annotation set on the handle when neither fetch of a tick succeeded.
pub const POLL_FAILURE_MESSAGE: &str = "Unable to poll run state";

/// Shortest poll interval the tracker will run with.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a single poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No run is being tracked.
    Idle,
    /// Another tick for the same generation is still in flight.
    Busy,
    /// The run was cancelled, superseded or stopped while the fetches were in flight.
    Stale,
    Pending(RunStatus),
    Terminal(RunStatus),
}

/// Point-in-time copy of the tracker state for presentation layers.
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    pub run: Option<RunHandle>,
    pub artifacts: ArtifactSet,
    pub polling: bool,
}

struct Poller {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TrackerState {
    generation: u64,
    run: Option<RunHandle>,
    artifacts: ArtifactSet,
    poller: Option<Poller>,
    in_flight: Option<u64>,
}

impl TrackerState {
    /// Invalidate in-flight work and abort the polling task, if any.
    fn invalidate(&mut self) {
        self.generation += 1;
        if let Some(poller) = self.poller.take() {
            poller.handle.abort();
        }
    }
}

struct Inner<A: RunApi> {
    api: A,
    poll_interval: Duration,
    submitting: AtomicBool,
    state: Mutex<TrackerState>,
    event_tx: Option<UnboundedSender<TrackerEvent>>,
}

/// Tracks at most one remote run at a time. Cheap to clone; clones share state.
pub struct RunTracker<A: RunApi> {
    inner: Arc<Inner<A>>,
}

impl<A: RunApi> Clone for RunTracker<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Clears the busy flag when the submission finishes, however it finishes.
struct SubmitGuard<'a>(&'a AtomicBool);

impl<'a> SubmitGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SubmitGuard(flag))
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Clears the in-flight marker even if the tick is aborted mid-await.
struct TickGuard<'a> {
    state: &'a Mutex<TrackerState>,
    generation: u64,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if state.in_flight == Some(self.generation) {
            state.in_flight = None;
        }
    }
}

fn lock(state: &Mutex<TrackerState>) -> MutexGuard<'_, TrackerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<A: RunApi> RunTracker<A> {
    pub fn new(api: A, poll_interval: Duration) -> Self {
        Self::build(api, poll_interval, None)
    }

    /// Like [`RunTracker::new`], also reporting every state change on `event_tx`.
    pub fn with_events(
        api: A,
        poll_interval: Duration,
        event_tx: UnboundedSender<TrackerEvent>,
    ) -> Self {
        Self::build(api, poll_interval, Some(event_tx))
    }

    fn build(
        api: A,
        poll_interval: Duration,
        event_tx: Option<UnboundedSender<TrackerEvent>>,
    ) -> Self {
        if poll_interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                requested = ?poll_interval,
                used = ?MIN_POLL_INTERVAL,
                "poll interval too short; clamping"
            );
        }
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            inner: Arc::new(Inner {
                api,
                poll_interval,
                submitting: AtomicBool::new(false),
                state: Mutex::new(TrackerState::default()),
                event_tx,
            }),
        }
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    /// Start a remote run and begin polling it.
    ///
    /// On success any previous run is discarded. On failure the tracker is
    /// left as it was and nothing is polled.
    pub async fn submit(&self, request: A::Request) -> Result<RunHandle, TrackerError> {
        request.validate()?;
        let _busy = SubmitGuard::acquire(&self.inner.submitting)
            .ok_or(TrackerError::SubmissionInFlight)?;

        let run_id = match self.inner.api.submit(&request).await {
            Ok(run_id) => run_id,
            Err(e) => {
                tracing::warn!(error = %e, kind = ?request.kind(), "run submission failed");
                return Err(TrackerError::submission(&e));
            }
        };

        let handle = RunHandle::queued(run_id.clone());
        {
            let mut state = self.inner.lock_state();
            state.invalidate();
            state.run = Some(handle.clone());
            state.artifacts = ArtifactSet::new();
        }
        tracing::info!(%run_id, kind = ?request.kind(), "run submitted");
        self.inner.emit(TrackerEvent::Submitted {
            handle: handle.clone(),
        });

        self.start_polling(&run_id)?;
        Ok(handle)
    }

    /// Begin the repeating poll cycle for the current run, replacing any active cycle.
    ///
    /// The first tick fires immediately. A run that already reached a terminal
    /// status is never polled again.
    pub fn start_polling(&self, run_id: &str) -> Result<(), TrackerError> {
        let mut state = self.inner.lock_state();
        let status = match state.run.as_ref() {
            Some(run) if run.run_id == run_id => run.status,
            _ => {
                return Err(TrackerError::NotTracking {
                    run_id: run_id.to_string(),
                })
            }
        };

        state.invalidate();
        if status.is_terminal() {
            tracing::debug!(%run_id, %status, "run already finished; not polling");
            return Ok(());
        }

        let generation = state.generation;
        let handle = tokio::spawn(poll_loop(
            Arc::downgrade(&self.inner),
            generation,
            self.inner.poll_interval,
        ));
        state.poller = Some(Poller { generation, handle });
        tracing::debug!(%run_id, generation, "polling started");
        Ok(())
    }

    /// Run one status + artifacts tick now. Stops polling on a terminal status.
    pub async fn poll_once(&self) -> PollOutcome {
        let generation = self.inner.lock_state().generation;
        let outcome = self.inner.poll_tick(generation).await;
        if matches!(outcome, PollOutcome::Terminal(_)) {
            self.stop_polling();
        }
        outcome
    }

    /// Cancel the active poll cycle. Responses still in flight are discarded.
    pub fn stop_polling(&self) {
        self.inner.lock_state().invalidate();
    }

    /// Stop tracking the current run and forget its state. The remote run is
    /// not told.
    pub fn cancel(&self) {
        let cancelled = {
            let mut state = self.inner.lock_state();
            state.invalidate();
            state.artifacts = ArtifactSet::new();
            state.run.take()
        };
        if let Some(run) = cancelled {
            tracing::info!(run_id = %run.run_id, "tracking cancelled");
            self.inner.emit(TrackerEvent::Cancelled { run_id: run.run_id });
        }
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.inner.lock_state();
        TrackerSnapshot {
            run: state.run.clone(),
            artifacts: state.artifacts.clone(),
            polling: state.poller.is_some(),
        }
    }

    pub fn current_run(&self) -> Option<RunHandle> {
        self.inner.lock_state().run.clone()
    }

    pub fn artifacts(&self) -> ArtifactSet {
        self.inner.lock_state().artifacts.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.lock_state().poller.is_some()
    }

    pub fn is_submitting(&self) -> bool {
        self.inner.submitting.load(Ordering::Acquire)
    }
}

impl<A: RunApi> Inner<A> {
    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        lock(&self.state)
    }

    fn emit(&self, event: TrackerEvent) {
        if let Some(tx) = self.event_tx.as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Fetch status then artifacts for the run current at `generation`, and
    /// apply whatever succeeded if that generation is still current.
    async fn poll_tick(&self, generation: u64) -> PollOutcome {
        let run_id = {
            let mut state = self.lock_state();
            if state.generation != generation {
                return PollOutcome::Stale;
            }
            let Some(run) = state.run.as_ref() else {
                return PollOutcome::Idle;
            };
            if state.in_flight == Some(generation) {
                return PollOutcome::Busy;
            }
            let run_id = run.run_id.clone();
            state.in_flight = Some(generation);
            run_id
        };
        let _tick = TickGuard {
            state: &self.state,
            generation,
        };

        let status = self.api.fetch_status(&run_id).await;
        let artifacts = self.api.fetch_artifacts(&run_id).await;

        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.generation != generation {
            tracing::debug!(%run_id, generation, "discarding stale poll responses");
            return PollOutcome::Stale;
        }
        let Some(run) = state.run.as_mut().filter(|run| run.run_id == run_id) else {
            return PollOutcome::Stale;
        };

        let status_ok = match status {
            Ok(report) => {
                run.apply(report);
                self.emit(TrackerEvent::StatusUpdated {
                    handle: run.clone(),
                });
                true
            }
            Err(e) => {
                tracing::debug!(%run_id, error = %e, "status fetch failed");
                false
            }
        };
        let artifacts_ok = match artifacts {
            Ok(set) => {
                let kinds = set.kinds().map(str::to_string).collect();
                state.artifacts = set;
                self.emit(TrackerEvent::ArtifactsUpdated {
                    run_id: run_id.clone(),
                    kinds,
                });
                true
            }
            Err(e) => {
                tracing::debug!(%run_id, error = %e, "artifact fetch failed");
                false
            }
        };
        if !status_ok && !artifacts_ok {
            tracing::warn!(%run_id, "poll failed; retrying on next tick");
            run.error = Some(POLL_FAILURE_MESSAGE.to_string());
            self.emit(TrackerEvent::PollFailed {
                run_id: run_id.clone(),
                message: POLL_FAILURE_MESSAGE.to_string(),
            });
        }

        let status = run.status;
        if status.is_terminal() {
            tracing::info!(%run_id, %status, "run finished");
            self.emit(TrackerEvent::Finished {
                handle: run.clone(),
                artifacts: state.artifacts.clone(),
            });
            PollOutcome::Terminal(status)
        } else {
            PollOutcome::Pending(status)
        }
    }

    /// Forget the polling task once it exits on its own, unless it was already replaced.
    fn release_poller(&self, generation: u64) {
        let mut state = self.lock_state();
        if state
            .poller
            .as_ref()
            .is_some_and(|p| p.generation == generation)
        {
            state.poller = None;
        }
    }
}

/// Ticks run back to back inside one task, so a tick never overlaps the
/// previous one; a slow tick delays the next instead of bursting.
async fn poll_loop<A: RunApi>(inner: Weak<Inner<A>>, generation: u64, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match inner.poll_tick(generation).await {
            PollOutcome::Pending(_) | PollOutcome::Busy => continue,
            PollOutcome::Terminal(_) | PollOutcome::Idle | PollOutcome::Stale => {
                inner.release_poller(generation);
                return;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fake;
