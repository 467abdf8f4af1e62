//! Run watch controller.
//!
//! Submits a run, forwards tracker events to presentation layers, and honours
//! user cancellation.

use crate::api::RunApi;
use crate::model::{ArtifactSet, InfoEvent, RunHandle, RunStatus, TrackerEvent};
use crate::tracker::RunTracker;
use anyhow::{anyhow, Result};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Duration, Instant};

/// Commands emitted by UI layers to control the watched run.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Cancel,
}

/// Final state of a run that reached a terminal status.
#[derive(Debug, Clone)]
pub(crate) struct FinishedRun {
    pub handle: RunHandle,
    pub artifacts: ArtifactSet,
}

/// Submit `request` and follow it until it finishes or the user cancels.
///
/// `tracker_rx` must be the receiving end of the tracker's event channel.
/// Returns `None` when the watch was cancelled.
pub(crate) async fn watch_run<A: RunApi>(
    tracker: &RunTracker<A>,
    request: A::Request,
    mut tracker_rx: UnboundedReceiver<TrackerEvent>,
    event_tx: UnboundedSender<TrackerEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    stall_after: Duration,
) -> Result<Option<FinishedRun>> {
    let mut commands_open = true;

    // A cancel while the submission is still in flight abandons it.
    let submit = tracker.submit(request);
    tokio::pin!(submit);
    let handle = loop {
        tokio::select! {
            res = &mut submit => break res?,
            cmd = cmd_rx.recv(), if commands_open => match cmd {
                Some(UiCommand::Cancel) => {
                    tracing::info!("submission abandoned before the run was accepted");
                    return Ok(None);
                }
                None => commands_open = false,
            },
        }
    };
    let run_id = handle.run_id;

    let mut last_seen: (RunStatus, Option<String>) = (handle.status, None);
    let mut last_change = Instant::now();
    // Stall watchdog: keep the user informed when the remote run goes quiet.
    // A zero `stall_after` turns it off.
    let watch_stalls = !stall_after.is_zero();
    let mut watchdog = tokio::time::interval(if watch_stalls {
        stall_after.min(Duration::from_secs(1))
    } else {
        Duration::from_secs(1)
    });

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if commands_open => {
                match cmd {
                    Some(UiCommand::Cancel) => {
                        tracker.cancel();
                        // Forward what the tracker already queued, including its Cancelled event.
                        while let Ok(ev) = tracker_rx.try_recv() {
                            let _ = event_tx.send(ev);
                        }
                        return Ok(None);
                    }
                    None => commands_open = false,
                }
            }
            ev = tracker_rx.recv() => {
                let Some(ev) = ev else {
                    return Err(anyhow!("tracker event stream closed while watching {run_id}"));
                };
                match &ev {
                    TrackerEvent::StatusUpdated { handle } => {
                        let seen = (handle.status, handle.step.clone());
                        if seen != last_seen {
                            last_seen = seen;
                            last_change = Instant::now();
                        }
                    }
                    TrackerEvent::Finished { handle, artifacts } => {
                        let finished = FinishedRun {
                            handle: handle.clone(),
                            artifacts: artifacts.clone(),
                        };
                        let _ = event_tx.send(ev);
                        return Ok(Some(finished));
                    }
                    _ => {}
                }
                let _ = event_tx.send(ev);
            }
            _ = watchdog.tick(), if watch_stalls => {
                if last_change.elapsed() >= stall_after {
                    let status = tracker
                        .current_run()
                        .map_or(last_seen.0, |run| run.status);
                    let _ = event_tx.send(TrackerEvent::Info(InfoEvent::StillWaiting {
                        run_id: run_id.clone(),
                        status,
                    }));
                    last_change = Instant::now();
                }
            }
        }
    }
}
