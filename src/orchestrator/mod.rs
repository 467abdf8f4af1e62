//! Application-level orchestration utilities.
//!
//! This module owns the watch lifecycle of one run (submit, follow, cancel) and
//! post-run processing such as auto-save, exports and history. CLI layers call
//! into this module to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{watch_run, FinishedRun, UiCommand};
pub(crate) use post_process::{process_run_completion, PostProcessOptions};
