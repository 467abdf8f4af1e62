use crate::api::{AgentApi, AgentConfig, OperatorApi, RunApi};
use crate::errors::TrackerError;
use crate::model::{
    DecisionRequest, DecisionRunSummary, InfoEvent, ResearchRequest, RunRecord, RunRequest,
    RunStatus, TrackerConfig, TrackerEvent,
};
use crate::orchestrator::{process_run_completion, watch_run, PostProcessOptions, UiCommand};
use crate::tracker::{RunTracker, TrackerSnapshot};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "runwatch",
    version,
    about = "Submit research and decision runs and watch them to completion"
)]
pub struct Cli {
    /// Base URL of the app backend that serves /api/agent and /api/operator
    #[arg(
        long,
        env = "RUNWATCH_BASE_URL",
        default_value = "http://localhost:8080",
        global = true
    )]
    pub base_url: String,

    /// Time between status polls
    #[arg(long, default_value = "2s", value_parser = parse_nonzero_duration, global = true)]
    pub poll_interval: humantime::Duration,

    /// Per-request HTTP timeout
    #[arg(long, default_value = "30s", value_parser = parse_nonzero_duration, global = true)]
    pub request_timeout: humantime::Duration,

    /// Warn when a run shows no progress for this long (0s turns the warning off)
    #[arg(long, default_value = "30s", global = true)]
    pub stall_after: humantime::Duration,

    /// Print JSON and exit
    #[arg(long, global = true)]
    pub json: bool,

    /// Print a text summary (the default)
    #[arg(long, global = true, conflicts_with = "json")]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long, global = true)]
    pub silent: bool,

    /// Export the finished run record as JSON
    #[arg(long, global = true)]
    pub export_json: Option<std::path::PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, global = true)]
    pub auto_save: bool,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Start a feature-research run and watch it
    Research {
        #[arg(long)]
        feature: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        persona: Option<String>,
        /// Comma-separated competitor names
        #[arg(long)]
        competitors: Option<String>,
        #[arg(long)]
        time_window_days: Option<u32>,
    },
    /// Start a decision-operator run and watch it
    Decide {
        #[arg(long)]
        feature_name: String,
    },
    /// List decision-operator runs
    Runs,
    /// Check decision-operator health
    Health,
    /// Show the effective client config and the remote agent config
    Config,
    /// Show saved run records, newest first
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

pub async fn run(args: Cli) -> Result<()> {
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let cfg = build_config(&args);
    match args.command.clone() {
        Command::Research {
            feature,
            category,
            persona,
            competitors,
            time_window_days,
        } => {
            let request = ResearchRequest::from_input(
                &feature,
                &category,
                persona.as_deref(),
                competitors.as_deref(),
                time_window_days,
            );
            let api = AgentApi::new(&cfg)?;
            let mut notices = Vec::new();
            match api.fetch_config().await {
                Ok(AgentConfig { demo_mode: true }) => notices.push(InfoEvent::DemoMode),
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "agent config unavailable"),
            }
            run_watch(&args, &cfg, api, request, notices).await
        }
        Command::Decide { feature_name } => {
            let api = OperatorApi::new(&cfg)?;
            run_watch(&args, &cfg, api, DecisionRequest::new(&feature_name), Vec::new()).await
        }
        Command::Runs => {
            let runs = OperatorApi::new(&cfg)?
                .list_runs()
                .await
                .context("failed to load decision runs")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else if !args.silent {
                for line in run_list_lines(&runs) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        Command::Health => {
            let status = OperatorApi::new(&cfg)?.health().await;
            if args.json {
                println!("{}", serde_json::json!({ "status": status }));
            } else if !args.silent {
                println!("Decision operator: {status}");
            }
            Ok(())
        }
        Command::Config => {
            let agent = match AgentApi::new(&cfg)?.fetch_config().await {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!(error = %e, "agent config unavailable");
                    None
                }
            };
            if args.json {
                let out = serde_json::json!({ "client": cfg, "agent": agent });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if !args.silent {
                println!("Base URL: {}", cfg.base_url);
                println!(
                    "Poll interval: {}",
                    humantime::format_duration(cfg.poll_interval)
                );
                println!(
                    "Request timeout: {}",
                    humantime::format_duration(cfg.request_timeout)
                );
                println!("Stall warning: {}", humantime::format_duration(cfg.stall_after));
                match agent {
                    Some(a) => println!("Agent demo mode: {}", a.demo_mode),
                    None => println!("Agent demo mode: unknown (agent unreachable)"),
                }
            }
            Ok(())
        }
        Command::History { limit } => {
            let records = crate::storage::load_recent(limit)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if !args.silent {
                for line in history_lines(&records) {
                    println!("{line}");
                }
            }
            Ok(())
        }
    }
}

fn parse_nonzero_duration(s: &str) -> Result<humantime::Duration, String> {
    let d: humantime::Duration = s.parse().map_err(|e: humantime::DurationError| e.to_string())?;
    if d.is_zero() {
        return Err("must be greater than zero".to_string());
    }
    Ok(d)
}

/// Build a `TrackerConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> TrackerConfig {
    TrackerConfig {
        base_url: args.base_url.clone(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: Duration::from(args.request_timeout),
        stall_after: Duration::from(args.stall_after),
        user_agent: format!("runwatch/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Submit a run, follow it to the end, then save, export and print the outcome.
async fn run_watch<A: RunApi>(
    args: &Cli,
    cfg: &TrackerConfig,
    api: A,
    request: A::Request,
    notices: Vec<InfoEvent>,
) -> Result<()> {
    let kind = request.kind();
    let request_json = serde_json::to_value(&request)?;

    let (tracker_tx, tracker_rx) = mpsc::unbounded_channel::<TrackerEvent>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TrackerEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let tracker = RunTracker::with_events(api, cfg.poll_interval, tracker_tx);

    // Ctrl-C stops tracking; the remote run keeps going.
    let signal_task = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok()?;
            let interrupted = Interrupted {
                snapshot: tracker.snapshot(),
                submitting: tracker.is_submitting(),
            };
            let _ = cmd_tx.send(UiCommand::Cancel);
            Some(interrupted)
        })
    };

    for notice in notices {
        let _ = event_tx.send(TrackerEvent::Info(notice));
    }

    let stall_after = cfg.stall_after;
    let controller = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            watch_run(&tracker, request, tracker_rx, event_tx, cmd_rx, stall_after).await
        })
    };

    let (out_tx, out_handle) = spawn_output_writer();
    let show_progress = (args.text || !args.json) && !args.silent;
    let mut progress = ProgressPrinter::default();
    while let Some(ev) = event_rx.recv().await {
        if let Some(line) = progress.line(&ev) {
            if show_progress {
                let _ = out_tx.send(OutputLine::Stderr(line));
            }
        }
    }

    let outcome = controller.await.context("watch task failed")?;
    if !matches!(outcome, Ok(None)) {
        signal_task.abort();
    }
    let finished = match outcome? {
        Some(finished) => finished,
        None => {
            let interrupted = signal_task.await.ok().flatten();
            if !args.silent {
                for line in interrupted_lines(interrupted.as_ref()) {
                    let _ = out_tx.send(OutputLine::Stderr(line));
                }
            }
            drop(out_tx);
            let _ = out_handle.await;
            return Ok(());
        }
    };

    let history_dir = if args.auto_save {
        crate::storage::history_dir()
            .map_err(|e| tracing::warn!(error = %e, "history directory unavailable"))
            .ok()
    } else {
        None
    };
    let processed = process_run_completion(
        kind,
        &cfg.base_url,
        request_json,
        finished,
        PostProcessOptions {
            history_dir: history_dir.as_deref(),
            export_json: args.export_json.as_deref(),
        },
    );

    if !args.silent {
        if args.json {
            let out = serde_json::to_string_pretty(&processed.record)?;
            let _ = out_tx.send(OutputLine::Stdout(out));
        } else {
            for line in crate::text_summary::build_text_summary(&processed.record).lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
        for msg in processed.export_messages.iter() {
            let _ = out_tx.send(OutputLine::Stderr(msg.clone()));
        }
        if let Some(p) = processed.auto_saved_path.as_ref() {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    let run = processed.record.run;
    if run.status == RunStatus::Failed {
        return Err(TrackerError::RemoteJobFailed {
            message: run
                .error
                .unwrap_or_else(|| "remote run reported failure".to_string()),
            run_id: run.run_id,
        }
        .into());
    }
    Ok(())
}

/// What the tracker held when the user interrupted the watch.
struct Interrupted {
    snapshot: TrackerSnapshot,
    submitting: bool,
}

fn interrupted_lines(interrupted: Option<&Interrupted>) -> Vec<String> {
    let Some(Interrupted {
        snapshot,
        submitting,
    }) = interrupted
    else {
        return vec!["Stopped watching.".to_string()];
    };
    let Some(run) = snapshot.run.as_ref() else {
        let line = if *submitting {
            "Stopped before the run was accepted; the server may still start it."
        } else {
            "Stopped watching."
        };
        return vec![line.to_string()];
    };

    let mut lines = vec![match run.step.as_deref() {
        Some(step) => format!(
            "Stopped watching run {} (last status: {} at {})",
            run.run_id, run.status, step
        ),
        None => format!(
            "Stopped watching run {} (last status: {})",
            run.run_id, run.status
        ),
    }];
    if !snapshot.artifacts.is_empty() {
        let kinds: Vec<&str> = snapshot.artifacts.kinds().collect();
        lines.push(format!("Artifacts so far: {}", kinds.join(", ")));
    }
    if snapshot.polling && !run.status.is_terminal() {
        lines.push("The remote run keeps going.".to_string());
    }
    lines
}

/// Renders tracker events for the submitted run as progress lines, skipping repeats.
#[derive(Default)]
struct ProgressPrinter {
    run_id: Option<String>,
    last_status: Option<(RunStatus, Option<String>)>,
    last_kinds: Vec<String>,
}

impl ProgressPrinter {
    fn is_current(&self, run_id: &str) -> bool {
        self.run_id.as_deref() == Some(run_id)
    }

    fn line(&mut self, ev: &TrackerEvent) -> Option<String> {
        match ev {
            TrackerEvent::Submitted { handle } => {
                self.run_id = Some(handle.run_id.clone());
                Some(format!("Submitted run {}", handle.run_id))
            }
            TrackerEvent::StatusUpdated { handle } => {
                let seen = (handle.status, handle.step.clone());
                if self.last_status.as_ref() == Some(&seen) {
                    return None;
                }
                self.last_status = Some(seen);
                Some(match handle.step.as_deref() {
                    Some(step) => format!("Status: {} ({})", handle.status, step),
                    None => format!("Status: {}", handle.status),
                })
            }
            TrackerEvent::ArtifactsUpdated { run_id, kinds } => {
                if !self.is_current(run_id) || *kinds == self.last_kinds || kinds.is_empty() {
                    return None;
                }
                self.last_kinds = kinds.clone();
                Some(format!("Artifacts: {}", kinds.join(", ")))
            }
            TrackerEvent::PollFailed { run_id, message } => self
                .is_current(run_id)
                .then(|| format!("{message}; retrying")),
            TrackerEvent::Finished { .. } => None,
            TrackerEvent::Cancelled { run_id } => Some(format!("Cancelled tracking of run {run_id}")),
            TrackerEvent::Info(info) => Some(info.to_message()),
        }
    }
}

fn run_list_lines(runs: &[DecisionRunSummary]) -> Vec<String> {
    if runs.is_empty() {
        return vec!["No decision runs yet.".to_string()];
    }
    runs.iter()
        .map(|run| {
            let step = run.current_step.as_deref().unwrap_or("-");
            let created = run.created_at.as_deref().unwrap_or("-");
            format!(
                "{}  {:<18} {:<20} {}  {}",
                run.id, run.status, step, created, run.feature_name
            )
        })
        .collect()
}

fn history_lines(records: &[RunRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["No saved runs.".to_string()];
    }
    records
        .iter()
        .map(|r| {
            format!(
                "{}  {:?}  {}  {}  {} artifacts",
                r.timestamp_utc,
                r.kind,
                r.run.run_id,
                r.run.status,
                r.artifacts.len()
            )
        })
        .collect()
}
