use crate::engine::{ProcessRunner, StatusPoller};
use crate::error::{LifecycleError, PhaseError};
use crate::model::{LifecycleEvent, RunConfig, Timings};
use crate::orchestrator::{check_preconditions, Lifecycle};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
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
    name = "flink-savepoint-swap",
    version,
    about = "Start a local Flink cluster, submit job.py, rewrite its savepoint state and resume it"
)]
pub struct Cli {
    /// Python interpreter inside the job's virtual environment (e.g. from uv venv)
    pub python_exec: PathBuf,

    /// Additional arguments forwarded to the Flink job (prefix with -- to stop parsing)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub job_args: Vec<String>,

    /// Flink installation root; `bin/flink` and `bin/start-cluster.sh` must exist under it
    #[arg(long, env = "FLINK_HOME", default_value = "/opt/flink")]
    pub flink_home: PathBuf,

    /// JobManager REST address (host:port)
    #[arg(long, env = "FLINK_JOBMANAGER_TARGET", default_value = "127.0.0.1:8081")]
    pub jobmanager: String,

    /// Directory holding job.py and swap_sst_last5 [default: directory of this executable]
    #[arg(long, env = "FLINK_SWAP_TOOL_DIR")]
    pub tool_dir: Option<PathBuf>,

    /// Command prefix used to run `flink run` inside the job's environment
    #[arg(long, default_value = "uv run --")]
    pub launcher: String,

    /// Run `flink run` directly instead of through the launcher
    #[arg(long)]
    pub no_launcher: bool,

    /// Wait after starting the cluster
    #[arg(long, default_value = "5s")]
    pub cluster_settle: humantime::Duration,

    /// Wait after submission before the first status check
    #[arg(long, default_value = "4s")]
    pub submit_settle: humantime::Duration,

    /// Interval between job status checks
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Total time allowed for the job to reach RUNNING
    #[arg(long, default_value = "30s")]
    pub poll_budget: humantime::Duration,

    /// Wait after RUNNING is observed so tasks can initialize
    #[arg(long, default_value = "10s")]
    pub running_grace: humantime::Duration,

    /// Timeout for each status request
    #[arg(long, default_value = "5s")]
    pub status_timeout: humantime::Duration,

    /// Print the final run as JSON
    #[arg(long)]
    pub json: bool,

    /// Suppress progress output; errors are still reported
    #[arg(long)]
    pub silent: bool,
}

/// Drop a leading `--` separator from forwarded job arguments.
pub fn normalize_job_args(job_args: &[String]) -> Vec<String> {
    match job_args.split_first() {
        Some((first, rest)) if first == "--" => rest.to_vec(),
        _ => job_args.to_vec(),
    }
}

/// Expand a leading `~/` and make the path absolute.
fn resolve_user_path(path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    };
    std::path::absolute(&expanded).unwrap_or(expanded)
}

fn default_tool_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the running executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("executable has no parent directory")
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<RunConfig> {
    let tool_dir = match args.tool_dir.as_deref() {
        Some(dir) => resolve_user_path(dir),
        None => default_tool_dir()?,
    };
    let launcher = if args.no_launcher {
        Vec::new()
    } else {
        args.launcher.split_whitespace().map(str::to_string).collect()
    };
    Ok(RunConfig {
        flink_home: resolve_user_path(&args.flink_home),
        jobmanager_target: args.jobmanager.clone(),
        tool_dir,
        python_exec: resolve_user_path(&args.python_exec),
        job_args: normalize_job_args(&args.job_args),
        launcher,
        timings: Timings {
            cluster_settle: Duration::from(args.cluster_settle),
            submit_settle: Duration::from(args.submit_settle),
            poll_interval: Duration::from(args.poll_interval),
            poll_budget: Duration::from(args.poll_budget),
            running_grace: Duration::from(args.running_grace),
            status_timeout: Duration::from(args.status_timeout),
        },
    })
}

/// Exit code for an error returned by [`run`].
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<PhaseError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<LifecycleError>() {
        return e.exit_code();
    }
    1
}

fn render_event(ev: &LifecycleEvent) -> Vec<OutputLine> {
    match ev {
        LifecycleEvent::PhaseStarted { phase } => {
            vec![OutputLine::Stderr(phase.description().to_string())]
        }
        LifecycleEvent::StatusSample { status, waited } => vec![OutputLine::Stderr(format!(
            "Job status: {status} (waited {}s)",
            waited.as_secs()
        ))],
        LifecycleEvent::CommandOutput(output) => output
            .lines()
            .map(|l| OutputLine::Stderr(l.to_string()))
            .collect(),
        LifecycleEvent::Info(info) => vec![OutputLine::Stderr(info.to_message())],
    }
}

/// Run the lifecycle and report its outcome.
///
/// Progress lines go through the event channel to the writer task, while
/// commands run with inherited stdio (cluster start, mutation tool) write to
/// the terminal directly. The two are not synchronized, so a phase line may
/// show up after the first lines of that phase's command output.
pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    check_preconditions(&cfg)?;

    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<LifecycleEvent>();

    let silent = args.silent;
    let render_tx = out_tx.clone();
    let render = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            // Events are drained even when silent so the sender never backs up.
            if silent {
                continue;
            }
            for line in render_event(&ev) {
                let _ = render_tx.send(line);
            }
        }
    });

    let runner = ProcessRunner;
    let poller = StatusPoller::new(&cfg.jobmanager_target, cfg.timings.status_timeout)?;
    let outcome = Lifecycle::new(&cfg, &runner, &poller).run(&evt_tx).await;

    drop(evt_tx);
    let _ = render.await;

    let res = match outcome {
        Ok(job) => {
            if args.json {
                let out = serde_json::to_string_pretty(&job)?;
                let _ = out_tx.send(OutputLine::Stdout(out));
            } else if !silent {
                let summary = crate::text_summary::build_text_summary(&job);
                for line in summary.lines {
                    let _ = out_tx.send(OutputLine::Stdout(line));
                }
            }
            Ok(())
        }
        Err(e) => {
            if let Some(output) = e.error.captured_output() {
                let _ = out_tx.send(OutputLine::Stderr(output.trim_end().to_string()));
            }
            if e.error.is_unrecoverable() {
                let _ = out_tx.send(OutputLine::Stderr(
                    "Savepoint left with a staged state file; rename it back before resuming from it."
                        .to_string(),
                ));
            }
            Err(e.into())
        }
    };

    drop(out_tx);
    let _ = out_handle.await;
    res
}
