use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// File name Flink uses for the savepoint metadata; never a mutation target.
pub const METADATA_FILE_NAME: &str = "_metadata";

/// Suffix appended to the state file while the mutation tool runs on it.
pub const STAGED_SUFFIX: &str = "sst";

/// Name of the PyFlink job script expected next to this tool.
pub const JOB_SCRIPT_NAME: &str = "job.py";

/// Name of the external state mutation binary expected next to this tool.
pub const MUTATION_TOOL_NAME: &str = "swap_sst_last5";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub flink_home: PathBuf,
    pub jobmanager_target: String,
    pub tool_dir: PathBuf,
    pub python_exec: PathBuf,
    #[serde(default)]
    pub job_args: Vec<String>,
    /// Command prefix used to run the `flink` CLI for submissions (e.g. `uv run --`).
    #[serde(default)]
    pub launcher: Vec<String>,
    pub timings: Timings,
}

impl RunConfig {
    pub fn flink_bin_dir(&self) -> PathBuf {
        self.flink_home.join("bin")
    }

    pub fn flink_cli(&self) -> PathBuf {
        self.flink_bin_dir().join("flink")
    }

    pub fn start_cluster_script(&self) -> PathBuf {
        self.flink_bin_dir().join("start-cluster.sh")
    }

    pub fn job_script(&self) -> PathBuf {
        self.tool_dir.join(JOB_SCRIPT_NAME)
    }

    pub fn mutation_tool(&self) -> PathBuf {
        self.tool_dir.join(MUTATION_TOOL_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.flink_home.join("log")
    }
}

/// Fixed waits and budgets used by the lifecycle.
///
/// The settle delays stand in for readiness checks the cluster does not
/// expose cheaply; they may be too short on a loaded machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    #[serde(with = "humantime_serde")]
    pub cluster_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub submit_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_budget: Duration,
    #[serde(with = "humantime_serde")]
    pub running_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub status_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            cluster_settle: Duration::from_secs(5),
            submit_settle: Duration::from_secs(4),
            poll_interval: Duration::from_secs(2),
            poll_budget: Duration::from_secs(30),
            running_grace: Duration::from_secs(10),
            status_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle phases, in the only order the orchestrator moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    ClusterStarting,
    ClusterReady,
    Submitted,
    Running,
    Checkpointed,
    StateMutated,
    Resumed,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::ClusterStarting => "cluster-starting",
            Phase::ClusterReady => "cluster-ready",
            Phase::Submitted => "submitted",
            Phase::Running => "running",
            Phase::Checkpointed => "checkpointed",
            Phase::StateMutated => "state-mutated",
            Phase::Resumed => "resumed",
        }
    }

    /// What the orchestrator does while in this phase.
    pub fn description(self) -> &'static str {
        match self {
            Phase::ClusterStarting => "Starting Flink cluster...",
            Phase::ClusterReady => "Submitting job...",
            Phase::Submitted => "Checking job status and waiting for full initialization...",
            Phase::Running => "Creating savepoint...",
            Phase::Checkpointed => "Modifying savepoint state...",
            Phase::StateMutated => "Resuming job from modified savepoint...",
            Phase::Resumed => "Job resumed from modified savepoint",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Job state as reported by the JobManager REST endpoint.
///
/// Anything other than `RUNNING` is kept opaque; `Unknown` covers every
/// failure to obtain or read a state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    #[default]
    Unknown,
    Running,
    Other(String),
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, JobStatus::Running)
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Unknown => "UNKNOWN",
            JobStatus::Running => "RUNNING",
            JobStatus::Other(s) => s,
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "RUNNING" => JobStatus::Running,
            "UNKNOWN" | "" => JobStatus::Unknown,
            _ => JobStatus::Other(s),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        JobStatus::from(s.to_string())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external command to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Fail with a process error on non-zero exit instead of returning the result.
    pub strict: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            strict: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Build a command from a launcher prefix: the first launcher word becomes
    /// the program and `program` is passed as an argument after the rest.
    pub fn launched(launcher: &[String], program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        let program = program.into();
        match launcher.split_first() {
            Some((head, rest)) => CommandSpec::new(head, cwd)
                .args(rest.iter().cloned())
                .arg(program.display().to_string()),
            None => CommandSpec::new(program, cwd),
        }
    }

    /// Space-joined command line for messages.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for a in &self.args {
            line.push(' ');
            line.push_str(a);
        }
        line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Merge stdout and stderr into one captured buffer.
    Capture,
    /// Let the child write straight to the terminal.
    Inherit,
}

/// Outcome of one external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// `-1` when the child was terminated by a signal.
    pub exit_code: i32,
    pub output: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// State of the single job this invocation drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub phase: Phase,
    pub status: JobStatus,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub savepoint_path: Option<PathBuf>,
    #[serde(default)]
    pub state_file_path: Option<PathBuf>,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl JobRun {
    pub fn new() -> Self {
        Self {
            phase: Phase::ClusterStarting,
            status: JobStatus::Unknown,
            job_id: None,
            savepoint_path: None,
            state_file_path: None,
            started_at: now_rfc3339(),
            finished_at: None,
            log_dir: None,
        }
    }
}

impl Default for JobRun {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    PhaseStarted {
        phase: Phase,
    },
    StatusSample {
        status: JobStatus,
        waited: Duration,
    },
    /// Captured output of a command the user should see (submission, resume).
    CommandOutput(String),
    Info(InfoEvent),
}

/// Structured info events emitted by the orchestrator and rendered by the CLI.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    JobSubmitted { job_id: String },
    RunningGrace { grace: Duration },
    SavepointCreated { path: PathBuf },
    StateFileFound { path: PathBuf },
    LogsLocation { path: PathBuf },
}

impl InfoEvent {
    /// Render a human-readable message for the CLI.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::JobSubmitted { job_id } => format!("Job submitted with ID {job_id}"),
            InfoEvent::RunningGrace { grace } => format!(
                "Job is running, waiting additional {} for task initialization...",
                humantime::format_duration(*grace)
            ),
            InfoEvent::SavepointCreated { path } => {
                format!("Savepoint created at: {}", path.display())
            }
            InfoEvent::StateFileFound { path } => format!("Found state file: {}", path.display()),
            InfoEvent::LogsLocation { path } => format!("Flink logs location: {}", path.display()),
        }
    }
}
