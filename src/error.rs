//! Error types for the savepoint lifecycle.

use crate::model::{JobStatus, Phase};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Everything that can stop the lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A required file was missing before any side effect ran.
    #[error("{what} not found: {}", path.display())]
    Precondition { what: &'static str, path: PathBuf },

    /// The command could not be started at all.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited non-zero.
    #[error("command `{command}` failed with exit code {exit_code}")]
    Process {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// `start-cluster.sh` exited non-zero.
    #[error("starting the Flink cluster failed with exit code {exit_code}")]
    ClusterStartFailed { exit_code: i32 },

    #[error("could not extract job ID from submission output")]
    MissingJobId,

    #[error("could not find savepoint path in savepoint output")]
    MissingSavepointPath { output: String },

    #[error("savepoint path does not exist: {}", .0.display())]
    SavepointNotFound(PathBuf),

    #[error("no state file found in savepoint {}", .0.display())]
    NoStateFileFound(PathBuf),

    #[error("job failed to reach RUNNING state within {}; current status: {last_status}", humantime::format_duration(*budget))]
    Timeout {
        budget: Duration,
        last_status: JobStatus,
    },

    /// The mutation tool failed and the state file was renamed back.
    #[error("mutation of {} failed: {source}", path.display())]
    MutationFailed {
        path: PathBuf,
        #[source]
        source: Box<LifecycleError>,
    },

    /// The revert rename failed; the state file is left under its staged name.
    #[error("could not restore {} from {}: {source}", original.display(), staged.display())]
    RollbackFailed {
        original: PathBuf,
        staged: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl LifecycleError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LifecycleError::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code the CLI should report for this error.
    ///
    /// A failing submit, savepoint or resume command passes its own code
    /// through; everything else, cluster start included, is a plain failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::Process { exit_code, .. } if *exit_code > 0 => *exit_code,
            _ => 1,
        }
    }

    /// Output captured from the external command involved, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            LifecycleError::Process { output, .. }
            | LifecycleError::MissingSavepointPath { output } => {
                Some(output.as_str()).filter(|o| !o.is_empty())
            }
            LifecycleError::MutationFailed { source, .. } => source.captured_output(),
            _ => None,
        }
    }

    /// True when the filesystem may have been left in an intermediate state.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, LifecycleError::RollbackFailed { .. })
    }
}

/// A lifecycle failure tagged with the phase the pipeline stopped in.
#[derive(Debug, Error)]
#[error("stopped in phase {phase}: {error}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub error: LifecycleError,
}

impl PhaseError {
    pub fn new(phase: Phase, error: LifecycleError) -> Self {
        Self { phase, error }
    }

    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}
