//! Leaf services the lifecycle drives: processes, the status endpoint,
//! output parsing and savepoint file handling.
//!
//! None of these keep state between calls.

pub(crate) mod locator;
pub(crate) mod mutation;
pub(crate) mod parser;
pub(crate) mod process;
pub(crate) mod status;
#[cfg(test)]
pub(crate) mod testing;

use crate::error::LifecycleError;
use crate::model::{CommandResult, CommandSpec, JobStatus, OutputMode};

/// Runs external commands to completion.
pub(crate) trait CommandRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        mode: OutputMode,
    ) -> Result<CommandResult, LifecycleError>;
}

/// Reports the current state of a submitted job.
///
/// Implementations never fail; anything that prevents reading a state maps
/// to [`JobStatus::Unknown`].
pub(crate) trait StatusSource {
    async fn check_status(&self, job_id: &str) -> JobStatus;
}

pub(crate) use process::ProcessRunner;
pub(crate) use status::StatusPoller;
