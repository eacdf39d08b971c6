//! In-memory stand-ins for the process runner and status endpoint.

use crate::engine::{CommandRunner, StatusSource};
use crate::error::LifecycleError;
use crate::model::{CommandResult, CommandSpec, JobStatus, OutputMode};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Returns queued statuses in order, then `fallback` forever.
pub(crate) struct ScriptedStatus {
    queue: Mutex<VecDeque<JobStatus>>,
    fallback: JobStatus,
    calls: AtomicUsize,
}

impl ScriptedStatus {
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(
                statuses
                    .into_iter()
                    .map(|s| JobStatus::from(s.into()))
                    .collect(),
            ),
            fallback: JobStatus::Unknown,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn repeating(status: &str) -> Self {
        Self {
            fallback: JobStatus::from(status),
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StatusSource for ScriptedStatus {
    async fn check_status(&self, _job_id: &str) -> JobStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

type Responder = Box<dyn Fn(&CommandSpec) -> CommandResult + Send + Sync>;

/// Records every command and answers with `respond`, honouring `strict`.
pub(crate) struct ScriptedRunner {
    respond: Responder,
    calls: Mutex<Vec<(CommandSpec, OutputMode)>>,
}

impl ScriptedRunner {
    pub fn new(respond: impl Fn(&CommandSpec) -> CommandResult + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(CommandSpec, OutputMode)> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines in the order they ran.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|(c, _)| c.display()).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        mode: OutputMode,
    ) -> Result<CommandResult, LifecycleError> {
        self.calls.lock().unwrap().push((cmd.clone(), mode));
        let result = (self.respond)(cmd);
        if cmd.strict && !result.success() {
            return Err(LifecycleError::Process {
                command: cmd.display(),
                exit_code: result.exit_code,
                output: result.output,
            });
        }
        Ok(result)
    }
}

pub(crate) fn ok(output: impl Into<String>) -> CommandResult {
    CommandResult {
        exit_code: 0,
        output: output.into(),
    }
}

pub(crate) fn failed(exit_code: i32, output: impl Into<String>) -> CommandResult {
    CommandResult {
        exit_code,
        output: output.into(),
    }
}
