//! The savepoint lifecycle state machine.
//!
//! Drives one job through cluster start, submission, the wait for RUNNING,
//! savepoint, state mutation and resume. Every step blocks until its external
//! call finishes; the first failure stops the pipeline.

use crate::engine::{locator, mutation, parser, CommandRunner, StatusSource};
use crate::error::{LifecycleError, PhaseError};
use crate::model::{
    now_rfc3339, CommandResult, CommandSpec, InfoEvent, JobRun, LifecycleEvent, OutputMode,
    Phase, RunConfig,
};
use crate::orchestrator::poll::{wait_for_running, PollParams};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

/// Tag an error with the phase it happened in.
fn at(phase: Phase) -> impl Fn(LifecycleError) -> PhaseError {
    move |error| PhaseError::new(phase, error)
}

pub(crate) struct Lifecycle<'a, R, S> {
    cfg: &'a RunConfig,
    runner: &'a R,
    status: &'a S,
}

impl<'a, R: CommandRunner, S: StatusSource> Lifecycle<'a, R, S> {
    pub fn new(cfg: &'a RunConfig, runner: &'a R, status: &'a S) -> Self {
        Self {
            cfg,
            runner,
            status,
        }
    }

    pub async fn run(
        self,
        event_tx: &UnboundedSender<LifecycleEvent>,
    ) -> Result<JobRun, PhaseError> {
        let cfg = self.cfg;
        let timings = cfg.timings;
        let mut job = JobRun::new();

        enter(&mut job, Phase::ClusterStarting, event_tx);
        let start = CommandSpec::new(cfg.start_cluster_script(), &cfg.tool_dir).strict();
        self.runner
            .run(&start, OutputMode::Inherit)
            .await
            .map_err(|e| match e {
                LifecycleError::Process { exit_code, .. } => {
                    LifecycleError::ClusterStartFailed { exit_code }
                }
                other => other,
            })
            .map_err(at(Phase::ClusterStarting))?;
        info(event_tx, "Waiting for cluster to be ready...");
        tokio::time::sleep(timings.cluster_settle).await;

        enter(&mut job, Phase::ClusterReady, event_tx);
        let submitted = self
            .run_captured(self.submit_command())
            .await
            .map_err(at(Phase::ClusterReady))?;
        echo(event_tx, &submitted);

        enter(&mut job, Phase::Submitted, event_tx);
        let job_id = parser::extract_job_id(&submitted.output)
            .ok_or(LifecycleError::MissingJobId)
            .map_err(at(Phase::Submitted))?;
        tracing::debug!(job_id = %job_id, "extracted job id");
        job.job_id = Some(job_id.clone());
        let _ = event_tx.send(LifecycleEvent::Info(InfoEvent::JobSubmitted {
            job_id: job_id.clone(),
        }));
        tokio::time::sleep(timings.submit_settle).await;

        job.status = wait_for_running(PollParams {
            source: self.status,
            job_id: &job_id,
            interval: timings.poll_interval,
            budget: timings.poll_budget,
            grace: timings.running_grace,
            event_tx,
        })
        .await
        .map_err(at(Phase::Submitted))?;

        enter(&mut job, Phase::Running, event_tx);
        let savepoint = self
            .create_savepoint(&job_id)
            .await
            .map_err(at(Phase::Running))?;
        let _ = event_tx.send(LifecycleEvent::Info(InfoEvent::SavepointCreated {
            path: savepoint.clone(),
        }));
        job.savepoint_path = Some(savepoint.clone());

        enter(&mut job, Phase::Checkpointed, event_tx);
        let target = locator::locate_state_file(&savepoint).map_err(at(Phase::Checkpointed))?;
        let _ = event_tx.send(LifecycleEvent::Info(InfoEvent::StateFileFound {
            path: target.clone(),
        }));
        job.state_file_path = Some(target.clone());
        mutation::mutate_state_file(self.runner, &cfg.mutation_tool(), &target, &cfg.tool_dir)
            .await
            .map_err(at(Phase::Checkpointed))?;

        enter(&mut job, Phase::StateMutated, event_tx);
        let resumed = self
            .run_captured(self.resume_command(&savepoint))
            .await
            .map_err(at(Phase::StateMutated))?;
        echo(event_tx, &resumed);

        enter(&mut job, Phase::Resumed, event_tx);
        job.finished_at = Some(now_rfc3339());
        job.log_dir = Some(cfg.log_dir());
        let _ = event_tx.send(LifecycleEvent::Info(InfoEvent::LogsLocation {
            path: cfg.log_dir(),
        }));
        info(
            event_tx,
            "To view logs: docker run -v $(pwd)/logs:/opt/flink/log flink-wal-test",
        );

        Ok(job)
    }

    /// Run a captured command and turn a non-zero exit into a process error.
    async fn run_captured(&self, cmd: CommandSpec) -> Result<CommandResult, LifecycleError> {
        let result = self.runner.run(&cmd, OutputMode::Capture).await?;
        if !result.success() {
            return Err(LifecycleError::Process {
                command: cmd.display(),
                exit_code: result.exit_code,
                output: result.output,
            });
        }
        Ok(result)
    }

    /// `<launcher> flink run -m <target> -d -py job.py -pyexec <python> <args>`
    fn submit_command(&self) -> CommandSpec {
        let cfg = self.cfg;
        CommandSpec::launched(&cfg.launcher, cfg.flink_cli(), &cfg.tool_dir)
            .args(["run", "-m", cfg.jobmanager_target.as_str(), "-d"])
            .args(self.job_args())
    }

    /// `<launcher> flink run -s <savepoint> -py job.py -pyexec <python> <args>`
    fn resume_command(&self, savepoint: &std::path::Path) -> CommandSpec {
        let cfg = self.cfg;
        CommandSpec::launched(&cfg.launcher, cfg.flink_cli(), &cfg.tool_dir)
            .args(["run".to_string(), "-s".to_string(), savepoint.display().to_string()])
            .args(self.job_args())
    }

    fn job_args(&self) -> Vec<String> {
        let cfg = self.cfg;
        let mut args = vec![
            "-py".to_string(),
            cfg.job_script().display().to_string(),
            "-pyexec".to_string(),
            cfg.python_exec.display().to_string(),
        ];
        args.extend(cfg.job_args.iter().cloned());
        args
    }

    /// Trigger a native savepoint and return its directory.
    async fn create_savepoint(&self, job_id: &str) -> Result<PathBuf, LifecycleError> {
        let cfg = self.cfg;
        let cmd = CommandSpec::new(cfg.flink_cli(), &cfg.tool_dir).args([
            "savepoint",
            job_id,
            "--type",
            "native",
        ]);
        let result = self.run_captured(cmd).await?;
        let path = parser::extract_savepoint_path(&result.output).ok_or_else(|| {
            LifecycleError::MissingSavepointPath {
                output: result.output.clone(),
            }
        })?;
        if !path.exists() {
            return Err(LifecycleError::SavepointNotFound(path));
        }
        Ok(path)
    }
}

fn enter(job: &mut JobRun, phase: Phase, event_tx: &UnboundedSender<LifecycleEvent>) {
    tracing::debug!(phase = %phase, "entering phase");
    job.phase = phase;
    let _ = event_tx.send(LifecycleEvent::PhaseStarted { phase });
}

fn info(event_tx: &UnboundedSender<LifecycleEvent>, msg: &str) {
    let _ = event_tx.send(LifecycleEvent::Info(InfoEvent::Message(msg.to_string())));
}

fn echo(event_tx: &UnboundedSender<LifecycleEvent>, result: &CommandResult) {
    if !result.output.is_empty() {
        let _ = event_tx.send(LifecycleEvent::CommandOutput(result.output.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{failed, ok, ScriptedRunner, ScriptedStatus};
    use crate::model::{JobStatus, Timings};
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const JOB_ID: &str = "0123456789abcdef0123456789abcdef";

    struct Fixture {
        _root: tempfile::TempDir,
        cfg: RunConfig,
        savepoint: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let savepoint = root.path().join("savepoints/savepoint-012345-abcdef");
        std::fs::create_dir_all(&savepoint).unwrap();
        std::fs::write(savepoint.join("_metadata"), vec![0u8; 10]).unwrap();
        std::fs::write(savepoint.join("chk-0"), vec![0u8; 500]).unwrap();
        std::fs::write(savepoint.join("chk-1"), vec![0u8; 1200]).unwrap();
        let cfg = RunConfig {
            flink_home: root.path().join("flink"),
            jobmanager_target: "127.0.0.1:8081".into(),
            tool_dir: root.path().join("tool"),
            python_exec: root.path().join("venv/bin/python"),
            job_args: vec!["--rows".into(), "20".into()],
            launcher: vec!["uv".into(), "run".into(), "--".into()],
            timings: Timings::default(),
        };
        Fixture {
            _root: root,
            cfg,
            savepoint,
        }
    }

    /// A cluster where every command succeeds.
    fn happy_runner(savepoint: &Path) -> ScriptedRunner {
        let savepoint = savepoint.to_path_buf();
        ScriptedRunner::new(move |cmd| {
            let line = cmd.display();
            if line.contains(" run -m ") {
                ok(format!("Job has been submitted with JobID {JOB_ID}\n"))
            } else if line.contains(" savepoint ") {
                ok(format!(
                    "Triggering savepoint for job {JOB_ID}.\nSavepoint completed. Path: file:{}\n",
                    savepoint.display()
                ))
            } else if line.contains(" run -s ") {
                ok("Job has been submitted with JobID ffffffffffffffffffffffffffffffff\n")
            } else if line.ends_with(".sst") {
                // The tool must see the staged name, not the original.
                assert!(Path::new(cmd.args[0].as_str()).exists());
                ok("")
            } else {
                ok("")
            }
        })
    }

    fn phases(rx: &mut mpsc::UnboundedReceiver<LifecycleEvent>) -> Vec<Phase> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let LifecycleEvent::PhaseStarted { phase } = ev {
                out.push(phase);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn completes_all_phases_against_succeeding_cluster() {
        let fx = fixture();
        let runner = happy_runner(&fx.savepoint);
        let status = ScriptedStatus::new(["UNKNOWN", "UNKNOWN", "RUNNING"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();

        let job = Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap();

        assert_eq!(job.phase, Phase::Resumed);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.job_id.as_deref(), Some(JOB_ID));
        assert_eq!(job.savepoint_path.as_deref(), Some(fx.savepoint.as_path()));
        assert_eq!(
            job.state_file_path.as_deref(),
            Some(fx.savepoint.join("chk-1").as_path())
        );
        assert_eq!(job.log_dir, Some(fx.cfg.log_dir()));
        assert!(job.finished_at.is_some());

        assert!(fx.savepoint.join("chk-1").exists());
        assert!(!fx.savepoint.join("chk-1.sst").exists());
        assert_eq!(status.calls(), 3);
        // 5s cluster settle + 4s submit settle + 4s polling + 10s grace.
        assert_eq!(start.elapsed(), Duration::from_secs(23));
        assert_eq!(
            phases(&mut rx),
            vec![
                Phase::ClusterStarting,
                Phase::ClusterReady,
                Phase::Submitted,
                Phase::Running,
                Phase::Checkpointed,
                Phase::StateMutated,
                Phase::Resumed,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn issues_commands_in_order_with_expected_arguments() {
        let fx = fixture();
        let runner = happy_runner(&fx.savepoint);
        let status = ScriptedStatus::new(["RUNNING"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap();

        let cfg = &fx.cfg;
        let flink = cfg.flink_cli().display().to_string();
        let job_py = cfg.job_script().display().to_string();
        let python = cfg.python_exec.display().to_string();
        let staged = fx.savepoint.join("chk-1.sst").display().to_string();
        assert_eq!(
            runner.command_lines(),
            vec![
                cfg.start_cluster_script().display().to_string(),
                format!("uv run -- {flink} run -m 127.0.0.1:8081 -d -py {job_py} -pyexec {python} --rows 20"),
                format!("{flink} savepoint {JOB_ID} --type native"),
                format!("{} {staged}", cfg.mutation_tool().display()),
                format!(
                    "uv run -- {flink} run -s {} -py {job_py} -pyexec {python} --rows 20",
                    fx.savepoint.display()
                ),
            ]
        );
        let modes: Vec<OutputMode> = runner.calls().into_iter().map(|(_, m)| m).collect();
        assert_eq!(
            modes,
            vec![
                OutputMode::Inherit,
                OutputMode::Capture,
                OutputMode::Capture,
                OutputMode::Inherit,
                OutputMode::Capture,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cluster_start_failure_stops_before_submission() {
        let fx = fixture();
        let runner = ScriptedRunner::new(|cmd| {
            if cmd.program.ends_with("start-cluster.sh") {
                failed(7, "")
            } else {
                ok("")
            }
        });
        let status = ScriptedStatus::new(["RUNNING"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::ClusterStarting);
        assert!(matches!(
            err.error,
            LifecycleError::ClusterStartFailed { exit_code: 7 }
        ));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(status.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_failure_propagates_child_exit_code() {
        let fx = fixture();
        let runner = ScriptedRunner::new(|cmd| {
            if cmd.display().contains(" run -m ") {
                failed(2, "Could not connect to JobManager\n")
            } else {
                ok("")
            }
        });
        let status = ScriptedStatus::new(["RUNNING"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::ClusterReady);
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            err.error.captured_output(),
            Some("Could not connect to JobManager\n")
        );
        assert_eq!(status.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_job_id_is_fatal() {
        let fx = fixture();
        let runner = ScriptedRunner::new(|_| ok("Job submitted, no identifier here\n"));
        let status = ScriptedStatus::new(["RUNNING"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Submitted);
        assert!(matches!(err.error, LifecycleError::MissingJobId));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(status.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn never_running_times_out_without_savepoint() {
        let fx = fixture();
        let runner = happy_runner(&fx.savepoint);
        let status = ScriptedStatus::repeating("UNKNOWN");
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Submitted);
        assert!(matches!(
            err.error,
            LifecycleError::Timeout {
                last_status: JobStatus::Unknown,
                ..
            }
        ));
        assert!(!runner
            .command_lines()
            .iter()
            .any(|l| l.contains(" savepoint ")));
    }

    #[tokio::test(start_paused = true)]
    async fn savepoint_without_path_reports_full_output() {
        let fx = fixture();
        let runner = ScriptedRunner::new(|cmd| {
            let line = cmd.display();
            if line.contains(" run -m ") {
                ok(format!("JobID {JOB_ID}\n"))
            } else if line.contains(" savepoint ") {
                ok("Savepoint triggered but no location printed\n")
            } else {
                ok("")
            }
        });
        let status = ScriptedStatus::new(["RUNNING"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Running);
        assert_eq!(
            err.error.captured_output(),
            Some("Savepoint triggered but no location printed\n")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn savepoint_path_missing_on_disk_is_fatal() {
        let fx = fixture();
        let gone = fx.savepoint.with_file_name("savepoint-gone");
        let runner = ScriptedRunner::new(move |cmd| {
            let line = cmd.display();
            if line.contains(" run -m ") {
                ok(format!("JobID {JOB_ID}\n"))
            } else if line.contains(" savepoint ") {
                ok(format!("Path: file:{}\n", gone.display()))
            } else {
                ok("")
            }
        });
        let status = ScriptedStatus::new(["RUNNING"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Running);
        assert!(matches!(err.error, LifecycleError::SavepointNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_tool_failure_restores_file_and_skips_resume() {
        let fx = fixture();
        let savepoint = fx.savepoint.clone();
        let runner = ScriptedRunner::new(move |cmd| {
            let line = cmd.display();
            if line.contains(" run -m ") {
                ok(format!("JobID {JOB_ID}\n"))
            } else if line.contains(" savepoint ") {
                ok(format!("Path: file:{}\n", savepoint.display()))
            } else if line.ends_with(".sst") {
                failed(5, "")
            } else {
                ok("")
            }
        });
        let status = ScriptedStatus::new(["RUNNING"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Checkpointed);
        assert!(matches!(err.error, LifecycleError::MutationFailed { .. }));
        assert_eq!(err.exit_code(), 1);
        assert!(fx.savepoint.join("chk-1").exists());
        assert!(!fx.savepoint.join("chk-1.sst").exists());
        assert!(!runner.command_lines().iter().any(|l| l.contains(" run -s ")));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_failure_propagates_child_exit_code() {
        let fx = fixture();
        let savepoint = fx.savepoint.clone();
        let runner = ScriptedRunner::new(move |cmd| {
            let line = cmd.display();
            if line.contains(" run -m ") {
                ok(format!("JobID {JOB_ID}\n"))
            } else if line.contains(" savepoint ") {
                ok(format!("Path: file:{}\n", savepoint.display()))
            } else if line.contains(" run -s ") {
                failed(31, "Savepoint state could not be restored\n")
            } else {
                ok("")
            }
        });
        let status = ScriptedStatus::new(["RUNNING"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::StateMutated);
        assert_eq!(err.exit_code(), 31);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_launcher_runs_flink_directly() {
        let mut fx = fixture();
        fx.cfg.launcher.clear();
        let runner = happy_runner(&fx.savepoint);
        let status = ScriptedStatus::new(["RUNNING"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        Lifecycle::new(&fx.cfg, &runner, &status)
            .run(&tx)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls[1].0.program, fx.cfg.flink_cli());
        assert_eq!(calls[1].0.args[0], "run");
    }
}
