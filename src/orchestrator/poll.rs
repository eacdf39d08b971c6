use crate::engine::StatusSource;
use crate::error::LifecycleError;
use crate::model::{InfoEvent, JobStatus, LifecycleEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Parameters for the wait-for-RUNNING loop.
pub(crate) struct PollParams<'a, S> {
    pub source: &'a S,
    pub job_id: &'a str,
    pub interval: Duration,
    pub budget: Duration,
    /// Extra wait after the first RUNNING sample so tasks can deploy.
    pub grace: Duration,
    pub event_tx: &'a mpsc::UnboundedSender<LifecycleEvent>,
}

/// Sample the job status every `interval` until it reports RUNNING or
/// `budget` of wall-clock time has passed.
///
/// Only RUNNING ends the loop early. FAILED, CANCELED and the like are
/// treated the same as UNKNOWN and the loop keeps waiting until the budget
/// runs out, so a job that dies on startup is only reported after the full
/// budget.
pub(crate) async fn wait_for_running<S: StatusSource>(
    params: PollParams<'_, S>,
) -> Result<JobStatus, LifecycleError> {
    let PollParams {
        source,
        job_id,
        interval,
        budget,
        grace,
        event_tx,
    } = params;
    let start = Instant::now();
    let mut last = JobStatus::Unknown;

    while start.elapsed() < budget {
        last = source.check_status(job_id).await;
        let _ = event_tx.send(LifecycleEvent::StatusSample {
            status: last.clone(),
            waited: start.elapsed(),
        });

        if last.is_running() {
            let _ = event_tx.send(LifecycleEvent::Info(InfoEvent::RunningGrace { grace }));
            tokio::time::sleep(grace).await;
            return Ok(last);
        }

        tokio::time::sleep(interval).await;
    }

    Err(LifecycleError::Timeout {
        budget,
        last_status: last,
    })
}
