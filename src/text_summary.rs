//! Text summary builder for CLI output.
//!
//! Formats the finished job run as human-readable lines for text mode.

use crate::model::JobRun;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a completed run.
pub(crate) fn build_text_summary(job: &JobRun) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Phase:      {}", job.phase));
    lines.push(format!(
        "Job ID:     {}",
        job.job_id.as_deref().unwrap_or("-")
    ));
    lines.push(format!("Status:     {}", job.status));
    if let Some(p) = job.savepoint_path.as_deref() {
        lines.push(format!("Savepoint:  {}", p.display()));
    }
    if let Some(p) = job.state_file_path.as_deref() {
        lines.push(format!("State file: {}", p.display()));
    }
    lines.push(format!("Started:    {}", job.started_at));
    if let Some(finished) = job.finished_at.as_deref() {
        lines.push(format!("Finished:   {finished}"));
    }
    if let Some(p) = job.log_dir.as_deref() {
        lines.push(format!("Logs:       {}", p.display()));
    }

    TextSummary { lines }
}
