use crate::engine::StatusSource;
use crate::model::JobStatus;
use anyhow::{Context, Result};
use std::time::Duration;

/// Client for the JobManager `GET /jobs/<id>` endpoint.
pub(crate) struct StatusPoller {
    http: reqwest::Client,
    target: String,
}

impl StatusPoller {
    /// `target` is the `host:port` of the JobManager REST endpoint.
    pub fn new(target: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("flink-savepoint-swap/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            http,
            target: target.to_string(),
        })
    }

    pub fn job_url(&self, job_id: &str) -> String {
        format!("http://{}/jobs/{}", self.target, job_id)
    }

    async fn fetch_state(&self, job_id: &str) -> Result<JobStatus> {
        let url = self.job_url(job_id);
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let state = body
            .get("state")
            .and_then(|v| v.as_str())
            .context("response has no `state` field")?;
        Ok(JobStatus::from(state))
    }
}

impl StatusSource for StatusPoller {
    async fn check_status(&self, job_id: &str) -> JobStatus {
        match self.fetch_state(job_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(job_id, error = %format!("{e:#}"), "status check failed");
                JobStatus::Unknown
            }
        }
    }
}
