//! Pull identifiers out of free-text `flink` CLI output.

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

/// `JobID ` followed by exactly 32 lowercase hex characters.
#[allow(clippy::expect_used)]
static JOB_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"JobID ([a-f0-9]{32})(?:[^a-f0-9]|$)").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static SAVEPOINT_PATH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Path: file:(\S+)").expect("constant regex pattern is valid"));

/// First job identifier announced in submission output.
pub(crate) fn extract_job_id(text: &str) -> Option<String> {
    JOB_ID_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// First `file:` savepoint location reported by `flink savepoint`.
pub(crate) fn extract_savepoint_path(text: &str) -> Option<PathBuf> {
    SAVEPOINT_PATH_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| PathBuf::from(m.as_str()))
}
