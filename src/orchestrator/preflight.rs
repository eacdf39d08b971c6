//! Filesystem preconditions, checked before anything is started.

use crate::error::LifecycleError;
use crate::model::RunConfig;
use std::path::Path;

/// Fail on the first required file that is missing.
pub(crate) fn check_preconditions(cfg: &RunConfig) -> Result<(), LifecycleError> {
    let required = [
        ("Python executable", cfg.python_exec.clone()),
        ("job script", cfg.job_script()),
        ("mutation tool", cfg.mutation_tool()),
        ("start-cluster.sh", cfg.start_cluster_script()),
        ("flink CLI", cfg.flink_cli()),
    ];
    for (what, path) in required {
        require(what, &path)?;
    }
    Ok(())
}

fn require(what: &'static str, path: &Path) -> Result<(), LifecycleError> {
    if path.exists() {
        Ok(())
    } else {
        Err(LifecycleError::Precondition {
            what,
            path: path.to_path_buf(),
        })
    }
}
