//! Reversible in-place mutation of a savepoint state file.
//!
//! The mutation tool only accepts `.sst` files, so the state file is renamed
//! to `<name>.sst` for the duration of the tool run and renamed back after.

use crate::engine::CommandRunner;
use crate::error::LifecycleError;
use crate::model::{CommandSpec, OutputMode, STAGED_SUFFIX};
use std::path::{Path, PathBuf};

/// A state file temporarily renamed to its staged name.
///
/// Dropping the guard without calling [`StagedStateFile::restore`] still
/// attempts the revert rename.
#[derive(Debug)]
pub(crate) struct StagedStateFile {
    original: PathBuf,
    staged: PathBuf,
    restored: bool,
}

impl StagedStateFile {
    pub fn stage(original: &Path) -> Result<Self, LifecycleError> {
        let staged = staged_name(original);
        // Never replace a file already sitting under the staged name.
        if std::fs::symlink_metadata(&staged).is_ok() {
            return Err(LifecycleError::io(
                format!("staging {}", original.display()),
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("{} already exists", staged.display()),
                ),
            ));
        }
        std::fs::rename(original, &staged).map_err(|e| {
            LifecycleError::io(
                format!(
                    "renaming {} to {}",
                    original.display(),
                    staged.display()
                ),
                e,
            )
        })?;
        tracing::debug!(from = %original.display(), to = %staged.display(), "staged state file");
        Ok(Self {
            original: original.to_path_buf(),
            staged,
            restored: false,
        })
    }

    pub fn staged_path(&self) -> &Path {
        &self.staged
    }

    /// Rename the file back to its original name.
    pub fn restore(mut self) -> Result<PathBuf, LifecycleError> {
        self.restored = true;
        match std::fs::rename(&self.staged, &self.original) {
            Ok(()) => Ok(self.original.clone()),
            Err(source) => Err(LifecycleError::RollbackFailed {
                original: self.original.clone(),
                staged: self.staged.clone(),
                source,
            }),
        }
    }
}

impl Drop for StagedStateFile {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        tracing::warn!(path = %self.original.display(), "reverting staged state file");
        if let Err(e) = std::fs::rename(&self.staged, &self.original) {
            tracing::error!(
                staged = %self.staged.display(),
                error = %e,
                "state file left under staged name"
            );
        }
    }
}

/// `<dir>/<name>` → `<dir>/<name>.sst`
pub(crate) fn staged_name(original: &Path) -> PathBuf {
    let mut name = original.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(STAGED_SUFFIX);
    original.with_file_name(name)
}

/// Stage `target`, run `tool <staged>` and put the file back under its
/// original name whatever the tool did.
///
/// A tool failure is reported as [`LifecycleError::MutationFailed`] once the
/// file is restored; if restoring fails the result is
/// [`LifecycleError::RollbackFailed`] and the staged name stays on disk.
pub(crate) async fn mutate_state_file<R: CommandRunner>(
    runner: &R,
    tool: &Path,
    target: &Path,
    cwd: &Path,
) -> Result<PathBuf, LifecycleError> {
    let staged = StagedStateFile::stage(target)?;
    let cmd = CommandSpec::new(tool, cwd)
        .arg(staged.staged_path().display().to_string())
        .strict();

    match runner.run(&cmd, OutputMode::Inherit).await {
        Ok(_) => staged.restore(),
        Err(tool_err) => {
            tracing::warn!(error = %tool_err, "mutation tool failed, restoring state file name");
            staged.restore()?;
            Err(LifecycleError::MutationFailed {
                path: target.to_path_buf(),
                source: Box::new(tool_err),
            })
        }
    }
}
