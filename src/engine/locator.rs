use crate::error::LifecycleError;
use crate::model::METADATA_FILE_NAME;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Pick the file the mutation tool should rewrite: the largest regular file
/// in the savepoint directory other than `_metadata`.
///
/// This assumes the keyed state backend writes its data as the single
/// biggest artifact, which holds for Flink native RocksDB savepoints but is
/// not a property of checkpoint formats in general. Equal sizes are broken by
/// the lexicographically smallest file name so the choice does not depend on
/// directory listing order. Entries whose metadata cannot be read are skipped.
pub(crate) fn locate_state_file(dir: &Path) -> Result<PathBuf, LifecycleError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| LifecycleError::io(format!("reading savepoint {}", dir.display()), e))?;

    let mut best: Option<(u64, OsString, PathBuf)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name == METADATA_FILE_NAME {
            continue;
        }
        let path = entry.path();
        let size = match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => m.len(),
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let better = match &best {
            None => true,
            Some((best_size, best_name, _)) => {
                size > *best_size || (size == *best_size && name < *best_name)
            }
        };
        if better {
            best = Some((size, name, path));
        }
    }

    best.map(|(_, _, path)| path)
        .ok_or_else(|| LifecycleError::NoStateFileFound(dir.to_path_buf()))
}
