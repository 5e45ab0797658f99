use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

use crate::config::SelectionPolicy;
use crate::error::{LedgerError, LedgerResult};

/// Picks the input file(s) for a run from the raw directory.
///
/// Hidden files (leading `.`) are never candidates, which keeps in-flight
/// temporary files out of a run.
pub fn locate_inputs(
    raw_dir: &Path,
    policy: SelectionPolicy,
    accepts: impl Fn(&Path) -> bool,
) -> LedgerResult<Vec<PathBuf>> {
    let no_input = || LedgerError::NoInputFound {
        dir: raw_dir.to_path_buf(),
    };

    let entries = match fs::read_dir(raw_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", raw_dir.display(), e);
            return Err(no_input());
        }
    };

    let mut candidates: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true);
        if hidden || !path.is_file() || !accepts(&path) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((path, modified));
    }

    if candidates.is_empty() {
        return Err(no_input());
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let selected: Vec<PathBuf> = match policy {
        SelectionPolicy::OldestByName => vec![candidates[0].0.clone()],
        SelectionPolicy::AllByName => candidates.into_iter().map(|(path, _)| path).collect(),
        SelectionPolicy::MostRecent => {
            // newest first; equal times keep name order
            candidates.sort_by_key(|(_, modified)| Reverse(*modified));
            vec![candidates[0].0.clone()]
        }
    };

    info!(
        "Selected {} input file(s) from {} ({:?})",
        selected.len(),
        raw_dir.display(),
        policy
    );
    Ok(selected)
}
