//! Cleanup sweeper for the watched capture directory.
//!
//! Deletes the files of fully-processed sessions and, on a timer driven by
//! the daemon, any capture artifacts older than the retention period.
//! Deletion is best-effort; a missing or locked file is never an error.

use mimic_core::model::Segment;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Default retention for aged capture artifacts.
pub const RETENTION_SECS: u64 = 3600;

/// Filename patterns eligible for the aged-file sweep.
const SWEEP_PREFIXES: [&str; 3] = ["cap_", "full_", "crop_"];
const SWEEP_EXTENSIONS: [&str; 2] = ["json", "png"];

/// Deletes processed-session files and aged capture artifacts.
#[derive(Debug, Clone)]
pub struct CleanupSweeper {
    watch_dir: PathBuf,
}

impl CleanupSweeper {
    /// Creates a sweeper over the watch directory.
    #[must_use]
    pub fn new(watch_dir: impl Into<PathBuf>) -> Self {
        Self { watch_dir: watch_dir.into() }
    }

    /// Deletes every file referenced by a fully-processed segment: the source
    /// JSON and both screenshots of each record.
    pub fn cleanup_session(&self, segment: &Segment) {
        for record in &segment.records {
            if record.source_path.as_os_str().is_empty() {
                continue;
            }
            safe_delete(&record.source_path);
            if let Some(full) = &record.screenshots.full {
                safe_delete(Path::new(full));
            }
            if let Some(cropped) = &record.screenshots.cropped {
                safe_delete(Path::new(cropped));
            }
        }
    }

    /// Deletes capture artifacts older than `retention_secs`.
    ///
    /// Matches `{cap,full,crop}_*.{json,png}` by mtime, so a file still being
    /// written is never racing the sweep. Returns the deleted basenames.
    pub fn cleanup_old_files(&self, retention_secs: u64) -> Vec<String> {
        let mut deleted = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.watch_dir) else {
            return deleted;
        };
        let cutoff = SystemTime::now() - Duration::from_secs(retention_secs);

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !matches_sweep_pattern(name) {
                continue;
            }
            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .is_ok_and(|mtime| mtime < cutoff);
            if old_enough {
                safe_delete(&path);
                deleted.push(name.to_string());
            }
        }
        deleted
    }
}

fn matches_sweep_pattern(name: &str) -> bool {
    let has_prefix = SWEEP_PREFIXES.iter().any(|p| name.starts_with(p));
    let has_extension = SWEEP_EXTENSIONS
        .iter()
        .any(|ext| Path::new(name).extension().and_then(|e| e.to_str()) == Some(*ext));
    has_prefix && has_extension
}

fn safe_delete(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!(file = %path.display(), "deleted"),
        Err(e) => warn!(file = %path.display(), error = %e, "delete failed"),
    }
}
