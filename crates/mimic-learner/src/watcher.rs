//! Capture ingest: polling discovery of new capture records.
//!
//! Scans a watch directory for capture JSON files and tracks what has been
//! consumed in a processed-filenames log, so earlier-seen files are never
//! revisited across cycles. Malformed files are logged and skipped, never
//! fatal.

use mimic_core::error::{CoreError, CoreResult};
use mimic_core::model::{parse_timestamp, CaptureRecord};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Filename prefixes the event tap uses for capture records.
const CAPTURE_PREFIXES: [&str; 4] = ["cap_", "click_cap_", "text_cap_", "shortcut_cap_"];

/// Default processed-filenames log used by the pipeline.
pub const PROCESSED_LOG: &str = "_processed.txt";
/// Processed-filenames log used by the incremental extractor.
pub const AGENT_PROCESSED_LOG: &str = "_agent_processed.txt";

/// Polling watcher over a capture directory.
#[derive(Debug)]
pub struct CaptureWatcher {
    watch_dir: PathBuf,
    processed_path: PathBuf,
    processed: HashSet<String>,
}

impl CaptureWatcher {
    /// Opens a watcher over `watch_dir`, tracking state in `processed_log`.
    ///
    /// # Errors
    /// Returns `CoreError::WatchDirUnreadable` when the directory cannot be
    /// created or listed.
    pub fn new(watch_dir: impl Into<PathBuf>, processed_log: &str) -> CoreResult<Self> {
        let watch_dir = watch_dir.into();
        std::fs::create_dir_all(&watch_dir)
            .map_err(|e| CoreError::WatchDirUnreadable(format!("{}: {e}", watch_dir.display())))?;
        std::fs::read_dir(&watch_dir)
            .map_err(|e| CoreError::WatchDirUnreadable(format!("{}: {e}", watch_dir.display())))?;

        let processed_path = watch_dir.join(processed_log);
        let processed = load_processed(&processed_path);
        Ok(Self { watch_dir, processed_path, processed })
    }

    /// The watched directory.
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Paths of unprocessed capture files, sorted by filename.
    pub fn scan_new_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .list_capture_files()
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| !self.processed.contains(name))
            })
            .collect();
        files.sort();
        files
    }

    /// Unprocessed capture records, sorted by timestamp ascending.
    ///
    /// Malformed JSON is logged and skipped.
    pub fn scan_new_records(&self) -> Vec<CaptureRecord> {
        let mut records: Vec<CaptureRecord> =
            self.scan_new_files().iter().filter_map(|path| self.load_record(path)).collect();
        records.sort_by_key(|r| parse_timestamp(&r.timestamp));
        records
    }

    /// All capture records in the directory regardless of the processed log.
    pub fn load_all_records(&self) -> Vec<CaptureRecord> {
        let mut records: Vec<CaptureRecord> =
            self.list_capture_files().iter().filter_map(|path| self.load_record(path)).collect();
        records.sort_by_key(|r| parse_timestamp(&r.timestamp));
        info!(count = records.len(), "capture records loaded");
        records
    }

    /// Parses one capture file. None (with a log line) when malformed.
    pub fn load_record(&self, path: &Path) -> Option<CaptureRecord> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable capture");
                return None;
            }
        };
        match serde_json::from_slice::<CaptureRecord>(&bytes) {
            Ok(mut record) => {
                record.source_path = path.to_path_buf();
                Some(record)
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed capture");
                None
            }
        }
    }

    /// Appends the file's basename to the processed log. Idempotent.
    pub fn mark_processed(&mut self, path: &Path) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        if !self.processed.insert(name.to_string()) {
            return;
        }
        if let Err(e) = append_line(&self.processed_path, name) {
            warn!(error = %e, "failed to append to processed log");
        }
    }

    /// Whether the basename is already in the processed log.
    pub fn is_processed(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.processed.contains(name))
    }

    /// Number of processed filenames on record.
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    fn list_capture_files(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.watch_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.watch_dir.display(), error = %e, "failed to scan watch dir");
                return Vec::new();
            }
        };
        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name().and_then(|n| n.to_str()).is_some_and(is_capture_filename)
            })
            .collect()
    }
}

/// Whether a filename matches one of the capture patterns (`cap_*.json` etc.).
pub fn is_capture_filename(name: &str) -> bool {
    name.ends_with(".json") && CAPTURE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn load_processed(path: &Path) -> HashSet<String> {
    if !path.exists() {
        return HashSet::new();
    }
    match std::fs::read_to_string(path) {
        Ok(text) => text.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect(),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "failed to read processed log");
            HashSet::new()
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_capture(dir: &Path, name: &str, timestamp: &str) {
        let body = format!(
            r#"{{"capture_id": "{name}", "timestamp": "{timestamp}",
                "app": {{"name": "Finder", "bundle_id": "com.apple.finder"}},
                "user_action": {{"type": "click", "x": 1.0, "y": 2.0}}}}"#
        );
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_capture_filename_patterns() {
        assert!(is_capture_filename("cap_001.json"));
        assert!(is_capture_filename("click_cap_001.json"));
        assert!(is_capture_filename("text_cap_001.json"));
        assert!(is_capture_filename("shortcut_cap_001.json"));
        assert!(!is_capture_filename("cap_001.png"));
        assert!(!is_capture_filename("other_001.json"));
        assert!(!is_capture_filename("_processed.txt"));
    }

    #[test]
    fn test_scan_skips_processed() {
        let dir = TempDir::new().unwrap();
        write_capture(dir.path(), "cap_001.json", "2026-02-17T12:00:00");
        write_capture(dir.path(), "cap_002.json", "2026-02-17T12:00:05");

        let mut watcher = CaptureWatcher::new(dir.path(), PROCESSED_LOG).unwrap();
        assert_eq!(watcher.scan_new_files().len(), 2);

        let first = watcher.scan_new_files()[0].clone();
        watcher.mark_processed(&first);
        assert_eq!(watcher.scan_new_files().len(), 1);
        assert!(watcher.is_processed(&first));
    }

    #[test]
    fn test_mark_processed_idempotent() {
        let dir = TempDir::new().unwrap();
        write_capture(dir.path(), "cap_001.json", "2026-02-17T12:00:00");

        let mut watcher = CaptureWatcher::new(dir.path(), PROCESSED_LOG).unwrap();
        let path = dir.path().join("cap_001.json");
        watcher.mark_processed(&path);
        watcher.mark_processed(&path);

        let log = std::fs::read_to_string(dir.path().join(PROCESSED_LOG)).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn test_processed_log_survives_reopen() {
        let dir = TempDir::new().unwrap();
        write_capture(dir.path(), "cap_001.json", "2026-02-17T12:00:00");
        let path = dir.path().join("cap_001.json");

        {
            let mut watcher = CaptureWatcher::new(dir.path(), PROCESSED_LOG).unwrap();
            watcher.mark_processed(&path);
        }
        let watcher = CaptureWatcher::new(dir.path(), PROCESSED_LOG).unwrap();
        assert!(watcher.is_processed(&path));
        assert!(watcher.scan_new_files().is_empty());
    }

    #[test]
    fn test_records_sorted_by_timestamp() {
        let dir = TempDir::new().unwrap();
        // Filenames deliberately out of timestamp order.
        write_capture(dir.path(), "cap_001.json", "2026-02-17T12:00:10");
        write_capture(dir.path(), "cap_002.json", "2026-02-17T12:00:00");

        let watcher = CaptureWatcher::new(dir.path(), PROCESSED_LOG).unwrap();
        let records = watcher.scan_new_records();
        assert_eq!(records.len(), 2);
        assert!(records[0].timestamp < records[1].timestamp);
        assert!(records[0].source_path.ends_with("cap_002.json"));
    }

    #[test]
    fn test_malformed_json_skipped() {
        let dir = TempDir::new().unwrap();
        write_capture(dir.path(), "cap_001.json", "2026-02-17T12:00:00");
        std::fs::write(dir.path().join("cap_002.json"), "{broken").unwrap();

        let watcher = CaptureWatcher::new(dir.path(), PROCESSED_LOG).unwrap();
        assert_eq!(watcher.scan_new_records().len(), 1);
    }
}
