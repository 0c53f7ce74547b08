//! Execution feedback persistence.
//!
//! One JSON file per feedback (`{feedback_id}.json`). Feedback is
//! append-only: records are never mutated or deleted, and dry-run executions
//! are never recorded (enforced by the caller, which simply does not call
//! [`FeedbackStore::record`]).

use super::{ensure_store_dir, write_json_atomic};
use crate::error::CoreResult;
use crate::model::ExecutionFeedback;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File-per-feedback store.
#[derive(Debug, Clone)]
pub struct FeedbackStore {
    dir: PathBuf,
}

impl FeedbackStore {
    /// Opens (creating if needed) a store under the given directory.
    ///
    /// # Errors
    /// Returns `CoreError::StoreDirUnwritable` when the directory cannot be
    /// created or written.
    pub fn new(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        ensure_store_dir(&dir)?;
        Ok(Self { dir })
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records a feedback document. Returns the written path.
    ///
    /// # Errors
    /// Returns a `CoreError` if the file cannot be written.
    pub fn record(&self, feedback: &ExecutionFeedback) -> CoreResult<PathBuf> {
        let path = self.dir.join(format!("{}.json", feedback.feedback_id));
        write_json_atomic(&path, feedback)?;
        info!(
            feedback_id = %feedback.feedback_id,
            success = feedback.success,
            "feedback recorded"
        );
        Ok(path)
    }

    /// Feedback for one workflow, sorted by timestamp descending.
    pub fn get_by_workflow(&self, workflow_id: &str) -> Vec<ExecutionFeedback> {
        let mut results: Vec<ExecutionFeedback> = self
            .read_all()
            .into_iter()
            .filter(|f| f.workflow_id.as_deref() == Some(workflow_id))
            .collect();
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results
    }

    /// Success rate for a workflow in [0, 1]; 0.0 when no data exists.
    pub fn get_success_rate(&self, workflow_id: &str) -> f64 {
        let feedbacks = self.get_by_workflow(workflow_id);
        if feedbacks.is_empty() {
            return 0.0;
        }
        let successes = feedbacks.iter().filter(|f| f.success).count();
        successes as f64 / feedbacks.len() as f64
    }

    /// Per-step failure rates: `{step_index: failures / total_feedbacks}`.
    ///
    /// Empty when the workflow has no feedback.
    pub fn get_step_failure_rates(&self, workflow_id: &str) -> HashMap<usize, f64> {
        let feedbacks = self.get_by_workflow(workflow_id);
        if feedbacks.is_empty() {
            return HashMap::new();
        }
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for feedback in &feedbacks {
            for &index in &feedback.failed_step_indices {
                *counts.entry(index).or_insert(0) += 1;
            }
        }
        let total = feedbacks.len() as f64;
        counts.into_iter().map(|(index, count)| (index, count as f64 / total)).collect()
    }

    /// All feedback, sorted by timestamp descending.
    pub fn list_all(&self) -> Vec<ExecutionFeedback> {
        let mut feedbacks = self.read_all();
        feedbacks.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        feedbacks
    }

    /// Number of stored feedback documents.
    pub fn count(&self) -> usize {
        std::fs::read_dir(&self.dir).map_or(0, |entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
                .count()
        })
    }

    fn read_all(&self) -> Vec<ExecutionFeedback> {
        let mut feedbacks = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to scan feedback dir");
                return feedbacks;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(crate::error::CoreError::from)
                .and_then(|bytes| Ok(serde_json::from_slice(&bytes)?))
            {
                Ok(feedback) => feedbacks.push(feedback),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable feedback");
                }
            }
        }
        feedbacks
    }
}
