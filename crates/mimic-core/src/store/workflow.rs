//! Workflow persistence and search.
//!
//! One JSON file per workflow (`{workflow_id}.json`) under the store
//! directory. Search ranks by keyword match, historical success rate, and
//! usage; deprecated workflows are never returned from search.

use super::{ensure_store_dir, write_json_atomic, FeedbackStore};
use crate::error::CoreResult;
use crate::model::{Workflow, WorkflowStatus};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File-per-workflow store.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    dir: PathBuf,
}

impl WorkflowStore {
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

    /// Saves a workflow, overwriting any previous version of the same id.
    ///
    /// # Errors
    /// Returns a `CoreError` if the file cannot be written.
    pub fn save(&self, workflow: &Workflow) -> CoreResult<PathBuf> {
        let path = self.path_for(&workflow.workflow_id);
        write_json_atomic(&path, workflow)?;
        info!(workflow_id = %workflow.workflow_id, name = %workflow.name, "workflow saved");
        Ok(path)
    }

    /// Fetches a workflow by id. None if absent or unreadable.
    pub fn get(&self, workflow_id: &str) -> Option<Workflow> {
        let path = self.path_for(workflow_id);
        if !path.exists() {
            return None;
        }
        match read_workflow(&path) {
            Ok(workflow) => Some(workflow),
            Err(e) => {
                warn!(workflow_id, error = %e, "failed to read workflow");
                None
            }
        }
    }

    /// All workflows, sorted by confidence descending.
    ///
    /// Unreadable files are logged and skipped.
    pub fn list_all(&self) -> Vec<Workflow> {
        let mut workflows = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to scan workflow dir");
                return workflows;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_workflow(&path) {
                Ok(workflow) => workflows.push(workflow),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable workflow");
                }
            }
        }
        workflows.sort_by(|a, b| {
            b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
        workflows
    }

    /// Keyword search with weighted ranking.
    ///
    /// The query is split on whitespace; a workflow survives only when every
    /// keyword is a case-insensitive substring of its concatenated name,
    /// description, app name, and tags. Survivors are ranked by
    /// `3.0·keyword_match + 2.0·success_rate + 0.3·ln(1 + execution_count)`.
    /// Deprecated workflows are excluded.
    pub fn search(&self, query: &str, feedback: Option<&FeedbackStore>) -> Vec<Workflow> {
        let query_lower = query.to_lowercase();
        let keywords: Vec<&str> = query_lower.split_whitespace().collect();

        let mut scored: Vec<(f64, Workflow)> = Vec::new();
        for workflow in self.list_all() {
            if workflow.status == WorkflowStatus::Deprecated {
                continue;
            }

            let searchable = format!(
                "{} {} {} {}",
                workflow.name.to_lowercase(),
                workflow.description.to_lowercase(),
                workflow.app_name.to_lowercase(),
                workflow.tags.iter().map(|t| t.to_lowercase()).collect::<Vec<_>>().join(" "),
            );
            if !keywords.iter().all(|kw| searchable.contains(kw)) {
                continue;
            }

            let keyword_match = 1.0;
            let success_rate =
                feedback.map_or(0.0, |store| store.get_success_rate(&workflow.workflow_id));
            let score = keyword_match * 3.0
                + success_rate * 2.0
                + (f64::from(workflow.execution_count) + 1.0).ln() * 0.3;
            scored.push((score, workflow));
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        debug!(query, hits = scored.len(), "workflow search");
        scored.into_iter().map(|(_, workflow)| workflow).collect()
    }

    /// Deletes a workflow. Returns whether a file was removed.
    pub fn delete(&self, workflow_id: &str) -> bool {
        let path = self.path_for(workflow_id);
        if path.exists() && std::fs::remove_file(&path).is_ok() {
            info!(workflow_id, "workflow deleted");
            return true;
        }
        false
    }

    /// Finds a workflow with the same name, case-insensitively.
    pub fn find_duplicate(&self, name: &str) -> Option<Workflow> {
        let name_lower = name.to_lowercase();
        self.list_all().into_iter().find(|w| w.name.to_lowercase() == name_lower)
    }

    /// Number of stored workflows.
    pub fn count(&self) -> usize {
        std::fs::read_dir(&self.dir).map_or(0, |entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
                .count()
        })
    }

    fn path_for(&self, workflow_id: &str) -> PathBuf {
        self.dir.join(format!("{workflow_id}.json"))
    }
}

fn read_workflow(path: &Path) -> CoreResult<Workflow> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
