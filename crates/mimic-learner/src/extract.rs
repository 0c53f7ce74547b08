//! Workflow extraction from capture history.
//!
//! Renders each segment into a compact action transcript, asks the oracle
//! whether it forms a reusable workflow, and stores accepted candidates.
//! Same-name candidates are deduplicated by keeping the higher-confidence
//! instance. Incremental mode consumes only captures absent from the
//! processed log and appends what it consumed, whether or not a workflow
//! came out of it.

use crate::segment::{segment_records, EXTRACTION_GAP_SECONDS, EXTRACTION_MAX_RECORDS};
use crate::watcher::{CaptureWatcher, AGENT_PROCESSED_LOG};
use mimic_core::error::CoreResult;
use mimic_abstraction::SessionTranscript;
use mimic_core::model::{new_workflow_id, now_iso, Segment, Workflow, WorkflowParameter};
use mimic_core::store::WorkflowStore;
use mimic_oracle::Oracle;
use std::path::PathBuf;
use tracing::{info, warn};

/// Result of one incremental extraction cycle.
#[derive(Debug, Default)]
pub struct IncrementalOutcome {
    /// Workflows that ended up stored this cycle.
    pub workflows: Vec<Workflow>,
    /// Segments built from the consumed captures.
    pub segments: Vec<Segment>,
}

/// Extracts workflows from the capture directory into a workflow store.
pub struct WorkflowExtractor {
    watch_dir: PathBuf,
    store: WorkflowStore,
    oracle: Oracle,
    min_confidence: f64,
    gap_seconds: i64,
    max_records: usize,
}

impl WorkflowExtractor {
    /// Creates an extractor.
    ///
    /// # Errors
    /// Fails fast when the watch directory is unreadable or the workflow
    /// directory is unwritable.
    pub fn new(
        watch_dir: impl Into<PathBuf>,
        workflow_dir: impl Into<PathBuf>,
        oracle: Oracle,
        min_confidence: f64,
    ) -> CoreResult<Self> {
        let watch_dir = watch_dir.into();
        // Validate both directories up front; these are the only fatal errors.
        CaptureWatcher::new(&watch_dir, AGENT_PROCESSED_LOG)?;
        let store = WorkflowStore::new(workflow_dir)?;
        Ok(Self {
            watch_dir,
            store,
            oracle,
            min_confidence,
            gap_seconds: EXTRACTION_GAP_SECONDS,
            max_records: EXTRACTION_MAX_RECORDS,
        })
    }

    /// Overrides the segmentation bounds (the daemon uses the pipeline's).
    #[must_use]
    pub fn with_segmentation(mut self, gap_seconds: i64, max_records: usize) -> Self {
        self.gap_seconds = gap_seconds;
        self.max_records = max_records;
        self
    }

    /// The underlying workflow store.
    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    /// Segments the full capture history without any oracle calls.
    ///
    /// # Errors
    /// Returns a `CoreError` when the watch directory is unreadable.
    pub fn build_segments(&self) -> CoreResult<Vec<Segment>> {
        let watcher = CaptureWatcher::new(&self.watch_dir, AGENT_PROCESSED_LOG)?;
        let records = watcher.load_all_records();
        Ok(segment_records(records, self.gap_seconds, self.max_records))
    }

    /// Extracts workflows from the full capture history.
    ///
    /// # Errors
    /// Returns a `CoreError` when the watch directory is unreadable.
    pub async fn extract_all(&self) -> CoreResult<Vec<Workflow>> {
        let segments = self.build_segments()?;
        if segments.is_empty() {
            warn!("no segments found");
            return Ok(Vec::new());
        }

        info!(segments = segments.len(), "analyzing segments");
        let mut workflows = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            info!(
                index = i + 1,
                total = segments.len(),
                actions = segment.steps.len(),
                app = %segment.app_name,
                "analyzing segment"
            );
            if let Some(workflow) = self.analyze_segment(segment).await {
                if let Some(saved) = self.save_with_dedup(workflow) {
                    workflows.push(saved);
                }
            }
        }

        info!(extracted = workflows.len(), "extraction complete");
        Ok(workflows)
    }

    /// Extracts workflows from captures not yet in the processed log, then
    /// appends the consumed filenames to it.
    ///
    /// # Errors
    /// Returns a `CoreError` when the watch directory is unreadable.
    pub async fn extract_incremental(&self) -> CoreResult<Vec<Workflow>> {
        Ok(self.extract_incremental_detailed().await?.workflows)
    }

    /// Incremental extraction that also returns the consumed segments, so the
    /// daemon can clean up fully-processed sessions.
    ///
    /// # Errors
    /// Returns a `CoreError` when the watch directory is unreadable.
    pub async fn extract_incremental_detailed(&self) -> CoreResult<IncrementalOutcome> {
        let mut watcher = CaptureWatcher::new(&self.watch_dir, AGENT_PROCESSED_LOG)?;
        let new_records = watcher.scan_new_records();
        if new_records.is_empty() {
            info!("no new captures");
            return Ok(IncrementalOutcome::default());
        }
        info!(count = new_records.len(), "new captures found");

        let consumed: Vec<PathBuf> =
            new_records.iter().map(|r| r.source_path.clone()).collect();
        let segments = segment_records(new_records, self.gap_seconds, self.max_records);

        let mut workflows = Vec::new();
        for segment in &segments {
            if let Some(workflow) = self.analyze_segment(segment).await {
                if let Some(saved) = self.save_with_dedup(workflow) {
                    workflows.push(saved);
                }
            }
        }

        // Consumed captures are logged even when no workflow came out;
        // re-analysis requires resetting the log.
        for path in &consumed {
            watcher.mark_processed(path);
        }

        info!(extracted = workflows.len(), "incremental extraction complete");
        Ok(IncrementalOutcome { workflows, segments })
    }

    /// Asks the oracle about one segment and builds a candidate workflow.
    pub async fn analyze_segment(&self, segment: &Segment) -> Option<Workflow> {
        if segment.steps.is_empty() {
            return None;
        }

        let actions_text = format_actions_text(segment);
        let analysis =
            self.oracle.analyze_workflow_segment(&actions_text, &segment.app_name).await?;
        if analysis.confidence < self.min_confidence {
            info!(
                name = %analysis.name,
                confidence = analysis.confidence,
                "candidate below confidence threshold"
            );
            return None;
        }

        let mut steps = segment.steps.clone();
        let parameters: Vec<WorkflowParameter> = analysis
            .parameters
            .iter()
            .map(|p| WorkflowParameter {
                name: p.name.clone(),
                description: p.description.clone(),
                step_index: p.step_index,
            })
            .collect();
        // Mark parameterized steps so replay can bind values by name.
        for parameter in &parameters {
            if let Ok(index) = usize::try_from(parameter.step_index) {
                if let Some(step) = steps.get_mut(index) {
                    step.parameterized.is_parameterized = true;
                    step.parameterized.param_name = Some(parameter.name.clone());
                }
            }
        }

        Some(Workflow {
            workflow_id: new_workflow_id(),
            name: analysis.name,
            description: analysis.description,
            steps,
            app_name: segment.app_name.clone(),
            tags: analysis.tags,
            parameters,
            confidence: analysis.confidence,
            source_session_ids: vec![segment.session_id.clone()],
            created_at: now_iso(),
            ..Workflow::default()
        })
    }

    /// Saves a candidate, resolving same-name duplicates by confidence.
    ///
    /// Returns the workflow that ended up stored, or None when the existing
    /// instance won.
    fn save_with_dedup(&self, workflow: Workflow) -> Option<Workflow> {
        if let Some(existing) = self.store.find_duplicate(&workflow.name) {
            if workflow.confidence > existing.confidence {
                self.store.delete(&existing.workflow_id);
                if let Err(e) = self.store.save(&workflow) {
                    warn!(name = %workflow.name, error = %e, "failed to save workflow");
                    return None;
                }
                info!(
                    name = %workflow.name,
                    old_confidence = existing.confidence,
                    new_confidence = workflow.confidence,
                    "duplicate replaced"
                );
                return Some(workflow);
            }
            info!(name = %workflow.name, "duplicate kept existing higher-confidence instance");
            return None;
        }

        if let Err(e) = self.store.save(&workflow) {
            warn!(name = %workflow.name, error = %e, "failed to save workflow");
            return None;
        }
        info!(name = %workflow.name, confidence = workflow.confidence, "workflow saved");
        Some(workflow)
    }
}

/// Builds the transcript view of a segment for session-level oracle calls
/// (summary and skill extraction).
pub fn segment_transcript(segment: &Segment) -> SessionTranscript {
    SessionTranscript {
        session_id: segment.session_id.clone(),
        app_name: segment.app_name.clone(),
        start_time: segment.start_time.clone(),
        end_time: segment.end_time.clone(),
        record_count: segment.records.len(),
        lines: format_actions_text(segment).lines().map(String::from).collect(),
    }
}

/// Renders a segment into one transcript line per capture.
pub fn format_actions_text(segment: &Segment) -> String {
    let mut lines = Vec::with_capacity(segment.records.len());
    for (i, record) in segment.records.iter().enumerate() {
        let action = &record.user_action;
        let mut parts = vec![format!("[{}] {} {}", i + 1, record.timestamp, action.kind)];

        if let Some(name) = record.target.name.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("target={name}"));
        }
        if let Some(role) = record.target.role.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("role={role}"));
        }
        if let Some(value) = record.target.value.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("value={}", truncate(value, 50)));
        }
        if !record.window.name.is_empty() {
            parts.push(format!("window={}", record.window.name));
        }

        match action.kind.as_str() {
            "text_input" => {
                if let Some(text) = action.text.as_deref().filter(|s| !s.is_empty()) {
                    parts.push(format!("text='{}'", truncate(text, 30)));
                }
            }
            "shortcut" | "key_shortcut" => {
                let key = action.key.clone().unwrap_or_default();
                if !action.modifiers.is_empty() || !key.is_empty() {
                    let mut combo = action.modifiers.clone();
                    combo.push(key);
                    parts.push(format!("shortcut={}", combo.join("+")));
                }
            }
            _ => {}
        }

        lines.push(parts.join(" "));
    }
    lines.join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::model::{AppInfo, CaptureRecord, TargetInfo, UserAction, WindowInfo};

    fn segment_with(records: Vec<CaptureRecord>) -> Segment {
        Segment {
            app_name: "Finder".to_string(),
            steps: records.iter().map(mimic_core::model::ActionStep::from_capture).collect(),
            records,
            ..Segment::default()
        }
    }

    #[test]
    fn test_format_actions_text_click() {
        let record = CaptureRecord {
            timestamp: "2026-02-17T12:00:00".to_string(),
            user_action: UserAction { kind: "click".to_string(), ..UserAction::default() },
            target: TargetInfo {
                name: Some("Downloads".to_string()),
                role: Some("AXButton".to_string()),
                ..TargetInfo::default()
            },
            window: WindowInfo { name: "Finder".to_string(), ..WindowInfo::default() },
            app: AppInfo { name: "Finder".to_string(), ..AppInfo::default() },
            ..CaptureRecord::default()
        };
        let text = format_actions_text(&segment_with(vec![record]));
        assert_eq!(
            text,
            "[1] 2026-02-17T12:00:00 click target=Downloads role=AXButton window=Finder"
        );
    }

    #[test]
    fn test_format_actions_text_shortcut() {
        let record = CaptureRecord {
            timestamp: "2026-02-17T12:00:00".to_string(),
            user_action: UserAction {
                kind: "shortcut".to_string(),
                key: Some("s".to_string()),
                modifiers: vec!["cmd".to_string()],
                ..UserAction::default()
            },
            ..CaptureRecord::default()
        };
        let text = format_actions_text(&segment_with(vec![record]));
        assert!(text.ends_with("shortcut=cmd+s"));
    }

    #[test]
    fn test_segment_transcript_view() {
        let record = CaptureRecord {
            timestamp: "2026-02-17T12:00:00".to_string(),
            user_action: UserAction { kind: "click".to_string(), ..UserAction::default() },
            target: TargetInfo { name: Some("Downloads".to_string()), ..TargetInfo::default() },
            app: AppInfo { name: "Finder".to_string(), ..AppInfo::default() },
            ..CaptureRecord::default()
        };
        let mut segment = segment_with(vec![record]);
        segment.session_id = "sess-1".to_string();
        segment.start_time = "2026-02-17T12:00:00".to_string();
        segment.end_time = "2026-02-17T12:00:00".to_string();

        let transcript = segment_transcript(&segment);
        assert_eq!(transcript.session_id, "sess-1");
        assert_eq!(transcript.app_name, "Finder");
        assert_eq!(transcript.record_count, 1);
        assert_eq!(transcript.lines.len(), 1);
        assert!(transcript.lines[0].contains("target=Downloads"));
    }

    #[test]
    fn test_format_actions_text_truncates_text() {
        let record = CaptureRecord {
            timestamp: "2026-02-17T12:00:00".to_string(),
            user_action: UserAction {
                kind: "text_input".to_string(),
                text: Some("x".repeat(100)),
                ..UserAction::default()
            },
            ..CaptureRecord::default()
        };
        let text = format_actions_text(&segment_with(vec![record]));
        assert!(text.contains(&format!("text='{}'", "x".repeat(30))));
        assert!(!text.contains(&"x".repeat(31)));
    }
}
