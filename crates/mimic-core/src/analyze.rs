//! Cross-session performance analysis.
//!
//! Aggregates feedback over a trailing window into per-app statistics,
//! failure/usage rankings, a status distribution, and rule-based improvement
//! suggestions. Regression detection compares the last 10 runs against the
//! 10 before them.

use crate::model::{ExecutionFeedback, WorkflowStatus};
use crate::store::{FeedbackStore, WorkflowStore};
use chrono::{Duration, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Per-app aggregate statistics.
#[derive(Debug, Clone, Serialize)]
pub struct AppStats {
    pub count: usize,
    pub success_rate: f64,
    pub avg_duration: f64,
}

/// One entry of the failure or usage ranking.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRanking {
    pub workflow_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<usize>,
    pub success_rate: f64,
}

/// Suggestion priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A rule-generated improvement suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub workflow_id: String,
    pub name: String,
    pub priority: Priority,
    pub suggestion: String,
    pub auto_applicable: bool,
}

/// The full analysis report for one trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub period_days: i64,
    pub total_feedbacks: usize,
    pub overall_success_rate: f64,
    pub app_stats: BTreeMap<String, AppStats>,
    pub top_failures: Vec<WorkflowRanking>,
    pub top_used: Vec<WorkflowRanking>,
    pub status_distribution: BTreeMap<String, usize>,
    pub suggestions: Vec<Suggestion>,
}

/// Analyzes feedback across sessions and workflows.
pub struct MetaAnalyzer<'a> {
    store: &'a WorkflowStore,
    feedback: &'a FeedbackStore,
}

impl<'a> MetaAnalyzer<'a> {
    /// Creates an analyzer over the given stores.
    #[must_use]
    pub fn new(store: &'a WorkflowStore, feedback: &'a FeedbackStore) -> Self {
        Self { store, feedback }
    }

    /// Builds the report for a trailing window of `days`.
    pub fn generate_report(&self, days: i64) -> AnalysisReport {
        let cutoff = Local::now().naive_local() - Duration::days(days);
        let period_feedbacks: Vec<ExecutionFeedback> = self
            .feedback
            .list_all()
            .into_iter()
            .filter(|f| {
                crate::model::parse_timestamp(&f.timestamp).is_some_and(|ts| ts >= cutoff)
            })
            .collect();

        let total = period_feedbacks.len();
        let success_count = period_feedbacks.iter().filter(|f| f.success).count();
        let overall_success_rate =
            if total > 0 { success_count as f64 / total as f64 } else { 0.0 };

        // Per-app statistics.
        let mut app_data: BTreeMap<String, Vec<&ExecutionFeedback>> = BTreeMap::new();
        for feedback in &period_feedbacks {
            let app = if feedback.app_name.is_empty() {
                "Unknown".to_string()
            } else {
                feedback.app_name.clone()
            };
            app_data.entry(app).or_default().push(feedback);
        }
        let app_stats: BTreeMap<String, AppStats> = app_data
            .into_iter()
            .map(|(app, fbs)| {
                let count = fbs.len();
                let successes = fbs.iter().filter(|f| f.success).count();
                let avg = fbs.iter().map(|f| f.duration_seconds).sum::<f64>() / count as f64;
                (
                    app,
                    AppStats {
                        count,
                        success_rate: successes as f64 / count as f64,
                        avg_duration: (avg * 100.0).round() / 100.0,
                    },
                )
            })
            .collect();

        // Per-workflow aggregation.
        let mut wf_data: BTreeMap<String, Vec<&ExecutionFeedback>> = BTreeMap::new();
        for feedback in &period_feedbacks {
            if let Some(workflow_id) = &feedback.workflow_id {
                wf_data.entry(workflow_id.clone()).or_default().push(feedback);
            }
        }

        let mut top_failures: Vec<WorkflowRanking> = Vec::new();
        let mut top_used: Vec<WorkflowRanking> = Vec::new();
        for (workflow_id, fbs) in &wf_data {
            let count = fbs.len();
            let successes = fbs.iter().filter(|f| f.success).count();
            let name = self
                .store
                .get(workflow_id)
                .map_or_else(|| workflow_id.clone(), |w| w.name);
            let rate = successes as f64 / count as f64;
            top_failures.push(WorkflowRanking {
                workflow_id: workflow_id.clone(),
                name: name.clone(),
                failure_count: Some(count - successes),
                execution_count: None,
                success_rate: rate,
            });
            top_used.push(WorkflowRanking {
                workflow_id: workflow_id.clone(),
                name,
                failure_count: None,
                execution_count: Some(count),
                success_rate: rate,
            });
        }
        top_failures.sort_by(|a, b| b.failure_count.cmp(&a.failure_count));
        top_failures.truncate(5);
        top_used.sort_by(|a, b| b.execution_count.cmp(&a.execution_count));
        top_used.truncate(5);

        // Status distribution over the whole store.
        let mut status_distribution: BTreeMap<String, usize> =
            ["draft", "tested", "active", "deprecated"]
                .into_iter()
                .map(|s| (s.to_string(), 0))
                .collect();
        for workflow in self.store.list_all() {
            *status_distribution.entry(workflow.status.as_str().to_string()).or_insert(0) += 1;
        }

        let suggestions = self.suggest_improvements();

        info!(days, total_feedbacks = total, "analysis report generated");
        AnalysisReport {
            period_days: days,
            total_feedbacks: total,
            overall_success_rate: (overall_success_rate * 10000.0).round() / 10000.0,
            app_stats,
            top_failures,
            top_used,
            status_distribution,
            suggestions,
        }
    }

    /// Detects a regression: with 20+ feedbacks, true when the success rate of
    /// the last 10 dropped at least 0.2 below the previous 10.
    pub fn detect_regression(&self, workflow_id: &str) -> bool {
        let mut feedbacks = self.feedback.get_by_workflow(workflow_id);
        feedbacks.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        if feedbacks.len() < 20 {
            return false;
        }

        let recent = &feedbacks[feedbacks.len() - 10..];
        let previous = &feedbacks[feedbacks.len() - 20..feedbacks.len() - 10];

        let rate = |window: &[ExecutionFeedback]| {
            window.iter().filter(|f| f.success).count() as f64 / window.len() as f64
        };
        let drop = rate(previous) - rate(recent);
        if drop >= 0.2 {
            warn!(
                workflow_id,
                previous_rate = rate(previous),
                recent_rate = rate(recent),
                "regression detected"
            );
            return true;
        }
        false
    }

    /// Generates improvement suggestions for every workflow.
    pub fn suggest_improvements(&self) -> Vec<Suggestion> {
        let mut suggestions = Vec::new();
        let workflows = self.store.list_all();

        // Precompute per-app success rates over all feedback.
        let mut app_feedback: BTreeMap<String, Vec<ExecutionFeedback>> = BTreeMap::new();
        for feedback in self.feedback.list_all() {
            let app = if feedback.app_name.is_empty() {
                "Unknown".to_string()
            } else {
                feedback.app_name.clone()
            };
            app_feedback.entry(app).or_default().push(feedback);
        }
        let app_rates: BTreeMap<&String, (usize, f64)> = app_feedback
            .iter()
            .map(|(app, fbs)| {
                let successes = fbs.iter().filter(|f| f.success).count();
                (app, (fbs.len(), successes as f64 / fbs.len() as f64))
            })
            .collect();

        for workflow in &workflows {
            let feedbacks = self.feedback.get_by_workflow(&workflow.workflow_id);
            let count = feedbacks.len();

            // Rule 1: failure rate >= 0.5 with 3+ executions.
            if count >= 3 {
                let successes = feedbacks.iter().filter(|f| f.success).count();
                let failure_rate = 1.0 - successes as f64 / count as f64;
                if failure_rate >= 0.5 {
                    suggestions.push(Suggestion {
                        workflow_id: workflow.workflow_id.clone(),
                        name: workflow.name.clone(),
                        priority: Priority::High,
                        suggestion: "Low success rate; consider generating a variant".to_string(),
                        auto_applicable: true,
                    });
                }
            }

            // Rule 2: regression.
            if self.detect_regression(&workflow.workflow_id) {
                suggestions.push(Suggestion {
                    workflow_id: workflow.workflow_id.clone(),
                    name: workflow.name.clone(),
                    priority: Priority::High,
                    suggestion: "Regression detected: recent success rate dropped".to_string(),
                    auto_applicable: false,
                });
            }

            // Rule 3: app success rate < 0.3 with 5+ feedbacks.
            let app = if workflow.app_name.is_empty() {
                "Unknown".to_string()
            } else {
                workflow.app_name.clone()
            };
            if let Some(&(app_count, app_rate)) = app_rates.get(&app) {
                if app_count >= 5 && app_rate < 0.3 {
                    suggestions.push(Suggestion {
                        workflow_id: workflow.workflow_id.clone(),
                        name: workflow.name.clone(),
                        priority: Priority::High,
                        suggestion: format!("Low operation success rate in app '{app}'"),
                        auto_applicable: false,
                    });
                }
            }

            // Rule 4: deprecated status.
            if workflow.status == WorkflowStatus::Deprecated {
                suggestions.push(Suggestion {
                    workflow_id: workflow.workflow_id.clone(),
                    name: workflow.name.clone(),
                    priority: Priority::Medium,
                    suggestion: "Deprecated; consider creating a replacement workflow"
                        .to_string(),
                    auto_applicable: false,
                });
            }
        }

        info!(count = suggestions.len(), "improvement suggestions generated");
        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{new_feedback_id, Workflow};
    use tempfile::TempDir;

    fn stores(dir: &TempDir) -> (WorkflowStore, FeedbackStore) {
        let store = WorkflowStore::new(dir.path().join("workflows")).unwrap();
        let feedback = FeedbackStore::new(dir.path().join("feedback")).unwrap();
        (store, feedback)
    }

    fn feedback_at(workflow_id: &str, success: bool, minute: usize) -> ExecutionFeedback {
        ExecutionFeedback {
            feedback_id: new_feedback_id(),
            workflow_id: Some(workflow_id.to_string()),
            success,
            timestamp: format!("2099-01-01T10:{minute:02}:00"),
            ..ExecutionFeedback::default()
        }
    }

    #[test]
    fn test_regression_needs_twenty_feedbacks() {
        let dir = TempDir::new().unwrap();
        let (store, feedback) = stores(&dir);
        let analyzer = MetaAnalyzer::new(&store, &feedback);

        for i in 0..19 {
            feedback.record(&feedback_at("wf-1", i % 2 == 0, i)).unwrap();
        }
        assert!(!analyzer.detect_regression("wf-1"));
    }

    #[test]
    fn test_regression_detected_on_drop() {
        let dir = TempDir::new().unwrap();
        let (store, feedback) = stores(&dir);
        let analyzer = MetaAnalyzer::new(&store, &feedback);

        // First 10 succeed, last 10 fail: drop of 1.0.
        for i in 0..20 {
            feedback.record(&feedback_at("wf-1", i < 10, i)).unwrap();
        }
        assert!(analyzer.detect_regression("wf-1"));
    }

    #[test]
    fn test_no_regression_when_stable() {
        let dir = TempDir::new().unwrap();
        let (store, feedback) = stores(&dir);
        let analyzer = MetaAnalyzer::new(&store, &feedback);

        for i in 0..20 {
            feedback.record(&feedback_at("wf-1", true, i)).unwrap();
        }
        assert!(!analyzer.detect_regression("wf-1"));
    }

    #[test]
    fn test_suggestions_for_failing_workflow() {
        let dir = TempDir::new().unwrap();
        let (store, feedback) = stores(&dir);

        let workflow = Workflow {
            workflow_id: "wf-1".to_string(),
            name: "flaky".to_string(),
            ..Workflow::default()
        };
        store.save(&workflow).unwrap();
        for i in 0..4 {
            feedback.record(&feedback_at("wf-1", i == 0, i)).unwrap();
        }

        let analyzer = MetaAnalyzer::new(&store, &feedback);
        let suggestions = analyzer.suggest_improvements();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].priority, Priority::High);
        assert!(suggestions[0].auto_applicable);
    }

    #[test]
    fn test_report_counts_and_rankings() {
        let dir = TempDir::new().unwrap();
        let (store, feedback) = stores(&dir);

        let workflow = Workflow {
            workflow_id: "wf-1".to_string(),
            name: "open downloads".to_string(),
            ..Workflow::default()
        };
        store.save(&workflow).unwrap();

        for i in 0..3 {
            let mut fb = feedback_at("wf-1", i == 0, i);
            fb.app_name = "Finder".to_string();
            fb.duration_seconds = 2.0;
            // Keep feedbacks inside the window by using the current time.
            fb.timestamp = crate::model::now_iso();
            feedback.record(&fb).unwrap();
        }

        let analyzer = MetaAnalyzer::new(&store, &feedback);
        let report = analyzer.generate_report(7);
        assert_eq!(report.total_feedbacks, 3);
        assert_eq!(report.app_stats["Finder"].count, 3);
        assert_eq!(report.top_used[0].execution_count, Some(3));
        assert_eq!(report.top_failures[0].failure_count, Some(2));
        assert_eq!(report.status_distribution["draft"], 1);
    }
}
