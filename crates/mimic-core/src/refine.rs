//! Feedback-driven workflow refinement.
//!
//! One refinement pass over all non-deprecated workflows:
//! 1. Status lifecycle: automatic promotion/demotion from execution counts
//!    and success rates (deprecation takes precedence and is terminal).
//! 2. Confidence blend: `new = 0.7·old + 0.3·success_rate`.
//! 3. Prune: steps failing in 80%+ of runs (given 3+ feedbacks) are dropped.
//! 4. Variants: failure patterns produce improved copies (v2, v3, ...).
//! 5. Merge: near-duplicate workflows in the same app are folded together.

use crate::model::{new_workflow_id, now_iso, ExecutionFeedback, Workflow, WorkflowStatus};
use crate::store::{FeedbackStore, WorkflowStore};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{info, warn};

/// Feedbacks required before a draft may become tested.
const PROMOTE_TO_TESTED_MIN_COUNT: usize = 1;
/// Feedbacks required before a workflow may become active.
const PROMOTE_TO_ACTIVE_MIN_COUNT: usize = 5;
/// Success rate required before a workflow may become active.
const PROMOTE_TO_ACTIVE_MIN_RATE: f64 = 0.7;
/// Feedbacks required before a workflow may be deprecated.
const DEMOTE_TO_DEPRECATED_MIN_COUNT: usize = 3;
/// Success rate below which a workflow is deprecated.
const DEMOTE_TO_DEPRECATED_MAX_RATE: f64 = 0.2;

/// Feedbacks required before step pruning may act.
const PRUNE_MIN_FEEDBACKS: usize = 3;
/// Failing feedbacks required before a variant is considered.
const MIN_FAILURES_FOR_VARIANT: usize = 3;
/// Share of one error code at a step required to act on it.
const STEP_FAILURE_SHARE: f64 = 0.5;
/// Step failure rate at which the step is pruned.
const PRUNE_FAILURE_RATE: f64 = 0.8;
/// Maximum variants per original.
const MAX_VARIANTS: usize = 3;
/// Base element-search deadline scaled by timeout variants.
const DEFAULT_STEP_TIMEOUT_SECS: f64 = 10.0;

/// Counters for one refinement pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefineStats {
    pub updated: usize,
    pub pruned: usize,
    pub merged: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub variants: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modification {
    ChangeToClickXy { step_index: usize },
    InsertWait { step_index: usize, secs: f64 },
    IncreaseTimeout { step_index: usize, factor: f64 },
    InsertFocusCheck { step_index: usize },
}

enum StatusChange {
    None,
    Promoted,
    Demoted,
}

/// Refines workflows in a store based on accumulated feedback.
pub struct Refiner<'a> {
    store: &'a WorkflowStore,
    feedback: &'a FeedbackStore,
}

impl<'a> Refiner<'a> {
    /// Creates a refiner over the given stores.
    #[must_use]
    pub fn new(store: &'a WorkflowStore, feedback: &'a FeedbackStore) -> Self {
        Self { store, feedback }
    }

    /// Runs one full refinement pass and returns its counters.
    pub fn refine_all(&self) -> RefineStats {
        let mut stats = RefineStats::default();

        for workflow in self.store.list_all() {
            if workflow.status == WorkflowStatus::Deprecated {
                continue;
            }
            let mut workflow = workflow;

            if self.update_confidence(&mut workflow) {
                stats.updated += 1;
            }
            match self.promote_or_demote(&mut workflow) {
                StatusChange::Promoted => stats.promoted += 1,
                StatusChange::Demoted => stats.demoted += 1,
                StatusChange::None => {}
            }
            stats.pruned += self.prune_failed_steps(&mut workflow);
            if self.try_create_variant(&workflow) {
                stats.variants += 1;
            }
        }

        stats.merged = self.merge_similar(&self.store.list_all());

        info!(?stats, "refinement pass complete");
        stats
    }

    /// Blends feedback success into confidence; persists over a 0.01 delta.
    fn update_confidence(&self, workflow: &mut Workflow) -> bool {
        if self.feedback.get_by_workflow(&workflow.workflow_id).is_empty() {
            return false;
        }
        let success_rate = self.feedback.get_success_rate(&workflow.workflow_id);
        let new_confidence = workflow.confidence * 0.7 + success_rate * 0.3;

        if (new_confidence - workflow.confidence).abs() > 0.01 {
            let old = workflow.confidence;
            workflow.confidence = new_confidence;
            self.persist(workflow);
            info!(
                name = %workflow.name,
                old_confidence = old,
                new_confidence,
                "confidence updated"
            );
            return true;
        }
        false
    }

    /// Applies the status ladder. Demotion has the highest precedence.
    fn promote_or_demote(&self, workflow: &mut Workflow) -> StatusChange {
        let feedbacks = self.feedback.get_by_workflow(&workflow.workflow_id);
        let count = feedbacks.len();
        if count == 0 {
            return StatusChange::None;
        }

        let rate = self.feedback.get_success_rate(&workflow.workflow_id);
        let old_status = workflow.status;
        workflow.execution_count = count as u32;

        if count >= DEMOTE_TO_DEPRECATED_MIN_COUNT && rate < DEMOTE_TO_DEPRECATED_MAX_RATE {
            workflow.status = WorkflowStatus::Deprecated;
        } else if count >= PROMOTE_TO_ACTIVE_MIN_COUNT && rate >= PROMOTE_TO_ACTIVE_MIN_RATE {
            workflow.status = WorkflowStatus::Active;
        } else if count >= PROMOTE_TO_TESTED_MIN_COUNT
            && rate > 0.0
            && workflow.status == WorkflowStatus::Draft
        {
            workflow.status = WorkflowStatus::Tested;
        }

        if workflow.status == old_status {
            return StatusChange::None;
        }

        self.persist(workflow);
        info!(
            name = %workflow.name,
            from = %old_status,
            to = %workflow.status,
            count,
            rate,
            "status changed"
        );
        if workflow.status == WorkflowStatus::Deprecated {
            StatusChange::Demoted
        } else {
            StatusChange::Promoted
        }
    }

    /// Removes steps with a failure rate at or above the prune threshold.
    fn prune_failed_steps(&self, workflow: &mut Workflow) -> usize {
        let feedbacks = self.feedback.get_by_workflow(&workflow.workflow_id);
        if feedbacks.len() < PRUNE_MIN_FEEDBACKS {
            return 0;
        }

        let rates = self.feedback.get_step_failure_rates(&workflow.workflow_id);
        let mut indices: Vec<usize> =
            rates.iter().filter(|&(_, &rate)| rate >= PRUNE_FAILURE_RATE).map(|(&i, _)| i).collect();
        if indices.is_empty() {
            return 0;
        }

        // Descending order keeps earlier indices valid while removing.
        indices.sort_unstable_by(|a, b| b.cmp(a));
        let mut removed = 0;
        for index in indices {
            if index < workflow.steps.len() {
                let step = workflow.steps.remove(index);
                info!(
                    name = %workflow.name,
                    step_index = index,
                    action = %step.action_type,
                    "failing step pruned"
                );
                removed += 1;
            }
        }
        if removed > 0 {
            self.persist(workflow);
        }
        removed
    }

    /// Creates one improved variant when the failure pattern is clear enough.
    fn try_create_variant(&self, workflow: &Workflow) -> bool {
        let feedbacks = self.feedback.get_by_workflow(&workflow.workflow_id);
        let failed: Vec<&ExecutionFeedback> = feedbacks.iter().filter(|f| !f.success).collect();
        if failed.len() < MIN_FAILURES_FOR_VARIANT {
            return false;
        }

        let existing_variants = self
            .store
            .list_all()
            .into_iter()
            .filter(|w| w.parent_id.as_deref() == Some(workflow.workflow_id.as_str()))
            .count();
        if existing_variants >= MAX_VARIANTS {
            return false;
        }

        let modifications = detect_improvements(&failed);
        if modifications.is_empty() {
            return false;
        }

        self.create_variant(workflow, &modifications, existing_variants + 2)
    }

    fn create_variant(
        &self,
        original: &Workflow,
        modifications: &[Modification],
        version: usize,
    ) -> bool {
        let mut variant = original.clone();
        variant.workflow_id = new_workflow_id();
        variant.name = format!("{}_v{version}", original.name);
        variant.status = WorkflowStatus::Draft;
        variant.execution_count = 0;
        variant.parent_id = Some(original.workflow_id.clone());
        variant.created_at = now_iso();
        variant.confidence = original.confidence * 0.8;

        for modification in modifications {
            match *modification {
                Modification::ChangeToClickXy { step_index } => {
                    if let Some(step) = variant.steps.get_mut(step_index) {
                        step.target.role = None;
                        step.target.title = None;
                        step.description = format!(
                            "(v{version}) click by coordinates ({}, {})",
                            step.coordinates.x, step.coordinates.y
                        );
                    }
                }
                Modification::InsertWait { step_index, secs } => {
                    if let Some(step) = variant.steps.get_mut(step_index) {
                        step.wait_before_secs = Some(secs);
                        step.description = format!("(v{version}) {} +wait {secs}s", step.description);
                    }
                }
                Modification::IncreaseTimeout { step_index, factor } => {
                    if let Some(step) = variant.steps.get_mut(step_index) {
                        let base = step.timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS);
                        step.timeout_secs = Some(base * factor);
                    }
                }
                Modification::InsertFocusCheck { step_index } => {
                    if let Some(step) = variant.steps.get_mut(step_index) {
                        step.needs_focus_check = true;
                    }
                }
            }
        }

        self.persist(&variant);
        info!(
            original = %original.name,
            variant = %variant.name,
            modifications = modifications.len(),
            "variant created"
        );
        true
    }

    /// Returns the id of the best-performing candidate among an original and
    /// its variants with at least 3 executions.
    pub fn select_best_variant(&self, original_id: &str) -> String {
        let mut candidates = vec![original_id.to_string()];
        for workflow in self.store.list_all() {
            if workflow.parent_id.as_deref() == Some(original_id) && workflow.execution_count >= 3 {
                candidates.push(workflow.workflow_id);
            }
        }

        let mut best_id = original_id.to_string();
        let mut best_rate = -1.0;
        for candidate in candidates {
            let feedbacks = self.feedback.get_by_workflow(&candidate);
            let rate = self.feedback.get_success_rate(&candidate);
            if feedbacks.len() >= 3 && rate > best_rate {
                best_rate = rate;
                best_id = candidate;
            }
        }
        best_id
    }

    /// Folds near-duplicate non-variant workflows together.
    fn merge_similar(&self, workflows: &[Workflow]) -> usize {
        let mut merged_count = 0;
        let mut merged_ids: HashSet<String> = HashSet::new();

        for workflow in workflows {
            if merged_ids.contains(&workflow.workflow_id) || workflow.parent_id.is_some() {
                continue;
            }

            let similar: Vec<&Workflow> = workflows
                .iter()
                .filter(|c| {
                    c.workflow_id != workflow.workflow_id
                        && !merged_ids.contains(&c.workflow_id)
                        && c.parent_id.is_none()
                        && is_similar(workflow, c)
                })
                .collect();

            let Some(mut current) = self.store.get(&workflow.workflow_id) else {
                continue;
            };

            for candidate in similar {
                let Some(candidate) = self.store.get(&candidate.workflow_id) else {
                    continue;
                };

                let absorbed_self = candidate.steps.len() > current.steps.len();
                let (mut base, other) = if absorbed_self {
                    (candidate, current.clone())
                } else {
                    (current.clone(), candidate)
                };

                base.confidence = (base.confidence + other.confidence) / 2.0;
                let tags: BTreeSet<String> =
                    base.tags.iter().chain(other.tags.iter()).cloned().collect();
                base.tags = tags.into_iter().collect();
                base.execution_count += other.execution_count;

                self.persist(&base);
                self.store.delete(&other.workflow_id);
                merged_ids.insert(other.workflow_id.clone());
                merged_count += 1;
                info!(kept = %base.name, absorbed = %other.name, "workflows merged");

                if absorbed_self {
                    merged_ids.insert(workflow.workflow_id.clone());
                    break;
                }
                current = base;
            }
        }

        merged_count
    }

    fn persist(&self, workflow: &Workflow) {
        if let Err(e) = self.store.save(workflow) {
            warn!(workflow_id = %workflow.workflow_id, error = %e, "failed to persist workflow");
        }
    }
}

/// Two workflows merge when the app matches, the names are within edit
/// distance 3, and the tag sets overlap at Jaccard 0.5 or more.
fn is_similar(a: &Workflow, b: &Workflow) -> bool {
    a.app_name == b.app_name
        && levenshtein(&a.name, &b.name) <= 3
        && jaccard(&a.tags, &b.tags) >= 0.5
}

fn detect_improvements(failed: &[&ExecutionFeedback]) -> Vec<Modification> {
    let mut step_errors: BTreeMap<usize, BTreeMap<String, usize>> = BTreeMap::new();
    for feedback in failed {
        for detail in &feedback.error_details {
            *step_errors
                .entry(detail.step_index)
                .or_default()
                .entry(detail.error_code.clone())
                .or_insert(0) += 1;
        }
    }

    let mut modifications = Vec::new();
    for (step_index, errors) in step_errors {
        let total: usize = errors.values().sum();
        if total < MIN_FAILURES_FOR_VARIANT {
            continue;
        }
        for (error_code, count) in errors {
            if (count as f64 / total as f64) < STEP_FAILURE_SHARE {
                continue;
            }
            match error_code.as_str() {
                "HINT_NOT_FOUND" if count >= 5 => {
                    modifications.push(Modification::ChangeToClickXy { step_index });
                }
                "HINT_NOT_FOUND" => {
                    modifications.push(Modification::InsertWait { step_index, secs: 0.5 });
                }
                "TIMEOUT" => {
                    modifications.push(Modification::IncreaseTimeout { step_index, factor: 1.5 });
                }
                "INPUT_FAILED" => {
                    modifications.push(Modification::InsertFocusCheck { step_index });
                }
                _ => {}
            }
        }
    }
    modifications
}

/// Levenshtein edit distance.
fn levenshtein(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let mut dp: Vec<usize> = (0..=b.len()).collect();

    for (i, &ca) in a.iter().enumerate() {
        let mut prev = dp[0];
        dp[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let temp = dp[j + 1];
            dp[j + 1] = if ca == cb { prev } else { 1 + prev.min(dp[j + 1]).min(dp[j]) };
            prev = temp;
        }
    }
    dp[b.len()]
}

/// Jaccard coefficient over tag sets; 0.0 when both are empty.
fn jaccard(tags1: &[String], tags2: &[String]) -> f64 {
    let set1: HashSet<&String> = tags1.iter().collect();
    let set2: HashSet<&String> = tags2.iter().collect();
    let union = set1.union(&set2).count();
    if union == 0 {
        return 0.0;
    }
    set1.intersection(&set2).count() as f64 / union as f64
}
