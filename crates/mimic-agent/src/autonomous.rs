//! Autonomous execution loop.
//!
//! Resolves a goal onto a stored workflow (explicit id, then search) or falls
//! through to free exploration. Both paths run Observe → Select → Execute →
//! Verify per step with a consecutive-failure cap, dangerous-app gating
//! through an injected [`Confirmer`], and learned-recovery retries. Outside
//! dry-run, every run appends a feedback record.

use crate::executor::{StepExecutor, StepPlayback};
use crate::observer::Observer;
use crate::probe::UiProbe;
use crate::selector::{ActionSelector, HistoryEntry};
use crate::verifier::ExecutionVerifier;
use async_trait::async_trait;
use mimic_abstraction::ChoiceKind;
use mimic_core::config::EngineConfig;
use mimic_core::error::CoreResult;
use mimic_core::model::{
    new_feedback_id, now_iso, ActionStep, ErrorDetail, ExecutionFeedback, ExecutionMode,
    Workflow,
};
use mimic_core::store::{FeedbackStore, RecoveryStore, WorkflowStore};
use mimic_oracle::Oracle;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Context for one execution run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub goal: String,
    pub workflow_id: Option<String>,
    pub dry_run: bool,
    pub max_steps: usize,
    pub max_consecutive_failures: usize,
    pub step_delay_secs: f64,
    pub confirm_dangerous: bool,
    pub parameters: HashMap<String, String>,
}

impl ExecutionContext {
    /// Creates a context with the default limits.
    #[must_use]
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            workflow_id: None,
            dry_run: false,
            max_steps: 50,
            max_consecutive_failures: 5,
            step_delay_secs: 1.0,
            confirm_dangerous: true,
            parameters: HashMap::new(),
        }
    }
}

/// Outcome classification of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResultKind {
    Success,
    Failed,
    /// The user declined a dangerous-app action; not counted as a failure.
    SkippedDangerous,
}

impl StepResultKind {
    /// The snake_case name used in step results.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::SkippedDangerous => "skipped_dangerous",
        }
    }
}

/// The record of one executed (or skipped) step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    /// 1-based step number.
    pub step: usize,
    pub action: String,
    pub result: StepResultKind,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Summary of one execution run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub steps_executed: usize,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub goal_achieved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub step_results: Vec<StepOutcome>,
    pub total_time_seconds: f64,
}

/// Asks the user to confirm a dangerous action.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Returns whether the action may proceed.
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Confirmer that always approves (used when gating is disabled).
#[derive(Debug, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Orchestrates workflow replay and free exploration.
pub struct AutonomousLoop {
    config: EngineConfig,
    store: WorkflowStore,
    feedback: FeedbackStore,
    selector: ActionSelector,
    verifier: ExecutionVerifier,
    executor: StepExecutor,
    observer: Arc<dyn Observer>,
    confirmer: Arc<dyn Confirmer>,
    recovery: Option<Mutex<RecoveryStore>>,
}

impl AutonomousLoop {
    /// Wires the loop over the given capabilities.
    ///
    /// # Errors
    /// Fails fast when the workflow directory is unwritable.
    pub fn new(
        config: EngineConfig,
        oracle: Oracle,
        probe: Arc<dyn UiProbe>,
        observer: Arc<dyn Observer>,
        confirmer: Arc<dyn Confirmer>,
    ) -> CoreResult<Self> {
        let store = WorkflowStore::new(&config.workflow_dir)?;
        let feedback = FeedbackStore::new(config.workflow_dir.join("feedback"))?;
        let recovery =
            RecoveryStore::new(config.workflow_dir.join("recovery_patterns.json"));

        Ok(Self {
            selector: ActionSelector::new(config.clone(), oracle.clone()),
            verifier: ExecutionVerifier::new(oracle.clone()),
            executor: StepExecutor::new(probe, Arc::clone(&observer), oracle),
            store,
            feedback,
            observer,
            confirmer,
            recovery: Some(Mutex::new(recovery)),
            config,
        })
    }

    /// Disables learned-recovery retries.
    #[must_use]
    pub fn without_recovery(mut self) -> Self {
        self.recovery = None;
        self
    }

    /// The workflow store the loop resolves against.
    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    /// Main entry: resolve a workflow for the goal or explore freely.
    pub async fn run(&self, ctx: ExecutionContext) -> ExecutionResult {
        let started = Instant::now();
        info!(goal = %ctx.goal, dry_run = ctx.dry_run, "autonomous run started");

        if let Some(workflow_id) = &ctx.workflow_id {
            if let Some(workflow) = self.store.get(workflow_id) {
                return self.run_workflow(&workflow, &ctx, started).await;
            }
            warn!(workflow_id, "workflow not found, falling back to exploration");
        }

        let matches = self.store.search(&ctx.goal, Some(&self.feedback));
        if let Some(best) = matches.first() {
            info!(name = %best.name, confidence = best.confidence, "matching workflow found");
            return self.run_workflow(best, &ctx, started).await;
        }

        info!("no matching workflow, exploring freely");
        self.run_free(&ctx, started).await
    }

    /// Direct replay of a stored workflow.
    pub async fn play_workflow(
        &self,
        workflow_id: &str,
        dry_run: bool,
        step_delay_secs: f64,
        parameters: Option<HashMap<String, String>>,
    ) -> ExecutionResult {
        let Some(workflow) = self.store.get(workflow_id) else {
            return ExecutionResult {
                error: Some(format!("workflow {workflow_id} not found")),
                ..ExecutionResult::default()
            };
        };

        let ctx = ExecutionContext {
            workflow_id: Some(workflow_id.to_string()),
            dry_run,
            step_delay_secs,
            parameters: parameters.unwrap_or_default(),
            ..ExecutionContext::new(workflow.name.clone())
        };
        self.run_workflow(&workflow, &ctx, Instant::now()).await
    }

    async fn run_workflow(
        &self,
        workflow: &Workflow,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> ExecutionResult {
        let total_steps = workflow.steps.len();
        let mut outcomes: Vec<StepOutcome> = Vec::new();
        let mut consecutive_failures = 0usize;

        info!(name = %workflow.name, steps = total_steps, "replaying workflow");

        for i in 0..total_steps {
            if consecutive_failures >= ctx.max_consecutive_failures {
                error!(consecutive_failures, "consecutive failure cap reached");
                break;
            }

            let state = self.observer.observe_current_state().await;
            let before_screenshot = state.screenshot_path.clone();

            let Some(step) = self.selector.select_from_workflow(workflow, i, &ctx.parameters)
            else {
                break;
            };
            info!(
                step = i + 1,
                total = total_steps,
                action = %step.action_type,
                "executing step"
            );

            if ctx.confirm_dangerous
                && self.config.is_dangerous_app(&step.app_name)
                && !ctx.dry_run
            {
                let prompt = format!(
                    "Dangerous app action: {} ({} on {})",
                    step.app_name, step.action_type, step.description
                );
                if !self.confirmer.confirm(&prompt).await {
                    outcomes.push(StepOutcome {
                        step: i + 1,
                        action: step.action_type.to_string(),
                        result: StepResultKind::SkippedDangerous,
                        verified: false,
                        error_code: None,
                        error: None,
                        reasoning: None,
                    });
                    continue;
                }
            }

            let playback = self.execute_with_recovery(&step, ctx.dry_run).await;
            let (success, verified) = self
                .verify_playback(&playback, before_screenshot.as_deref(), &step, ctx.dry_run)
                .await;

            outcomes.push(StepOutcome {
                step: i + 1,
                action: step.action_type.to_string(),
                result: if success { StepResultKind::Success } else { StepResultKind::Failed },
                verified,
                error_code: playback.error_code.clone(),
                error: playback.error.clone(),
                reasoning: None,
            });

            consecutive_failures = if success { 0 } else { consecutive_failures + 1 };

            if i < total_steps - 1 {
                tokio::time::sleep(Duration::from_secs_f64(ctx.step_delay_secs)).await;
            }
        }

        let result = summarize(outcomes, started, |succeeded| succeeded == total_steps);
        if !ctx.dry_run {
            self.record_feedback(
                Some(workflow.workflow_id.clone()),
                &ctx.goal,
                &result,
                ExecutionMode::Workflow,
                workflow.app_name.clone(),
            );
        }
        result
    }

    async fn run_free(&self, ctx: &ExecutionContext, started: Instant) -> ExecutionResult {
        let mut outcomes: Vec<StepOutcome> = Vec::new();
        let mut consecutive_failures = 0usize;
        let mut last_app = String::new();

        for step_num in 1..=ctx.max_steps {
            if consecutive_failures >= ctx.max_consecutive_failures {
                error!(consecutive_failures, "consecutive failure cap reached");
                break;
            }

            let state = self.observer.observe_current_state().await;
            let before_screenshot = state.screenshot_path.clone();
            if !state.app_name().is_empty() {
                last_app = state.app_name().to_string();
            }

            // Goal check every 5 steps.
            if step_num > 1 && step_num % 5 == 0 {
                let check =
                    self.verifier.check_goal(&ctx.goal, &state, &history_of(&outcomes)).await;
                if check.achieved && check.confidence >= 0.7 {
                    info!(goal = %ctx.goal, confidence = check.confidence, "goal achieved");
                    let mut result = summarize(outcomes, started, |_| true);
                    result.success = true;
                    self.record_feedback(
                        None,
                        &ctx.goal,
                        &result,
                        ExecutionMode::Autonomous,
                        last_app,
                    );
                    return result;
                }
            }

            let Some(choice) =
                self.selector.select_autonomous(&ctx.goal, &state, &history_of(&outcomes)).await
            else {
                warn!("no action selectable, stopping");
                break;
            };

            match choice.action_type {
                ChoiceKind::Done => {
                    info!("oracle signalled done");
                    break;
                }
                ChoiceKind::Wait => {
                    info!("oracle signalled wait");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    outcomes.push(StepOutcome {
                        step: step_num,
                        action: "wait".to_string(),
                        result: StepResultKind::Success,
                        verified: false,
                        error_code: None,
                        error: None,
                        reasoning: Some(choice.reasoning.clone()),
                    });
                    continue;
                }
                _ => {}
            }

            if choice.requires_confirmation && ctx.confirm_dangerous && !ctx.dry_run {
                let prompt = format!(
                    "Dangerous app action: {} ({} - {})",
                    state.app_name(),
                    choice.action_type.as_str(),
                    choice.target_description
                );
                if !self.confirmer.confirm(&prompt).await {
                    outcomes.push(StepOutcome {
                        step: step_num,
                        action: choice.action_type.as_str().to_string(),
                        result: StepResultKind::SkippedDangerous,
                        verified: false,
                        error_code: None,
                        error: None,
                        reasoning: Some(choice.reasoning.clone()),
                    });
                    continue;
                }
            }

            let step = ActionSelector::choice_to_step(&choice, state.app.as_ref());
            info!(
                step = step_num,
                action = %step.action_type,
                target = %choice.target_description,
                confidence = choice.confidence,
                "executing chosen action"
            );

            let playback = self.execute_with_recovery(&step, ctx.dry_run).await;
            let (success, verified) = self
                .verify_playback(&playback, before_screenshot.as_deref(), &step, ctx.dry_run)
                .await;

            outcomes.push(StepOutcome {
                step: step_num,
                action: step.action_type.to_string(),
                result: if success { StepResultKind::Success } else { StepResultKind::Failed },
                verified,
                error_code: playback.error_code.clone(),
                error: playback.error.clone(),
                reasoning: Some(choice.reasoning.clone()),
            });

            consecutive_failures = if success { 0 } else { consecutive_failures + 1 };
            tokio::time::sleep(Duration::from_secs_f64(ctx.step_delay_secs)).await;
        }

        let result = summarize(outcomes, started, |_| false);
        if !ctx.dry_run {
            self.record_feedback(None, &ctx.goal, &result, ExecutionMode::Autonomous, last_app);
        }
        result
    }

    /// Plays a step; on failure, applies a learned recovery exactly once
    /// before one re-attempt, feeding the outcome back to the learner.
    async fn execute_with_recovery(&self, step: &ActionStep, dry_run: bool) -> StepPlayback {
        let playback = self.executor.play_step(step, dry_run).await;
        if playback.success || dry_run {
            return playback;
        }
        let Some(error_code) = playback.error_code.clone() else {
            return playback;
        };
        let Some(recovery) = &self.recovery else {
            return playback;
        };

        let suggestion = recovery
            .lock()
            .expect("recovery lock")
            .get_learned_recovery(&error_code, &step.app_name, step.action_type.as_str())
            .map(|p| p.recovery_action.clone());
        let Some(recovery_action) = suggestion else {
            return playback;
        };
        info!(error_code, recovery_action, "applying learned recovery");

        let mut retry_step = step.clone();
        match recovery_action.as_str() {
            "click_xy" => {
                retry_step.target.role = None;
                retry_step.target.title = None;
            }
            "wait_retry" => retry_step.wait_before_secs = Some(0.5),
            "refocus" => retry_step.needs_focus_check = true,
            _ => {}
        }

        let retry = self.executor.play_step(&retry_step, dry_run).await;
        if let Err(e) = recovery.lock().expect("recovery lock").record_recovery(
            &error_code,
            &step.app_name,
            step.action_type.as_str(),
            &recovery_action,
            retry.success,
        ) {
            warn!(error = %e, "failed to record recovery outcome");
        }
        retry
    }

    /// Runs verification after a successful execution; a verified verdict
    /// overrides the executor's flag, an unverified one preserves it.
    async fn verify_playback(
        &self,
        playback: &StepPlayback,
        before_screenshot: Option<&str>,
        step: &ActionStep,
        dry_run: bool,
    ) -> (bool, bool) {
        let mut success = playback.success;
        let mut verified = false;

        if !dry_run && success {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let after_state = self.observer.observe_current_state().await;
            let expected = if step.description.is_empty() {
                step.action_type.to_string()
            } else {
                step.description.clone()
            };
            let verification = self
                .verifier
                .verify_step(
                    before_screenshot,
                    after_state.screenshot_path.as_deref(),
                    &expected,
                    dry_run,
                )
                .await;
            verified = verification.verified;
            if verified {
                success = verification.success;
            } else {
                info!(reasoning = %verification.reasoning, "verification skipped");
            }
        }

        (success, verified)
    }

    fn record_feedback(
        &self,
        workflow_id: Option<String>,
        goal: &str,
        result: &ExecutionResult,
        mode: ExecutionMode,
        app_name: String,
    ) {
        let failed_step_indices: Vec<usize> = result
            .step_results
            .iter()
            .filter(|o| o.result == StepResultKind::Failed)
            .map(|o| o.step - 1)
            .collect();
        let error_details: Vec<ErrorDetail> = result
            .step_results
            .iter()
            .filter(|o| o.result == StepResultKind::Failed)
            .filter_map(|o| {
                o.error_code.as_ref().map(|code| ErrorDetail {
                    step_index: o.step - 1,
                    error_code: code.clone(),
                    error_msg: o.error.clone().unwrap_or_default(),
                })
            })
            .collect();

        let feedback = ExecutionFeedback {
            feedback_id: new_feedback_id(),
            workflow_id,
            goal: goal.to_string(),
            success: result.success,
            steps_executed: result.steps_executed,
            steps_succeeded: result.steps_succeeded,
            failed_step_indices,
            error_details,
            timestamp: now_iso(),
            execution_mode: mode,
            duration_seconds: result.total_time_seconds,
            app_name,
            ..ExecutionFeedback::default()
        };

        match self.feedback.record(&feedback) {
            Ok(_) => {
                info!(feedback_id = %feedback.feedback_id, success = feedback.success, "feedback recorded");
            }
            Err(e) => warn!(error = %e, "failed to record feedback"),
        }
    }
}

/// Observes the goal-check history window over past outcomes.
fn history_of(outcomes: &[StepOutcome]) -> Vec<HistoryEntry> {
    let start = outcomes.len().saturating_sub(10);
    outcomes[start..]
        .iter()
        .map(|o| HistoryEntry {
            step: o.step,
            action: o.action.clone(),
            result: o.result.as_str().to_string(),
        })
        .collect()
}

fn summarize(
    outcomes: Vec<StepOutcome>,
    started: Instant,
    goal_achieved: impl Fn(usize) -> bool,
) -> ExecutionResult {
    let succeeded =
        outcomes.iter().filter(|o| o.result == StepResultKind::Success).count();
    let failed = outcomes.iter().filter(|o| o.result == StepResultKind::Failed).count();
    ExecutionResult {
        success: succeeded > 0,
        steps_executed: outcomes.len(),
        steps_succeeded: succeeded,
        steps_failed: failed,
        goal_achieved: goal_achieved(succeeded),
        error: None,
        step_results: outcomes,
        total_time_seconds: started.elapsed().as_secs_f64(),
    }
}
