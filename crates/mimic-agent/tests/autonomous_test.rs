//! End-to-end execution scenarios: workflow replay with feedback, dry-run
//! isolation, dangerous-app gating during free exploration, and learned
//! recovery application.

use async_trait::async_trait;
use mimic_agent::observer::{DesktopState, Observer, PositionInfo, VisibleElement};
use mimic_agent::{
    AutonomousLoop, Confirmer, ExecutionContext, MockProbe, NullObserver, StepResultKind,
};
use mimic_core::config::EngineConfig;
use mimic_core::model::{now_iso, ActionKind, ActionStep, Point, Workflow};
use mimic_core::store::{FeedbackStore, RecoveryStore, WorkflowStore};
use mimic_oracle::{MockOracle, Oracle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Observer scripted to report a fixed frontmost app.
struct FixedAppObserver {
    app_name: String,
}

#[async_trait]
impl Observer for FixedAppObserver {
    async fn observe_current_state(&self) -> DesktopState {
        DesktopState {
            app: Some(mimic_core::model::AppInfo {
                name: self.app_name.clone(),
                bundle_id: format!("com.example.{}", self.app_name.to_lowercase()),
                pid: Some(42),
            }),
            screenshot_path: None,
            timestamp: now_iso(),
        }
    }

    async fn observe_at_position(&self, x: f64, y: f64) -> PositionInfo {
        PositionInfo { app: None, element: None, x, y }
    }

    async fn take_screenshot(&self, _prefix: &str) -> Option<String> {
        None
    }

    async fn get_visible_elements(&self, _pid: i64, _max_depth: usize) -> Vec<VisibleElement> {
        Vec::new()
    }
}

/// Confirmer that declines everything and counts how often it was asked.
struct DecliningConfirmer {
    asked: AtomicUsize,
}

impl DecliningConfirmer {
    fn new() -> Self {
        Self { asked: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Confirmer for DecliningConfirmer {
    async fn confirm(&self, _prompt: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        false
    }
}

fn engine_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        workflow_dir: dir.path().join("workflows"),
        step_delay_secs: 0.0,
        ..EngineConfig::default()
    }
}

fn sample_workflow(steps: usize) -> Workflow {
    Workflow {
        workflow_id: "wf-1".to_string(),
        name: "open downloads".to_string(),
        app_name: "Finder".to_string(),
        steps: (0..steps)
            .map(|i| ActionStep {
                action_type: ActionKind::Click,
                app_name: "Finder".to_string(),
                coordinates: Point { x: i as f64, y: 0.0 },
                ..ActionStep::default()
            })
            .collect(),
        confidence: 0.8,
        ..Workflow::default()
    }
}

fn click_choice_response() -> &'static str {
    r#"{"action_type": "click", "target_description": "Send button", "x": 10.0, "y": 20.0,
        "text": "", "keycode": null, "flags": null, "modifiers": [],
        "reasoning": "progress toward goal", "confidence": 0.9}"#
}

fn done_choice_response() -> &'static str {
    r#"{"action_type": "done", "target_description": "", "x": 0, "y": 0,
        "text": "", "keycode": null, "flags": null, "modifiers": [],
        "reasoning": "goal reached", "confidence": 0.9}"#
}

#[tokio::test]
async fn workflow_replay_records_feedback() {
    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir);
    let store = WorkflowStore::new(&config.workflow_dir).unwrap();
    store.save(&sample_workflow(3)).unwrap();

    let probe = Arc::new(MockProbe::new());
    let agent = AutonomousLoop::new(
        config.clone(),
        Oracle::new(Arc::new(MockOracle::new("mock"))),
        Arc::clone(&probe) as Arc<dyn mimic_agent::UiProbe>,
        Arc::new(NullObserver),
        Arc::new(mimic_agent::AutoConfirm),
    )
    .unwrap();

    let result = agent.play_workflow("wf-1", false, 0.0, None).await;
    assert!(result.success);
    assert_eq!(result.steps_executed, 3);
    assert_eq!(result.steps_succeeded, 3);
    assert!(result.goal_achieved);
    assert_eq!(probe.actuation_count(), 3);

    let feedback = FeedbackStore::new(config.workflow_dir.join("feedback")).unwrap();
    assert_eq!(feedback.count(), 1);
    let recorded = &feedback.get_by_workflow("wf-1")[0];
    assert!(recorded.success);
    assert_eq!(recorded.steps_executed, 3);
    assert_eq!(recorded.app_name, "Finder");
    assert!(recorded.failed_step_indices.is_empty());
}

#[tokio::test]
async fn dry_run_records_nothing_and_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir);
    let store = WorkflowStore::new(&config.workflow_dir).unwrap();
    store.save(&sample_workflow(3)).unwrap();

    let probe = Arc::new(MockProbe::new());
    let agent = AutonomousLoop::new(
        config.clone(),
        Oracle::new(Arc::new(MockOracle::new("mock"))),
        Arc::clone(&probe) as Arc<dyn mimic_agent::UiProbe>,
        Arc::new(NullObserver),
        Arc::new(mimic_agent::AutoConfirm),
    )
    .unwrap();

    let result = agent.play_workflow("wf-1", true, 0.0, None).await;
    assert!(result.success);
    assert_eq!(result.steps_succeeded, 3);

    // No probe side effect, no feedback file.
    assert!(probe.recorded_calls().is_empty());
    let feedback = FeedbackStore::new(config.workflow_dir.join("feedback")).unwrap();
    assert_eq!(feedback.count(), 0);
}

#[tokio::test]
async fn missing_workflow_reports_error() {
    let dir = TempDir::new().unwrap();
    let agent = AutonomousLoop::new(
        engine_config(&dir),
        Oracle::new(Arc::new(MockOracle::new("mock"))),
        Arc::new(MockProbe::new()),
        Arc::new(NullObserver),
        Arc::new(mimic_agent::AutoConfirm),
    )
    .unwrap();

    let result = agent.play_workflow("wf-missing", false, 0.0, None).await;
    assert!(!result.success);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn declined_dangerous_action_is_skipped_not_failed() {
    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir);

    // Free exploration in Mail: the oracle proposes a click, the user
    // declines, then the oracle signals done.
    let oracle = MockOracle::new("mock");
    oracle.push_response(click_choice_response());
    oracle.push_response(done_choice_response());

    let probe = Arc::new(MockProbe::new());
    let confirmer = Arc::new(DecliningConfirmer::new());
    let agent = AutonomousLoop::new(
        config.clone(),
        Oracle::new(Arc::new(oracle)),
        Arc::clone(&probe) as Arc<dyn mimic_agent::UiProbe>,
        Arc::new(FixedAppObserver { app_name: "Mail".to_string() }),
        Arc::clone(&confirmer) as Arc<dyn Confirmer>,
    )
    .unwrap();

    let ctx = ExecutionContext { step_delay_secs: 0.0, ..ExecutionContext::new("send a note") };
    let result = agent.run(ctx).await;

    // The declined step is recorded as skipped, never reached the probe, and
    // contributed no failed index to the feedback.
    assert_eq!(confirmer.asked.load(Ordering::SeqCst), 1);
    assert!(probe.recorded_calls().is_empty());
    assert_eq!(result.step_results.len(), 1);
    assert_eq!(result.step_results[0].result, StepResultKind::SkippedDangerous);
    assert_eq!(result.steps_failed, 0);

    let feedback = FeedbackStore::new(config.workflow_dir.join("feedback")).unwrap();
    let all = feedback.list_all();
    assert_eq!(all.len(), 1);
    assert!(all[0].failed_step_indices.is_empty());
    assert_eq!(all[0].app_name, "Mail");
}

#[tokio::test]
async fn free_exploration_wait_and_done() {
    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir);

    let oracle = MockOracle::new("mock");
    oracle.push_response(
        r#"{"action_type": "wait", "target_description": "", "x": 0, "y": 0,
            "text": "", "keycode": null, "flags": null, "modifiers": [],
            "reasoning": "page loading", "confidence": 0.9}"#,
    );
    oracle.push_response(done_choice_response());

    let agent = AutonomousLoop::new(
        config,
        Oracle::new(Arc::new(oracle)),
        Arc::new(MockProbe::new()),
        Arc::new(NullObserver),
        Arc::new(mimic_agent::AutoConfirm),
    )
    .unwrap();

    let ctx = ExecutionContext { step_delay_secs: 0.0, ..ExecutionContext::new("wait then done") };
    let result = agent.run(ctx).await;

    assert_eq!(result.step_results.len(), 1);
    assert_eq!(result.step_results[0].action, "wait");
    assert_eq!(result.step_results[0].result, StepResultKind::Success);
}

#[tokio::test]
async fn goal_resolution_prefers_search_hit() {
    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir);
    let store = WorkflowStore::new(&config.workflow_dir).unwrap();
    store.save(&sample_workflow(2)).unwrap();

    let probe = Arc::new(MockProbe::new());
    let agent = AutonomousLoop::new(
        config,
        Oracle::new(Arc::new(MockOracle::new("mock"))),
        Arc::clone(&probe) as Arc<dyn mimic_agent::UiProbe>,
        Arc::new(NullObserver),
        Arc::new(mimic_agent::AutoConfirm),
    )
    .unwrap();

    // The goal matches the stored workflow by keywords, so the loop replays
    // it instead of exploring (the mock oracle has no scripted choices and
    // would end exploration immediately).
    let ctx = ExecutionContext { step_delay_secs: 0.0, ..ExecutionContext::new("open downloads") };
    let result = agent.run(ctx).await;
    assert_eq!(result.steps_executed, 2);
    assert_eq!(probe.actuation_count(), 2);
}

#[tokio::test]
async fn learned_recovery_is_applied_once_and_fed_back() {
    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir);

    // Teach the learner that HINT_NOT_FOUND on a click recovers via click_xy.
    let recovery_path = config.workflow_dir.join("recovery_patterns.json");
    std::fs::create_dir_all(&config.workflow_dir).unwrap();
    {
        let mut learner = RecoveryStore::new(&recovery_path);
        for _ in 0..3 {
            learner.record_recovery("HINT_NOT_FOUND", "", "click", "click_xy", true).unwrap();
        }
    }

    let store = WorkflowStore::new(&config.workflow_dir).unwrap();
    let mut workflow = sample_workflow(1);
    workflow.app_name = String::new();
    workflow.steps[0].app_name = String::new();
    store.save(&workflow).unwrap();

    // First element search fails; the recovery retry's search succeeds.
    let probe = Arc::new(MockProbe::new());
    probe.push_element(None);

    let agent = AutonomousLoop::new(
        config.clone(),
        Oracle::new(Arc::new(MockOracle::new("mock"))),
        Arc::clone(&probe) as Arc<dyn mimic_agent::UiProbe>,
        Arc::new(NullObserver),
        Arc::new(mimic_agent::AutoConfirm),
    )
    .unwrap();

    let result = agent.play_workflow("wf-1", false, 0.0, None).await;
    assert!(result.success);
    assert_eq!(result.steps_succeeded, 1);
    // One click in the end: the recovery retry.
    assert_eq!(probe.actuation_count(), 1);

    // The recovery outcome was recorded (sample count grew to 4).
    let learner = RecoveryStore::new(&recovery_path);
    let pattern = learner.get_learned_recovery("HINT_NOT_FOUND", "", "click").unwrap();
    assert_eq!(pattern.sample_count, 4);
    assert_eq!(pattern.success_count, 4);
}
