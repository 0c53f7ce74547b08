//! End-to-end refinement scenarios: status lifecycle, confidence blending,
//! step pruning, variant generation, merging, and the search/report
//! invariants that hang off them.

use mimic_core::model::{
    new_feedback_id, ActionKind, ActionStep, ErrorDetail, ExecutionFeedback, Workflow,
    WorkflowStatus,
};
use mimic_core::refine::Refiner;
use mimic_core::report::{ReportFormat, ReportGenerator};
use mimic_core::store::{FeedbackStore, WorkflowStore};
use tempfile::TempDir;

fn stores(dir: &TempDir) -> (WorkflowStore, FeedbackStore) {
    let store = WorkflowStore::new(dir.path().join("workflows")).unwrap();
    let feedback = FeedbackStore::new(dir.path().join("workflows/feedback")).unwrap();
    (store, feedback)
}

fn workflow(id: &str, name: &str, confidence: f64, steps: usize) -> Workflow {
    Workflow {
        workflow_id: id.to_string(),
        name: name.to_string(),
        confidence,
        app_name: "Finder".to_string(),
        steps: (0..steps)
            .map(|_| ActionStep { action_type: ActionKind::Click, ..ActionStep::default() })
            .collect(),
        ..Workflow::default()
    }
}

fn feedback(workflow_id: &str, success: bool, minute: usize) -> ExecutionFeedback {
    ExecutionFeedback {
        feedback_id: new_feedback_id(),
        workflow_id: Some(workflow_id.to_string()),
        success,
        steps_executed: 3,
        steps_succeeded: if success { 3 } else { 1 },
        timestamp: format!("2026-02-17T10:{minute:02}:00"),
        ..ExecutionFeedback::default()
    }
}

#[test]
fn status_promotion_to_active_blends_confidence() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    store.save(&workflow("wf-1", "open downloads", 0.5, 3)).unwrap();
    // 6 feedbacks: 5 successes, 1 failure.
    for i in 0..6 {
        fb_store.record(&feedback("wf-1", i != 0, i)).unwrap();
    }

    let stats = Refiner::new(&store, &fb_store).refine_all();
    assert_eq!(stats.promoted, 1);

    let refined = store.get("wf-1").unwrap();
    assert_eq!(refined.status, WorkflowStatus::Active);
    assert_eq!(refined.execution_count, 6);
    // 0.7 * 0.5 + 0.3 * (5/6) = 0.6.
    assert!((refined.confidence - 0.6).abs() < 0.01);
}

#[test]
fn draft_with_some_success_becomes_tested() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    store.save(&workflow("wf-1", "open downloads", 0.5, 3)).unwrap();
    fb_store.record(&feedback("wf-1", true, 0)).unwrap();

    Refiner::new(&store, &fb_store).refine_all();
    assert_eq!(store.get("wf-1").unwrap().status, WorkflowStatus::Tested);
}

#[test]
fn failing_workflow_is_deprecated_and_unsearchable() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    store.save(&workflow("wf-1", "open downloads", 0.5, 3)).unwrap();
    // 6 feedbacks, 1 success: rate 1/6 < 0.2.
    for i in 0..6 {
        fb_store.record(&feedback("wf-1", i == 0, i)).unwrap();
    }

    let stats = Refiner::new(&store, &fb_store).refine_all();
    assert_eq!(stats.demoted, 1);

    let refined = store.get("wf-1").unwrap();
    assert_eq!(refined.status, WorkflowStatus::Deprecated);
    assert!(store.search("open", Some(&fb_store)).is_empty());
    assert!(store.search("downloads", None).is_empty());
}

#[test]
fn deprecation_threshold_is_strict() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    store.save(&workflow("wf-1", "open downloads", 0.5, 3)).unwrap();
    // Rate exactly 0.2 (1 of 5) sits on the boundary and survives.
    for i in 0..5 {
        fb_store.record(&feedback("wf-1", i == 0, i)).unwrap();
    }

    Refiner::new(&store, &fb_store).refine_all();
    assert_ne!(store.get("wf-1").unwrap().status, WorkflowStatus::Deprecated);
}

#[test]
fn deprecated_is_terminal_within_a_pass() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    let mut wf = workflow("wf-1", "open downloads", 0.9, 3);
    wf.status = WorkflowStatus::Deprecated;
    store.save(&wf).unwrap();
    for i in 0..6 {
        fb_store.record(&feedback("wf-1", true, i)).unwrap();
    }

    let stats = Refiner::new(&store, &fb_store).refine_all();
    assert_eq!(stats.promoted, 0);
    assert_eq!(store.get("wf-1").unwrap().status, WorkflowStatus::Deprecated);
}

#[test]
fn failing_steps_are_pruned() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    store.save(&workflow("wf-1", "open downloads", 0.5, 4)).unwrap();
    // Step 2 fails in 3 of 3 feedbacks (rate 1.0 >= 0.8). Keep overall
    // success mixed so the workflow itself survives.
    for i in 0..3 {
        let mut fb = feedback("wf-1", i > 0, i);
        fb.failed_step_indices = vec![2];
        fb_store.record(&fb).unwrap();
    }

    let stats = Refiner::new(&store, &fb_store).refine_all();
    assert_eq!(stats.pruned, 1);
    assert_eq!(store.get("wf-1").unwrap().steps.len(), 3);

    // Invariant: after refine_all no surviving workflow has a step whose
    // failure rate crosses the prune bar.
    for wf in store.list_all() {
        if wf.status == WorkflowStatus::Deprecated {
            continue;
        }
        let rates = fb_store.get_step_failure_rates(&wf.workflow_id);
        for (index, rate) in rates {
            assert!(rate < 0.8 || index >= wf.steps.len());
        }
    }
}

#[test]
fn variant_created_from_hint_not_found_pattern() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    let mut original = workflow("wf-1", "open downloads", 0.5, 4);
    original.steps[2].target.role = Some("AXButton".to_string());
    original.steps[2].target.title = Some("Downloads".to_string());
    store.save(&original).unwrap();

    // 5 failing feedbacks, every error naming step 2 / HINT_NOT_FOUND.
    for i in 0..5 {
        let mut fb = feedback("wf-1", false, i);
        fb.failed_step_indices = vec![2];
        fb.error_details = vec![ErrorDetail {
            step_index: 2,
            error_code: "HINT_NOT_FOUND".to_string(),
            error_msg: "element not found".to_string(),
        }];
        fb_store.record(&fb).unwrap();
    }

    let stats = Refiner::new(&store, &fb_store).refine_all();
    assert_eq!(stats.variants, 1);

    let variant = store
        .list_all()
        .into_iter()
        .find(|w| w.parent_id.as_deref() == Some("wf-1"))
        .expect("variant should exist");
    assert!(variant.name.ends_with("_v2"));
    assert_eq!(variant.status, WorkflowStatus::Draft);
    assert_eq!(variant.execution_count, 0);
    // change_to_click_xy cleared the structural target.
    assert!(variant.steps[2].target.role.is_none());
    assert!(variant.steps[2].target.title.is_none());
    // Confidence is 0.8 x the original's post-blend confidence.
    let original_now = store.get("wf-1").unwrap();
    assert!((variant.confidence - original_now.confidence * 0.8).abs() < 1e-9);
}

#[test]
fn variant_generation_caps_at_three() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    let original = workflow("wf-1", "open downloads", 0.5, 4);
    store.save(&original).unwrap();
    for n in 0..3 {
        let mut existing = workflow(&format!("wf-v{n}"), &format!("open downloads_v{}", n + 2), 0.4, 4);
        existing.parent_id = Some("wf-1".to_string());
        store.save(&existing).unwrap();
    }
    for i in 0..5 {
        let mut fb = feedback("wf-1", false, i);
        fb.error_details = vec![ErrorDetail {
            step_index: 1,
            error_code: "HINT_NOT_FOUND".to_string(),
            error_msg: String::new(),
        }];
        fb_store.record(&fb).unwrap();
    }

    let stats = Refiner::new(&store, &fb_store).refine_all();
    assert_eq!(stats.variants, 0);
}

#[test]
fn similar_workflows_merge() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    let mut a = workflow("wf-a", "open github", 0.8, 3);
    a.app_name = "Safari".to_string();
    a.tags = vec!["web".to_string(), "browser".to_string()];
    a.execution_count = 4;
    let mut b = workflow("wf-b", "open githab", 0.6, 2);
    b.app_name = "Safari".to_string();
    b.tags = vec!["web".to_string()];
    b.execution_count = 2;
    store.save(&a).unwrap();
    store.save(&b).unwrap();

    let stats = Refiner::new(&store, &fb_store).refine_all();
    assert_eq!(stats.merged, 1);
    assert_eq!(store.count(), 1);

    // The longer workflow is the base.
    let kept = store.get("wf-a").expect("wf-a has more steps and is kept");
    assert!((kept.confidence - 0.7).abs() < 1e-9);
    assert!(kept.tags.contains(&"web".to_string()));
    assert!(kept.tags.contains(&"browser".to_string()));
    assert_eq!(kept.execution_count, 6);
}

#[test]
fn dissimilar_workflows_do_not_merge() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    let mut a = workflow("wf-a", "open github", 0.8, 3);
    a.app_name = "Safari".to_string();
    a.tags = vec!["web".to_string()];
    let mut b = workflow("wf-b", "compose email", 0.6, 2);
    b.app_name = "Safari".to_string();
    b.tags = vec!["web".to_string()];
    store.save(&a).unwrap();
    store.save(&b).unwrap();

    let stats = Refiner::new(&store, &fb_store).refine_all();
    assert_eq!(stats.merged, 0);
    assert_eq!(store.count(), 2);
}

#[test]
fn select_best_variant_prefers_higher_success_rate() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    store.save(&workflow("wf-1", "open downloads", 0.5, 3)).unwrap();
    let mut variant = workflow("wf-2", "open downloads_v2", 0.4, 3);
    variant.parent_id = Some("wf-1".to_string());
    variant.execution_count = 3;
    store.save(&variant).unwrap();

    // Original: 1/3 success. Variant: 3/3.
    for i in 0..3 {
        fb_store.record(&feedback("wf-1", i == 0, i)).unwrap();
        fb_store.record(&feedback("wf-2", true, 10 + i)).unwrap();
    }

    let refiner = Refiner::new(&store, &fb_store);
    assert_eq!(refiner.select_best_variant("wf-1"), "wf-2");
}

#[test]
fn report_writes_catalog_idempotently() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    store.save(&workflow("wf-1", "open downloads", 0.8, 3)).unwrap();
    let generator = ReportGenerator::new(&store, &fb_store);

    generator.generate(ReportFormat::Markdown, None).unwrap();
    let catalog_path = store.dir().join("parts/catalog.json");
    assert!(catalog_path.exists());

    let first: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&catalog_path).unwrap()).unwrap();
    generator.generate(ReportFormat::Json, None).unwrap();
    let second: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&catalog_path).unwrap()).unwrap();

    // Everything except the update timestamp is stable.
    assert_eq!(first["categories"], second["categories"]);
    assert_eq!(first["stats"], second["stats"]);
    assert_eq!(second["stats"]["total"], 1);
}

#[test]
fn category_filter_restricts_report_but_not_catalog() {
    let dir = TempDir::new().unwrap();
    let (store, fb_store) = stores(&dir);

    let mut dev = workflow("wf-dev", "build project", 0.8, 2);
    dev.app_name = "Terminal".to_string();
    store.save(&dev).unwrap();
    store.save(&workflow("wf-fs", "open downloads", 0.7, 2)).unwrap();

    let generator = ReportGenerator::new(&store, &fb_store);
    let report = generator.generate(ReportFormat::Markdown, Some("開発")).unwrap();
    assert!(report.contains("build project"));
    assert!(!report.contains("open downloads"));

    let catalog: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(store.dir().join("parts/catalog.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(catalog["stats"]["total"], 2);
    assert!(catalog["categories"]["システム操作"].is_object());
}

#[test]
fn workflow_store_round_trip_is_identity() {
    let dir = TempDir::new().unwrap();
    let (store, _) = stores(&dir);

    let mut wf = workflow("wf-1", "open downloads", 0.8, 2);
    wf.tags = vec!["finder".to_string()];
    wf.parent_id = Some("wf-0".to_string());
    store.save(&wf).unwrap();

    assert_eq!(store.get("wf-1").unwrap(), wf);
}
