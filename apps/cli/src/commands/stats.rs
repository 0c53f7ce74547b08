//! `mimic stats` - cross-session learning statistics.

use super::{open_feedback, open_store, workflow_dir};
use mimic_core::{EngineConfig, MetaAnalyzer, Priority, RecoveryStore};
use mimic_learner::watcher::AGENT_PROCESSED_LOG;

pub fn execute(workflow_dir_flag: Option<String>, days: i64) -> anyhow::Result<()> {
    let dir = workflow_dir(workflow_dir_flag);
    let store = open_store(&dir);
    let feedback = open_feedback(&dir);
    let analyzer = MetaAnalyzer::new(&store, &feedback);

    let report = analyzer.generate_report(days);

    println!("=== Learning statistics (last {days} days) ===\n");
    let total_workflows: usize = report.status_distribution.values().sum();
    println!("Workflows: {total_workflows}");
    for status in ["draft", "tested", "active", "deprecated"] {
        println!("  {status}: {}", report.status_distribution.get(status).copied().unwrap_or(0));
    }
    println!("\nFeedbacks: {}", report.total_feedbacks);
    println!("Overall success rate: {:.1}%", report.overall_success_rate * 100.0);

    if !report.app_stats.is_empty() {
        println!("\n--- Per-app statistics ---");
        for (app, stats) in &report.app_stats {
            println!(
                "  {app}: {} runs, {:.0}% success, {:.1}s avg",
                stats.count,
                stats.success_rate * 100.0,
                stats.avg_duration
            );
        }
    }

    if !report.top_used.is_empty() {
        println!("\n--- Most used workflows (top 5) ---");
        for item in &report.top_used {
            println!(
                "  {}: {} runs, {:.0}% success",
                item.name,
                item.execution_count.unwrap_or(0),
                item.success_rate * 100.0
            );
        }
    }

    if !report.top_failures.is_empty() {
        println!("\n--- Most failing workflows (top 5) ---");
        for item in &report.top_failures {
            println!(
                "  {}: {} failures, {:.0}% success",
                item.name,
                item.failure_count.unwrap_or(0),
                item.success_rate * 100.0
            );
        }
    }

    if !report.suggestions.is_empty() {
        println!("\n--- Suggestions ({}) ---", report.suggestions.len());
        for suggestion in &report.suggestions {
            let marker = match suggestion.priority {
                Priority::High => "!!!",
                Priority::Medium => "!!",
                Priority::Low => "!",
            };
            let auto = if suggestion.auto_applicable { " [auto-applicable]" } else { "" };
            println!("  [{marker}] {}: {}{auto}", suggestion.name, suggestion.suggestion);
        }
    }

    // Processed-capture count, when the log exists.
    let processed_log = EngineConfig::from_env().capture_dir.join(AGENT_PROCESSED_LOG);
    if let Ok(text) = std::fs::read_to_string(&processed_log) {
        let count = text.lines().filter(|l| !l.trim().is_empty()).count();
        println!("\nProcessed captures: {count}");
    }

    // Reliable recovery patterns.
    let recovery = RecoveryStore::new(dir.join("recovery_patterns.json"));
    let reliable = recovery.get_reliable_patterns();
    if !reliable.is_empty() {
        println!("\n--- Learned recovery patterns ({}) ---", reliable.len());
        for pattern in reliable.iter().take(5) {
            let app = if pattern.app_name.is_empty() { "*" } else { &pattern.app_name };
            println!(
                "  {}@{} → {} ({:.0}% over {} samples)",
                pattern.error_code,
                app,
                pattern.recovery_action,
                pattern.success_rate * 100.0,
                pattern.sample_count
            );
        }
    }

    Ok(())
}
