//! `mimic run` - goal-driven autonomous execution.

use super::build_oracle;
use async_trait::async_trait;
use mimic_agent::{
    AutonomousLoop, Confirmer, ExecutionContext, ExecutionResult, NoopProbe, NullObserver,
};
use mimic_core::EngineConfig;
use std::io::Write;
use std::sync::Arc;

/// Confirms dangerous actions interactively on stdin.
struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        println!("\n⚠️  {prompt}");
        print!("Proceed? (y/N): ");
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("y")
    }
}

pub async fn execute(
    goal: String,
    workflow_id: Option<String>,
    dry_run: bool,
    max_steps: usize,
    delay: f64,
    no_confirm: bool,
) -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    let oracle = build_oracle(&config.provider, &config.model);

    println!("Goal:      {goal}");
    println!("Dry-run:   {dry_run}");
    println!("Max steps: {max_steps}\n");

    let ctx = ExecutionContext {
        workflow_id,
        dry_run,
        max_steps,
        step_delay_secs: delay,
        confirm_dangerous: !no_confirm,
        ..ExecutionContext::new(goal)
    };

    let agent = match AutonomousLoop::new(
        config,
        oracle,
        Arc::new(NoopProbe),
        Arc::new(NullObserver),
        Arc::new(StdinConfirmer),
    ) {
        Ok(agent) => agent,
        Err(e) => super::exit_for(&e),
    };

    let result = agent.run(ctx).await;
    print_result(&result);
    Ok(())
}

pub fn print_result(result: &ExecutionResult) {
    println!("\n{}", "=".repeat(50));
    println!("Result:        {}", if result.success { "success" } else { "failed" });
    println!("Steps:         {}", result.steps_executed);
    println!("  succeeded:   {}", result.steps_succeeded);
    println!("  failed:      {}", result.steps_failed);
    println!("Goal achieved: {}", if result.goal_achieved { "yes" } else { "no" });
    println!("Elapsed:       {:.1}s", result.total_time_seconds);
    if let Some(error) = &result.error {
        println!("Error:         {error}");
    }
    println!("{}", "=".repeat(50));
}
