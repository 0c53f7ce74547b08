//! `mimic play` - direct workflow replay.

use super::{build_oracle, exit_for};
use mimic_agent::{AutoConfirm, AutonomousLoop, NoopProbe, NullObserver};
use mimic_core::EngineConfig;
use std::collections::HashMap;
use std::sync::Arc;

pub async fn execute(
    workflow_id: String,
    dry_run: bool,
    delay: f64,
    params: Vec<String>,
) -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    let oracle = build_oracle(&config.provider, &config.model);

    println!("Replaying: {workflow_id}");
    println!("Dry-run:   {dry_run}\n");

    let mut parameters = HashMap::new();
    for param in params {
        let (key, value) = param.split_once('=').unwrap_or((param.as_str(), ""));
        parameters.insert(key.to_string(), value.to_string());
    }

    let agent = match AutonomousLoop::new(
        config,
        oracle,
        Arc::new(NoopProbe),
        Arc::new(NullObserver),
        Arc::new(AutoConfirm),
    ) {
        Ok(agent) => agent,
        Err(e) => exit_for(&e),
    };

    let result = agent
        .play_workflow(
            &workflow_id,
            dry_run,
            delay,
            if parameters.is_empty() { None } else { Some(parameters) },
        )
        .await;
    super::run::print_result(&result);
    Ok(())
}
