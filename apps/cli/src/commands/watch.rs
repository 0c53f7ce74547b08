//! `mimic watch` - continuous learning daemon.

use super::{build_oracle, exit_for};
use mimic_core::PipelineConfig;
use mimic_learner::ContinuousLearner;
use std::sync::atomic::Ordering;

pub async fn execute(background: bool) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    let oracle = build_oracle(&config.ai_provider, &config.ai_model);

    println!("Continuous learning started");
    println!("  watching:      {}", config.watch_dir.display());
    println!("  poll interval: {}s", config.poll_secs);
    println!("  stop with:     Ctrl+C\n");

    let mut learner = match ContinuousLearner::new(config, oracle) {
        Ok(learner) => learner,
        Err(e) => exit_for(&e),
    };
    let shutdown = learner.shutdown_handle();

    if background {
        let handle = tokio::spawn(async move {
            learner.run().await;
        });
        println!("[background] learning in a background task");
        tokio::signal::ctrl_c().await?;
        shutdown.store(false, Ordering::SeqCst);
        handle.await?;
    } else {
        tokio::select! {
            () = learner.run() => {}
            result = tokio::signal::ctrl_c() => {
                result?;
                shutdown.store(false, Ordering::SeqCst);
            }
        }
    }

    println!("\nStopped");
    Ok(())
}
