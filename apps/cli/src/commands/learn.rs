//! `mimic learn` - extract workflows from capture history.

use super::{build_oracle, exit_for, workflow_dir};
use mimic_core::EngineConfig;
use mimic_learner::WorkflowExtractor;
use std::path::PathBuf;

pub async fn execute(
    json_dir: Option<String>,
    workflow_dir_flag: Option<String>,
    model: Option<String>,
    min_confidence: f64,
    segments_only: bool,
) -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    let json_dir = json_dir.map_or_else(|| config.capture_dir.clone(), PathBuf::from);
    let workflow_dir = workflow_dir(workflow_dir_flag);
    let model = model.unwrap_or_else(|| config.model.clone());

    println!("Learning from: {}", json_dir.display());
    println!("Storing into:  {}", workflow_dir.display());

    // Segmentation alone never talks to the oracle, so its key is only
    // required on the extraction path.
    let oracle = if segments_only {
        build_oracle("mock", &model)
    } else {
        build_oracle(&config.provider, &model)
    };
    let extractor =
        match WorkflowExtractor::new(&json_dir, &workflow_dir, oracle, min_confidence) {
            Ok(extractor) => extractor,
            Err(e) => exit_for(&e),
        };

    if segments_only {
        let segments = match extractor.build_segments() {
            Ok(segments) => segments,
            Err(e) => exit_for(&e),
        };
        println!("\nSegments: {}", segments.len());
        for (i, segment) in segments.iter().enumerate() {
            println!(
                "  [{}] {} ({} actions) {} ~ {}",
                i + 1,
                segment.app_name,
                segment.steps.len(),
                segment.start_time,
                segment.end_time
            );
        }
        return Ok(());
    }

    let workflows = match extractor.extract_all().await {
        Ok(workflows) => workflows,
        Err(e) => exit_for(&e),
    };

    println!("\nExtracted: {} workflows", workflows.len());
    for workflow in &workflows {
        println!(
            "  - {} (confidence: {:.2}, {} steps)",
            workflow.name,
            workflow.confidence,
            workflow.steps.len()
        );
    }
    Ok(())
}
