//! `mimic report` - reproducibility report + parts catalog.

use super::{open_feedback, open_store, workflow_dir};
use mimic_core::{ReportFormat, ReportGenerator};
use std::path::PathBuf;
use std::str::FromStr;

pub fn execute(
    workflow_dir_flag: Option<String>,
    category: Option<String>,
    format: &str,
    output: Option<String>,
) -> anyhow::Result<()> {
    let format = ReportFormat::from_str(format)
        .map_err(|()| anyhow::anyhow!("unknown report format: {format}"))?;

    let dir = workflow_dir(workflow_dir_flag);
    let store = open_store(&dir);
    let feedback = open_feedback(&dir);
    let generator = ReportGenerator::new(&store, &feedback);

    let report = generator.generate(format, category.as_deref())?;

    // Always mirror the rendered report into reports/.
    let reports_dir = dir.join("reports");
    std::fs::create_dir_all(&reports_dir)?;
    let extension = if format == ReportFormat::Json { "json" } else { "md" };
    let report_path = reports_dir
        .join(format!("report_{}.{extension}", chrono::Local::now().format("%Y%m%d")));
    std::fs::write(&report_path, &report)?;

    if let Some(output) = output {
        let output = PathBuf::from(output);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&output, &report)?;
        println!("Report written: {}", output.display());
    } else {
        println!("{report}");
    }
    println!("Catalog refreshed: {}", dir.join("parts/catalog.json").display());
    Ok(())
}
