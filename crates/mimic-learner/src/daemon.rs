//! Continuous learner daemon.
//!
//! Endless poll loop: scan for new captures, extract and dedup-save
//! workflows, refine on a cycle cadence, regenerate the report and catalog
//! daily, and sweep aged capture artifacts. The loop never sleeps more than
//! one second without sampling the running flag, so shutdown is prompt.

use crate::cleanup::{CleanupSweeper, RETENTION_SECS};
use crate::extract::WorkflowExtractor;
use crate::guard::ResourceGuard;
use mimic_core::config::PipelineConfig;
use mimic_core::error::CoreResult;
use mimic_core::refine::Refiner;
use mimic_core::report::{ReportFormat, ReportGenerator};
use mimic_core::store::{FeedbackStore, WorkflowStore};
use mimic_oracle::Oracle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Refinement cadence, in cycles.
const REFINE_INTERVAL_CYCLES: u64 = 10;
/// Report/catalog cadence, in seconds.
const REPORT_INTERVAL: Duration = Duration::from_secs(86_400);
/// Aged-file sweep cadence, in seconds.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// Background learning daemon composing ingest, extraction, refinement,
/// reporting, and cleanup.
pub struct ContinuousLearner {
    config: PipelineConfig,
    extractor: WorkflowExtractor,
    guard: ResourceGuard,
    sweeper: CleanupSweeper,
    running: Arc<AtomicBool>,
    cycle_count: u64,
    last_report: Option<Instant>,
    last_cleanup: Option<Instant>,
}

impl ContinuousLearner {
    /// Creates a daemon over the configured directories.
    ///
    /// # Errors
    /// Fails fast when the watch directory is unreadable or the workflow
    /// directory is unwritable.
    pub fn new(config: PipelineConfig, oracle: Oracle) -> CoreResult<Self> {
        let extractor = WorkflowExtractor::new(
            &config.watch_dir,
            &config.workflow_dir,
            oracle,
            config.min_confidence,
        )?
        .with_segmentation(config.session_gap_secs, config.session_max_records);

        let guard = ResourceGuard::new(config.cpu_limit_percent, config.mem_limit_mb);
        let sweeper = CleanupSweeper::new(&config.watch_dir);

        Ok(Self {
            extractor,
            guard,
            sweeper,
            config,
            running: Arc::new(AtomicBool::new(false)),
            cycle_count: 0,
            last_report: None,
            last_cleanup: None,
        })
    }

    /// A handle the caller can flip to stop the loop from another task.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Requests a stop; the loop exits within a second.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs the endless loop until stopped.
    pub async fn run(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        self.guard.setup_low_priority();
        info!(
            watch_dir = %self.config.watch_dir.display(),
            poll_secs = self.config.poll_secs,
            "continuous learning started"
        );

        while self.running.load(Ordering::SeqCst) {
            self.run_once().await;
            for _ in 0..self.config.poll_secs {
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        info!("continuous learning stopped");
    }

    /// Runs one cycle. Returns the number of new workflows.
    pub async fn run_once(&mut self) -> usize {
        self.guard.check_and_throttle().await;

        let count = match self.extractor.extract_incremental_detailed().await {
            Ok(outcome) => {
                for segment in &outcome.segments {
                    self.sweeper.cleanup_session(segment);
                }
                outcome.workflows.len()
            }
            Err(e) => {
                warn!(error = %e, "incremental extraction failed");
                0
            }
        };
        if count > 0 {
            info!(count, "new workflows learned");
        }

        self.cycle_count += 1;
        if self.cycle_count % REFINE_INTERVAL_CYCLES == 0 {
            self.refine_cycle();
        }

        if self.last_report.is_none_or(|t| t.elapsed() >= REPORT_INTERVAL) {
            self.report_cycle();
            self.last_report = Some(Instant::now());
        }

        if self.last_cleanup.is_none_or(|t| t.elapsed() >= CLEANUP_INTERVAL) {
            let deleted = self.sweeper.cleanup_old_files(RETENTION_SECS);
            if !deleted.is_empty() {
                info!(count = deleted.len(), "aged capture files deleted");
            }
            self.last_cleanup = Some(Instant::now());
        }

        count
    }

    fn refine_cycle(&self) {
        match self.open_stores() {
            Ok((store, feedback)) => {
                let stats = Refiner::new(&store, &feedback).refine_all();
                info!(?stats, "refinement cycle complete");
            }
            Err(e) => warn!(error = %e, "refinement cycle failed"),
        }
    }

    fn report_cycle(&self) {
        let result = self.open_stores().and_then(|(store, feedback)| {
            let generator = ReportGenerator::new(&store, &feedback);
            let report = generator.generate(ReportFormat::Markdown, None)?;

            let reports_dir = self.config.workflow_dir.join("reports");
            std::fs::create_dir_all(&reports_dir)?;
            let path = reports_dir
                .join(format!("report_{}.md", chrono::Local::now().format("%Y%m%d")));
            std::fs::write(&path, report)?;
            info!(path = %path.display(), "daily report refreshed");
            Ok(())
        });
        if let Err(e) = result {
            warn!(error = %e, "report cycle failed");
        }
    }

    fn open_stores(&self) -> CoreResult<(WorkflowStore, FeedbackStore)> {
        let store = WorkflowStore::new(&self.config.workflow_dir)?;
        let feedback = FeedbackStore::new(self.config.workflow_dir.join("feedback"))?;
        Ok((store, feedback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_oracle::MockOracle;
    use std::sync::Arc as StdArc;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            watch_dir: dir.path().join("screenshots"),
            workflow_dir: dir.path().join("workflows"),
            poll_secs: 1,
            ..PipelineConfig::default()
        }
    }

    fn oracle_accepting() -> Oracle {
        Oracle::new(StdArc::new(MockOracle::always(
            "mock",
            r#"{"name": "Open downloads", "description": "d", "tags": ["finder"],
                "parameters": [], "confidence": 0.8, "is_workflow": true}"#,
        )))
    }

    #[tokio::test]
    async fn test_run_once_empty_dir() {
        let dir = TempDir::new().unwrap();
        let mut learner = ContinuousLearner::new(config_in(&dir), oracle_accepting()).unwrap();
        assert_eq!(learner.run_once().await, 0);
    }

    #[tokio::test]
    async fn test_run_once_learns_and_cleans_session() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        std::fs::create_dir_all(&config.watch_dir).unwrap();
        let capture = config.watch_dir.join("cap_001.json");
        std::fs::write(
            &capture,
            r#"{"capture_id": "c1", "timestamp": "2026-02-17T12:00:00",
                "app": {"name": "Finder", "bundle_id": "com.apple.finder"},
                "user_action": {"type": "click", "x": 1.0, "y": 2.0}}"#,
        )
        .unwrap();

        let mut learner = ContinuousLearner::new(config.clone(), oracle_accepting()).unwrap();
        assert_eq!(learner.run_once().await, 1);

        // The session's capture file is deleted after processing.
        assert!(!capture.exists());
        // The first cycle also refreshed the report and catalog.
        assert!(config.workflow_dir.join("parts/catalog.json").exists());

        // Second cycle: nothing new.
        assert_eq!(learner.run_once().await, 0);
    }

    #[tokio::test]
    async fn test_stop_flag_breaks_loop() {
        let dir = TempDir::new().unwrap();
        let mut learner = ContinuousLearner::new(config_in(&dir), oracle_accepting()).unwrap();
        let handle = learner.shutdown_handle();

        let loop_task = async {
            learner.run().await;
        };
        let stop_task = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.store(false, Ordering::SeqCst);
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(loop_task, stop_task);
        })
        .await
        .expect("loop should stop promptly");
    }
}
