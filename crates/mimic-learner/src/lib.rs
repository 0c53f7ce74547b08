//! Learning pipeline for Mimic.
//!
//! Watches the capture directory the external event tap writes into, slices
//! records into segments, extracts workflows through the oracle, and runs the
//! resource-bounded continuous-learning daemon with its refinement, report,
//! and cleanup cadences.

pub mod cleanup;
pub mod daemon;
pub mod extract;
pub mod guard;
pub mod segment;
pub mod watcher;

pub use cleanup::CleanupSweeper;
pub use daemon::ContinuousLearner;
pub use extract::{segment_transcript, IncrementalOutcome, WorkflowExtractor};
pub use guard::{ResourceGuard, ResourceStats};
pub use segment::{segment_records, Segmenter};
pub use watcher::CaptureWatcher;
