//! Core domain of the Mimic learning and replay engine.
//!
//! Holds the data model (capture records, action steps, workflows, feedback,
//! recovery patterns), the file-backed stores, the feedback-driven refiner,
//! the reproducibility scorer and report generator, the cross-session
//! analyzer, and environment-driven configuration.

pub mod analyze;
pub mod config;
pub mod error;
pub mod model;
pub mod refine;
pub mod report;
pub mod store;

pub use analyze::{AnalysisReport, MetaAnalyzer, Priority, Suggestion};
pub use config::{EngineConfig, PipelineConfig};
pub use error::{CoreError, CoreResult};
pub use model::{
    ActionKind, ActionStep, AppInfo, CaptureRecord, ErrorDetail, ExecutionFeedback,
    ExecutionMode, RecoveryPattern, Segment, Workflow, WorkflowParameter, WorkflowStatus,
};
pub use refine::{RefineStats, Refiner};
pub use report::{classify_category, Rank, ReportFormat, ReportGenerator, Reproducibility};
pub use store::{FeedbackStore, RecoveryStore, WorkflowStore};
