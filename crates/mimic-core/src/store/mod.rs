//! File-backed stores for workflows, feedback, and recovery patterns.
//!
//! Each store exclusively owns its files; callers serialize writes by
//! funnelling all mutations through a single store instance. Writes are
//! whole-file with an atomic rename.

mod feedback;
mod recovery;
mod workflow;

pub use feedback::FeedbackStore;
pub use recovery::RecoveryStore;
pub use workflow::WorkflowStore;

use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use std::path::Path;

/// Writes a document as pretty JSON via a temp file + rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, document: &T) -> CoreResult<()> {
    let json = serde_json::to_vec_pretty(document)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Ensures a store directory exists and is writable.
pub(crate) fn ensure_store_dir(dir: &Path) -> CoreResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| CoreError::StoreDirUnwritable(format!("{}: {e}", dir.display())))?;
    let probe = dir.join(".write_probe");
    std::fs::write(&probe, b"")
        .map_err(|e| CoreError::StoreDirUnwritable(format!("{}: {e}", dir.display())))?;
    std::fs::remove_file(&probe).ok();
    Ok(())
}
