//! Subcommand implementations.
//!
//! Shared helpers translate the three fatal startup conditions into their
//! distinct exit codes: 2 when the oracle key is missing but the oracle is
//! actually needed, 3 when the watch directory is unreadable, 4 when the
//! store directory is unwritable. Everything else is non-fatal and handled
//! inside the components.

pub mod learn;
pub mod list;
pub mod play;
pub mod report;
pub mod run;
pub mod stats;
pub mod watch;

use mimic_core::error::CoreError;
use mimic_core::store::{FeedbackStore, WorkflowStore};
use mimic_oracle::{Oracle, OracleFactory};
use std::path::{Path, PathBuf};
use tracing::error;

/// Exit code: oracle environment variable missing when the oracle is invoked.
pub const EXIT_ORACLE_ENV: i32 = 2;
/// Exit code: watch directory unreadable at startup.
pub const EXIT_WATCH_DIR: i32 = 3;
/// Exit code: store directory unwritable at startup.
pub const EXIT_STORE_DIR: i32 = 4;

/// Resolves the workflow directory from a flag or the environment config.
pub fn workflow_dir(flag: Option<String>) -> PathBuf {
    flag.map_or_else(|| mimic_core::EngineConfig::from_env().workflow_dir, PathBuf::from)
}

/// Opens the workflow store or terminates with the store exit code.
pub fn open_store(dir: &Path) -> WorkflowStore {
    match WorkflowStore::new(dir) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "cannot open workflow store");
            std::process::exit(EXIT_STORE_DIR);
        }
    }
}

/// Opens the feedback store under `<workflow_dir>/feedback` or terminates.
pub fn open_feedback(dir: &Path) -> FeedbackStore {
    match FeedbackStore::new(dir.join("feedback")) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "cannot open feedback store");
            std::process::exit(EXIT_STORE_DIR);
        }
    }
}

/// Builds the oracle or terminates with the oracle exit code.
pub fn build_oracle(provider: &str, model: &str) -> Oracle {
    match OracleFactory::create_from_str(provider, model.to_string()) {
        Ok(provider) => Oracle::new(provider),
        Err(e) => {
            error!(error = %e, "cannot create oracle");
            std::process::exit(EXIT_ORACLE_ENV);
        }
    }
}

/// Maps a startup error from the learner onto the right exit code.
pub fn exit_for(e: &CoreError) -> ! {
    let code = match e {
        CoreError::WatchDirUnreadable(_) => EXIT_WATCH_DIR,
        CoreError::StoreDirUnwritable(_) => EXIT_STORE_DIR,
        _ => 1,
    };
    error!(error = %e, "fatal");
    std::process::exit(code);
}
