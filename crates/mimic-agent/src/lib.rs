//! Execution side of Mimic: observing the desktop, selecting actions,
//! playing them through the UI probe, verifying outcomes, and the autonomous
//! loop that ties it all together.

pub mod autonomous;
pub mod executor;
pub mod observer;
pub mod probe;
pub mod selector;
pub mod verifier;

use thiserror::Error;

pub use autonomous::{
    AutoConfirm, AutonomousLoop, Confirmer, ExecutionContext, ExecutionResult, StepOutcome,
    StepResultKind,
};
pub use executor::{StepExecutor, StepPlayback};
pub use observer::{DesktopState, NullObserver, Observer, PositionInfo, VisibleElement};
pub use probe::{ElementHit, MatchMethod, MockProbe, MouseButton, NoopProbe, UiProbe};
pub use selector::{ActionSelector, HistoryEntry};
pub use verifier::{ExecutionVerifier, StepVerification};

/// Errors surfaced by platform capabilities (probe, observer).
#[derive(Debug, Error)]
pub enum AgentError {
    /// The UI probe reported a failure.
    #[error("probe error: {0}")]
    Probe(String),

    /// The observer reported a failure.
    #[error("observer error: {0}")]
    Observer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
