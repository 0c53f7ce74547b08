//! AI-backed execution verification.
//!
//! Compares before/after screenshots against an expected change, and checks
//! goal achievement. When verification cannot run (dry-run, missing
//! screenshot, unreachable oracle), the result carries `verified=false` and
//! the caller MUST keep the executor's own success flag; the verifier never
//! fabricates success.

use crate::observer::DesktopState;
use crate::selector::HistoryEntry;
use mimic_abstraction::GoalCheck;
use mimic_oracle::Oracle;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// The outcome of one step verification.
#[derive(Debug, Clone, Serialize)]
pub struct StepVerification {
    /// The oracle's verdict. Only meaningful when `verified` is true.
    pub success: bool,
    /// The oracle's confidence in its verdict.
    pub confidence: f64,
    /// Whether verification actually ran. When false, this is "no signal".
    pub verified: bool,
    /// Why the verifier judged (or declined to judge) as it did.
    pub reasoning: String,
}

impl StepVerification {
    fn unverified(reasoning: impl Into<String>) -> Self {
        Self { success: false, confidence: 0.0, verified: false, reasoning: reasoning.into() }
    }
}

/// Verifies step outcomes and goal achievement through the oracle.
pub struct ExecutionVerifier {
    oracle: Oracle,
}

impl ExecutionVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(oracle: Oracle) -> Self {
        Self { oracle }
    }

    /// Compares before/after screenshots against the expected change.
    pub async fn verify_step(
        &self,
        before_screenshot: Option<&str>,
        after_screenshot: Option<&str>,
        expected_change: &str,
        dry_run: bool,
    ) -> StepVerification {
        if dry_run {
            return StepVerification::unverified("dry-run: verification skipped");
        }

        let (Some(before), Some(after)) = (before_screenshot, after_screenshot) else {
            info!("no screenshots, verification skipped");
            return StepVerification::unverified("no screenshots: cannot verify");
        };

        match self
            .oracle
            .verify_execution(Path::new(before), Path::new(after), expected_change)
            .await
        {
            Some(outcome) => StepVerification {
                success: outcome.success,
                confidence: if outcome.success { 1.0 } else { 0.0 },
                verified: true,
                reasoning: outcome.reasoning,
            },
            None => StepVerification::unverified("oracle unavailable: cannot verify"),
        }
    }

    /// Judges whether the goal has been achieved.
    pub async fn check_goal(
        &self,
        goal: &str,
        state: &DesktopState,
        history: &[HistoryEntry],
    ) -> GoalCheck {
        let history_text = history
            .iter()
            .map(|h| format!("Step {}: {} → {}", h.step, h.action, h.result))
            .collect::<Vec<_>>()
            .join("\n");
        self.oracle.check_goal_achieved(goal, &state.to_json(), &history_text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_oracle::MockOracle;
    use std::sync::Arc;

    fn verifier_with(mock: MockOracle) -> ExecutionVerifier {
        ExecutionVerifier::new(Oracle::new(Arc::new(mock)))
    }

    #[tokio::test]
    async fn test_dry_run_is_unverified() {
        let verifier = verifier_with(MockOracle::always("mock", "{\"success\": true}"));
        let result = verifier
            .verify_step(Some("/tmp/a.png"), Some("/tmp/b.png"), "dialog opens", true)
            .await;
        assert!(!result.verified);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_missing_screenshots_unverified() {
        let verifier = verifier_with(MockOracle::always("mock", "{\"success\": true}"));
        let result = verifier.verify_step(None, Some("/tmp/b.png"), "change", false).await;
        assert!(!result.verified);
    }

    #[tokio::test]
    async fn test_verified_success_from_oracle() {
        let dir = tempfile::TempDir::new().unwrap();
        let before = dir.path().join("before.png");
        let after = dir.path().join("after.png");
        std::fs::write(&before, "png").unwrap();
        std::fs::write(&after, "png").unwrap();

        let mock = MockOracle::new("mock");
        mock.push_response(r#"{"success": true, "reasoning": "dialog appeared"}"#);
        let verifier = verifier_with(mock);

        let result = verifier
            .verify_step(
                Some(before.to_str().unwrap()),
                Some(after.to_str().unwrap()),
                "dialog opens",
                false,
            )
            .await;
        assert!(result.verified);
        assert!(result.success);
        assert_eq!(result.reasoning, "dialog appeared");
    }

    #[tokio::test]
    async fn test_check_goal_delegates() {
        let mock = MockOracle::new("mock");
        mock.push_response(r#"{"achieved": true, "confidence": 0.9, "reasoning": "done"}"#);
        let verifier = verifier_with(mock);

        let check = verifier
            .check_goal("open folder", &DesktopState::default(), &[])
            .await;
        assert!(check.achieved);
        assert_eq!(check.confidence, 0.9);
    }
}
