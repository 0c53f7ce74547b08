//! Recovery pattern learning.
//!
//! `(error_code, app_name, failed_action, recovery_action)` tuples with
//! sample/success counters, persisted together in a single
//! `recovery_patterns.json` file. Lookup falls back from the exact 3-tuple to
//! app-agnostic and finally error-code-only matches, and only ever suggests
//! patterns that cross the sample and success-rate thresholds.

use super::write_json_atomic;
use crate::error::CoreResult;
use crate::model::RecoveryPattern;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Minimum samples before a pattern may be suggested.
const MIN_SAMPLES_FOR_SUGGESTION: u32 = 3;
/// Minimum success rate before a pattern may be suggested.
const MIN_SUCCESS_RATE_FOR_SUGGESTION: f64 = 0.6;

/// Single-file store of learned recovery patterns.
#[derive(Debug)]
pub struct RecoveryStore {
    path: PathBuf,
    patterns: Vec<RecoveryPattern>,
}

impl RecoveryStore {
    /// Opens the store at the given path, loading any existing patterns.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let patterns = load_patterns(&path);
        Self { path, patterns }
    }

    /// Records a recovery outcome, upserting on the 4-tuple key.
    ///
    /// # Errors
    /// Returns a `CoreError` if the pattern file cannot be written.
    pub fn record_recovery(
        &mut self,
        error_code: &str,
        app_name: &str,
        failed_action: &str,
        recovery_action: &str,
        success: bool,
    ) -> CoreResult<()> {
        let existing = self.patterns.iter_mut().find(|p| {
            p.error_code == error_code
                && p.app_name == app_name
                && p.failed_action == failed_action
                && p.recovery_action == recovery_action
        });

        match existing {
            Some(pattern) => {
                pattern.sample_count += 1;
                if success {
                    pattern.success_count += 1;
                }
                pattern.success_rate =
                    f64::from(pattern.success_count) / f64::from(pattern.sample_count);
                info!(
                    error_code,
                    app_name,
                    recovery_action,
                    success_rate = pattern.success_rate,
                    "recovery pattern updated"
                );
            }
            None => {
                self.patterns.push(RecoveryPattern {
                    error_code: error_code.to_string(),
                    app_name: app_name.to_string(),
                    failed_action: failed_action.to_string(),
                    recovery_action: recovery_action.to_string(),
                    sample_count: 1,
                    success_count: u32::from(success),
                    success_rate: if success { 1.0 } else { 0.0 },
                });
                info!(error_code, app_name, recovery_action, "recovery pattern created");
            }
        }

        self.save()
    }

    /// Looks up the best learned recovery with graded fallback.
    ///
    /// Tries the exact `(error_code, app_name, failed_action)` tuple, then
    /// `(error_code, "", failed_action)`, then `(error_code, "", "")`, and
    /// returns the highest-success-rate candidate passing the thresholds.
    pub fn get_learned_recovery(
        &self,
        error_code: &str,
        app_name: &str,
        failed_action: &str,
    ) -> Option<&RecoveryPattern> {
        let search_keys =
            [(error_code, app_name, failed_action), (error_code, "", failed_action), (error_code, "", "")];

        for (ec, an, fa) in search_keys {
            let best = self
                .patterns
                .iter()
                .filter(|p| {
                    p.error_code == ec
                        && p.app_name == an
                        && p.failed_action == fa
                        && p.sample_count >= MIN_SAMPLES_FOR_SUGGESTION
                        && p.success_rate >= MIN_SUCCESS_RATE_FOR_SUGGESTION
                })
                .max_by(|a, b| {
                    a.success_rate.partial_cmp(&b.success_rate).unwrap_or(std::cmp::Ordering::Equal)
                });
            if best.is_some() {
                return best;
            }
        }
        None
    }

    /// All patterns passing the thresholds, sorted by success rate descending.
    pub fn get_reliable_patterns(&self) -> Vec<&RecoveryPattern> {
        let mut reliable: Vec<&RecoveryPattern> = self
            .patterns
            .iter()
            .filter(|p| {
                p.sample_count >= MIN_SAMPLES_FOR_SUGGESTION
                    && p.success_rate >= MIN_SUCCESS_RATE_FOR_SUGGESTION
            })
            .collect();
        reliable.sort_by(|a, b| {
            b.success_rate.partial_cmp(&a.success_rate).unwrap_or(std::cmp::Ordering::Equal)
        });
        reliable
    }

    fn save(&self) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_json_atomic(&self.path, &self.patterns)
    }
}

fn load_patterns(path: &Path) -> Vec<RecoveryPattern> {
    if !path.exists() {
        return Vec::new();
    }
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<Vec<RecoveryPattern>>(&bytes) {
            Ok(patterns) => patterns,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "malformed recovery pattern file");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(file = %path.display(), error = %e, "failed to read recovery pattern file");
            Vec::new()
        }
    }
}
