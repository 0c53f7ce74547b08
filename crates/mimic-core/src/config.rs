//! Engine and pipeline configuration, loaded from the environment.
//!
//! Defaults allow everything except oracle calls to run without any
//! environment at all; the `PIPELINE_*` knobs and `AI_PROVIDER` override
//! them.

use std::env;
use std::path::PathBuf;

/// Default list of send-capable applications that require confirmation.
const DANGEROUS_APPS: [&str; 11] = [
    "Mail", "メール", "Slack", "Discord", "Messages", "メッセージ", "LINE", "Telegram",
    "WhatsApp", "Teams", "Zoom",
];

/// Configuration for the execution side (selector, verifier, loop).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Oracle provider name ("openai", "gemini", "mock").
    pub provider: String,
    /// Oracle model ID.
    pub model: String,
    /// Directory holding workflow documents and their satellite stores.
    pub workflow_dir: PathBuf,
    /// Directory the event tap writes capture records into.
    pub capture_dir: PathBuf,
    /// Maximum steps per free-exploration run.
    pub max_steps: usize,
    /// Consecutive-failure abort threshold.
    pub max_consecutive_failures: usize,
    /// Pause between steps, in seconds.
    pub step_delay_secs: f64,
    /// Whether dangerous-app actions require confirmation.
    pub confirm_dangerous: bool,
    /// Apps whose actions require confirmation (matched case-insensitively).
    pub dangerous_apps: Vec<String>,
    /// Minimum oracle confidence for extracted workflows.
    pub min_confidence: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-5".to_string(),
            workflow_dir: PathBuf::from("./workflows"),
            capture_dir: PathBuf::from("./screenshots"),
            max_steps: 50,
            max_consecutive_failures: 5,
            step_delay_secs: 1.0,
            confirm_dangerous: true,
            dangerous_apps: DANGEROUS_APPS.iter().map(|s| (*s).to_string()).collect(),
            min_confidence: 0.5,
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            provider: env_string("AI_PROVIDER", &defaults.provider),
            model: env_string("PIPELINE_AI_MODEL", &defaults.model),
            workflow_dir: env_path("PIPELINE_SKILLS_DIR", &defaults.workflow_dir),
            capture_dir: env_path("PIPELINE_WATCH_DIR", &defaults.capture_dir),
            min_confidence: env_parse("PIPELINE_MIN_CONFIDENCE", defaults.min_confidence),
            ..defaults
        }
    }

    /// Whether the app is on the sensitivity list (case-insensitive containment).
    pub fn is_dangerous_app(&self, app_name: &str) -> bool {
        if app_name.is_empty() {
            return false;
        }
        let lower = app_name.to_lowercase();
        self.dangerous_apps.iter().any(|d| lower.contains(&d.to_lowercase()))
    }
}

/// Configuration for the continuous-learning daemon.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory the event tap writes capture records into.
    pub watch_dir: PathBuf,
    /// Directory holding workflow documents.
    pub workflow_dir: PathBuf,
    /// Session split: temporal gap in seconds.
    pub session_gap_secs: i64,
    /// Session split: maximum records per segment.
    pub session_max_records: usize,
    /// Oracle provider name.
    pub ai_provider: String,
    /// Oracle model ID.
    pub ai_model: String,
    /// CPU throttle threshold in percent.
    pub cpu_limit_percent: f32,
    /// RSS throttle threshold in megabytes.
    pub mem_limit_mb: u64,
    /// Poll interval in seconds.
    pub poll_secs: u64,
    /// Minimum oracle confidence for extracted workflows.
    pub min_confidence: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("./screenshots"),
            workflow_dir: PathBuf::from("./workflows"),
            session_gap_secs: 300,
            session_max_records: 50,
            ai_provider: "gemini".to_string(),
            ai_model: "gemini-2.0-flash".to_string(),
            cpu_limit_percent: 30.0,
            mem_limit_mb: 500,
            poll_secs: 30,
            min_confidence: 0.6,
        }
    }
}

impl PipelineConfig {
    /// Loads the configuration from the `PIPELINE_*` environment knobs.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            watch_dir: env_path("PIPELINE_WATCH_DIR", &defaults.watch_dir),
            workflow_dir: env_path("PIPELINE_SKILLS_DIR", &defaults.workflow_dir),
            session_gap_secs: env_parse("PIPELINE_SESSION_GAP", defaults.session_gap_secs),
            session_max_records: env_parse("PIPELINE_SESSION_MAX", defaults.session_max_records),
            ai_provider: env_string("PIPELINE_AI_PROVIDER", &defaults.ai_provider),
            ai_model: env_string("PIPELINE_AI_MODEL", &defaults.ai_model),
            cpu_limit_percent: env_parse("PIPELINE_CPU_LIMIT", defaults.cpu_limit_percent),
            mem_limit_mb: env_parse("PIPELINE_MEM_LIMIT", defaults.mem_limit_mb),
            poll_secs: env_parse("PIPELINE_POLL_SEC", defaults.poll_secs),
            min_confidence: env_parse("PIPELINE_MIN_CONFIDENCE", defaults.min_confidence),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &PathBuf) -> PathBuf {
    env::var(key).map_or_else(|_| default.clone(), PathBuf::from)
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangerous_app_matching() {
        let config = EngineConfig::default();
        assert!(config.is_dangerous_app("Mail"));
        assert!(config.is_dangerous_app("mail"));
        assert!(config.is_dangerous_app("Slack Helper"));
        assert!(!config.is_dangerous_app("Finder"));
        assert!(!config.is_dangerous_app(""));
    }

    #[test]
    fn test_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.max_steps, 50);
        assert_eq!(engine.max_consecutive_failures, 5);
        assert_eq!(engine.min_confidence, 0.5);

        let pipeline = PipelineConfig::default();
        assert_eq!(pipeline.session_gap_secs, 300);
        assert_eq!(pipeline.session_max_records, 50);
        assert_eq!(pipeline.poll_secs, 30);
        assert_eq!(pipeline.mem_limit_mb, 500);
    }
}
