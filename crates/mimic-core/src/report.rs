//! Reproducibility scoring, categorization, and report/catalog emission.
//!
//! Each workflow receives a reproducibility score in [0, 1] mapped onto
//! A/B/C ranks, is assigned a business category by rule, and lands in the
//! rendered report and the `parts/catalog.json` index. Scoring is entirely
//! local; no oracle calls are made.

use crate::error::CoreResult;
use crate::model::{ActionKind, ActionStep, Workflow};
use crate::store::{FeedbackStore, WorkflowStore};
use chrono::Local;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

/// Accessibility-compatibility table for known applications.
const AX_COMPATIBILITY: [(&str, f64); 19] = [
    ("Finder", 0.95),
    ("Safari", 0.90),
    ("Google Chrome", 0.85),
    ("Firefox", 0.85),
    ("Arc", 0.80),
    ("Cursor", 0.80),
    ("Code", 0.80),
    ("Visual Studio Code", 0.80),
    ("Terminal", 0.75),
    ("iTerm2", 0.75),
    ("Ghostty", 0.60),
    ("Notion", 0.70),
    ("Slack", 0.65),
    ("Discord", 0.40),
    ("LINE", 0.50),
    ("Messages", 0.70),
    ("Mail", 0.80),
    ("System Preferences", 0.90),
    ("System Settings", 0.90),
];

struct CategoryRule {
    name: &'static str,
    apps: &'static [&'static str],
    tags: &'static [&'static str],
}

/// Business category rules; first match wins, apps before tags.
const CATEGORY_RULES: [CategoryRule; 6] = [
    CategoryRule {
        name: "開発",
        apps: &["Cursor", "Code", "Visual Studio Code", "Ghostty", "Terminal", "iTerm2", "Xcode"],
        tags: &["開発", "コーディング", "ビルド", "デバッグ", "git"],
    },
    CategoryRule {
        name: "コミュニケーション",
        apps: &["LINE", "Discord", "Slack", "Mail", "Messages", "メール", "Zoom", "Teams"],
        tags: &["チャット", "メール", "通話", "会議"],
    },
    CategoryRule {
        name: "ブラウザ/Web",
        apps: &["Google Chrome", "Safari", "Firefox", "Arc"],
        tags: &["ブラウザ", "Web", "検索"],
    },
    CategoryRule {
        name: "AI/LLM",
        apps: &["Claude", "Google Gemini", "ChatGPT"],
        tags: &["AI", "LLM", "GPT", "Gemini", "Claude"],
    },
    CategoryRule {
        name: "システム操作",
        apps: &["Finder", "System Preferences", "System Settings", "Activity Monitor"],
        tags: &["Finder", "システム", "設定"],
    },
    CategoryRule {
        name: "プロジェクト管理",
        apps: &["Linear", "Notion", "Jira", "Asana", "Trello"],
        tags: &["タスク管理", "プロジェクト", "チケット"],
    },
];

/// Category for workflows no rule matches.
pub const FALLBACK_CATEGORY: &str = "その他";

/// Reproducibility rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Rank {
    A,
    B,
    C,
}

impl Rank {
    fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Self::A
        } else if score >= 0.4 {
            Self::B
        } else {
            Self::C
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Self::A => "●",
            Self::B => "▲",
            Self::C => "×",
        }
    }

    /// The letter used in reports and the catalog.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score breakdown for one workflow.
#[derive(Debug, Clone, Serialize)]
pub struct ReproducibilityDetail {
    pub confidence: f64,
    pub success_rate: f64,
    pub step_quality: f64,
    pub ax_compatibility: f64,
}

/// Reproducibility verdict for one workflow.
#[derive(Debug, Clone, Serialize)]
pub struct Reproducibility {
    pub score: f64,
    pub rank: Rank,
    pub detail: ReproducibilityDetail,
}

/// Output format for the rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

struct Evaluated {
    workflow: Workflow,
    reproducibility: Reproducibility,
}

/// Generates reproducibility reports and the parts catalog.
pub struct ReportGenerator<'a> {
    store: &'a WorkflowStore,
    feedback: &'a FeedbackStore,
}

impl<'a> ReportGenerator<'a> {
    /// Creates a generator over the given stores.
    #[must_use]
    pub fn new(store: &'a WorkflowStore, feedback: &'a FeedbackStore) -> Self {
        Self { store, feedback }
    }

    /// Renders the report and refreshes `parts/catalog.json`.
    ///
    /// The catalog is always rebuilt from all categories; the category filter
    /// only restricts the rendered report.
    ///
    /// # Errors
    /// Returns a `CoreError` if the catalog cannot be written.
    pub fn generate(&self, format: ReportFormat, category: Option<&str>) -> CoreResult<String> {
        let workflows = self.store.list_all();
        let categorized = self.categorize_all(workflows);

        self.write_catalog(&categorized)?;

        let mut evaluated: BTreeMap<&'static str, Vec<Evaluated>> = BTreeMap::new();
        for (cat, wfs) in categorized {
            if category.is_some_and(|filter| filter != cat) {
                continue;
            }
            let entries = wfs
                .into_iter()
                .map(|workflow| {
                    let reproducibility = self.evaluate_reproducibility(&workflow);
                    Evaluated { workflow, reproducibility }
                })
                .collect();
            evaluated.insert(cat, entries);
        }

        Ok(match format {
            ReportFormat::Markdown => render_markdown(&evaluated),
            ReportFormat::Json => render_json(&evaluated),
        })
    }

    /// Rebuilds `parts/catalog.json` and returns its path.
    ///
    /// # Errors
    /// Returns a `CoreError` if the catalog cannot be written.
    pub fn update_catalog(&self) -> CoreResult<PathBuf> {
        let categorized = self.categorize_all(self.store.list_all());
        self.write_catalog(&categorized)
    }

    /// Workflows belonging to one category.
    pub fn get_by_category(&self, category: &str) -> Vec<Workflow> {
        self.store
            .list_all()
            .into_iter()
            .filter(|w| classify_category(w) == category)
            .collect()
    }

    /// Computes the reproducibility verdict for one workflow.
    ///
    /// `score = 0.30·confidence + 0.30·effective_success_rate +
    /// 0.25·step_quality + 0.15·ax_compatibility`, where the success rate
    /// defaults to 0.15 when no feedback exists.
    pub fn evaluate_reproducibility(&self, workflow: &Workflow) -> Reproducibility {
        let has_feedback = !self.feedback.get_by_workflow(&workflow.workflow_id).is_empty();
        let effective_success_rate = if has_feedback {
            self.feedback.get_success_rate(&workflow.workflow_id)
        } else {
            0.15
        };

        let step_quality =
            if workflow.steps.is_empty() { 0.0 } else { calc_step_quality(&workflow.steps) };
        let ax_compatibility = calc_ax_compatibility(&workflow.app_name, &workflow.steps);

        let score = workflow.confidence * 0.30
            + effective_success_rate * 0.30
            + step_quality * 0.25
            + ax_compatibility * 0.15;

        Reproducibility {
            score,
            rank: Rank::from_score(score),
            detail: ReproducibilityDetail {
                confidence: workflow.confidence,
                success_rate: effective_success_rate,
                step_quality: round3(step_quality),
                ax_compatibility: round3(ax_compatibility),
            },
        }
    }

    fn categorize_all(&self, workflows: Vec<Workflow>) -> BTreeMap<&'static str, Vec<Workflow>> {
        let mut result: BTreeMap<&'static str, Vec<Workflow>> = BTreeMap::new();
        for workflow in workflows {
            result.entry(classify_category(&workflow)).or_default().push(workflow);
        }
        result
    }

    fn write_catalog(
        &self,
        categorized: &BTreeMap<&'static str, Vec<Workflow>>,
    ) -> CoreResult<PathBuf> {
        let total: usize = categorized.values().map(Vec::len).sum();
        let mut by_rank: BTreeMap<&'static str, usize> =
            [("A", 0), ("B", 0), ("C", 0)].into_iter().collect();
        let mut categories = serde_json::Map::new();

        for (category, workflows) in categorized {
            let mut items = Vec::new();
            for workflow in workflows {
                let repro = self.evaluate_reproducibility(workflow);
                *by_rank.entry(repro.rank.as_str()).or_insert(0) += 1;
                items.push(json!({
                    "workflow_id": workflow.workflow_id,
                    "name": workflow.name,
                    "app_name": workflow.app_name,
                    "reproducibility": {
                        "score": round2(repro.score),
                        "rank": repro.rank.as_str(),
                    },
                    "steps_count": workflow.steps.len(),
                }));
            }
            categories.insert((*category).to_string(), json!({ "workflows": items }));
        }

        let catalog = json!({
            "updated_at": Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S").to_string(),
            "categories": categories,
            "stats": { "total": total, "by_rank": by_rank },
        });

        let parts_dir = self.store.dir().join("parts");
        std::fs::create_dir_all(&parts_dir)?;
        let path = parts_dir.join("catalog.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&catalog)?)?;
        info!(path = %path.display(), "catalog updated");
        Ok(path)
    }
}

/// Rule-based category classification: app list first, then lowercased tags.
pub fn classify_category(workflow: &Workflow) -> &'static str {
    for rule in &CATEGORY_RULES {
        if rule.apps.contains(&workflow.app_name.as_str()) {
            return rule.name;
        }
    }

    let tags_lower: Vec<String> = workflow.tags.iter().map(|t| t.to_lowercase()).collect();
    for rule in &CATEGORY_RULES {
        for tag in rule.tags {
            if tags_lower.iter().any(|t| t == &tag.to_lowercase()) {
                return rule.name;
            }
        }
    }

    FALLBACK_CATEGORY
}

/// Mean per-step quality: shortcuts replay best, bare coordinate clicks worst.
fn calc_step_quality(steps: &[ActionStep]) -> f64 {
    let sum: f64 = steps
        .iter()
        .map(|step| match step.action_type {
            ActionKind::KeyShortcut => 0.95,
            ActionKind::TextInput => 0.80,
            ActionKind::Click | ActionKind::RightClick => {
                if step.target.identifier.is_some() {
                    0.90
                } else if step.target.role.is_some() && step.target.title.is_some() {
                    0.70
                } else {
                    0.30
                }
            }
            ActionKind::KeyInput => 0.50,
        })
        .sum();
    sum / steps.len() as f64
}

/// Table lookup for known apps; unknown apps are estimated from how many
/// steps carry any target descriptor.
fn calc_ax_compatibility(app_name: &str, steps: &[ActionStep]) -> f64 {
    if let Some((_, value)) = AX_COMPATIBILITY.iter().find(|(app, _)| *app == app_name) {
        return *value;
    }
    if steps.is_empty() {
        return 0.50;
    }
    let with_target = steps.iter().filter(|s| s.target.has_any()).count();
    0.40 + (with_target as f64 / steps.len() as f64) * 0.40
}

fn render_markdown(evaluated: &BTreeMap<&'static str, Vec<Evaluated>>) -> String {
    let mut lines: Vec<String> = Vec::new();
    let now = Local::now().format("%Y-%m-%d %H:%M");
    let (total, by_rank) = tally(evaluated);

    lines.push(format!("# Reproducibility Report ({now})"));
    lines.push(String::new());
    lines.push("## Summary".to_string());
    lines.push(String::new());
    lines.push(format!("- Total workflows: {total}"));
    lines.push(format!("- Categories: {}", evaluated.len()));
    lines.push(format!("- Rank A (reproducible): {}", by_rank[&Rank::A]));
    lines.push(format!("- Rank B (needs validation): {}", by_rank[&Rank::B]));
    lines.push(format!("- Rank C (hard to reproduce): {}", by_rank[&Rank::C]));
    lines.push(String::new());

    for (category, items) in evaluated {
        lines.push(format!("## {category} ({})", items.len()));
        lines.push(String::new());
        lines.push("| Rank | Workflow | App | Score | Steps | Status |".to_string());
        lines.push("|------|----------|-----|-------|-------|--------|".to_string());

        let mut sorted: Vec<&Evaluated> = items.iter().collect();
        sorted.sort_by(|a, b| {
            b.reproducibility
                .score
                .partial_cmp(&a.reproducibility.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for item in sorted {
            let repro = &item.reproducibility;
            lines.push(format!(
                "| {} {} | {} | {} | {:.2} | {} | {} |",
                repro.rank.icon(),
                repro.rank,
                item.workflow.name,
                item.workflow.app_name,
                repro.score,
                item.workflow.steps.len(),
                item.workflow.status,
            ));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn render_json(evaluated: &BTreeMap<&'static str, Vec<Evaluated>>) -> String {
    let (total, by_rank) = tally(evaluated);
    let mut categories = serde_json::Map::new();
    for (category, items) in evaluated {
        let entries: Vec<serde_json::Value> = items
            .iter()
            .map(|item| {
                json!({
                    "workflow_id": item.workflow.workflow_id,
                    "name": item.workflow.name,
                    "app_name": item.workflow.app_name,
                    "status": item.workflow.status,
                    "steps_count": item.workflow.steps.len(),
                    "reproducibility": {
                        "score": round2(item.reproducibility.score),
                        "rank": item.reproducibility.rank.as_str(),
                        "detail": item.reproducibility.detail,
                    },
                })
            })
            .collect();
        categories.insert((*category).to_string(), serde_json::Value::Array(entries));
    }

    let report = json!({
        "generated_at": Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S").to_string(),
        "stats": {
            "total": total,
            "by_rank": {
                "A": by_rank[&Rank::A],
                "B": by_rank[&Rank::B],
                "C": by_rank[&Rank::C],
            },
            "categories": evaluated.len(),
        },
        "categories": categories,
    });
    serde_json::to_string_pretty(&report).unwrap_or_default()
}

fn tally(
    evaluated: &BTreeMap<&'static str, Vec<Evaluated>>,
) -> (usize, BTreeMap<Rank, usize>) {
    let mut by_rank: BTreeMap<Rank, usize> =
        [(Rank::A, 0), (Rank::B, 0), (Rank::C, 0)].into_iter().collect();
    let mut total = 0;
    for items in evaluated.values() {
        for item in items {
            total += 1;
            *by_rank.entry(item.reproducibility.rank).or_insert(0) += 1;
        }
    }
    (total, by_rank)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Point, TargetDescriptor};

    fn step(kind: ActionKind) -> ActionStep {
        ActionStep { action_type: kind, coordinates: Point { x: 1.0, y: 2.0 }, ..ActionStep::default() }
    }

    #[test]
    fn test_step_quality_table() {
        assert_eq!(calc_step_quality(&[step(ActionKind::KeyShortcut)]), 0.95);
        assert_eq!(calc_step_quality(&[step(ActionKind::TextInput)]), 0.80);
        assert_eq!(calc_step_quality(&[step(ActionKind::KeyInput)]), 0.50);
        assert_eq!(calc_step_quality(&[step(ActionKind::Click)]), 0.30);

        let mut with_id = step(ActionKind::Click);
        with_id.target.identifier = Some("btn".to_string());
        assert_eq!(calc_step_quality(&[with_id]), 0.90);

        let mut with_role_title = step(ActionKind::RightClick);
        with_role_title.target.role = Some("AXButton".to_string());
        with_role_title.target.title = Some("OK".to_string());
        assert_eq!(calc_step_quality(&[with_role_title]), 0.70);
    }

    #[test]
    fn test_ax_compatibility_known_apps() {
        assert_eq!(calc_ax_compatibility("Finder", &[]), 0.95);
        assert_eq!(calc_ax_compatibility("Discord", &[]), 0.40);
    }

    #[test]
    fn test_ax_compatibility_unknown_app() {
        assert_eq!(calc_ax_compatibility("MysteryApp", &[]), 0.50);

        let mut with_target = step(ActionKind::Click);
        with_target.target = TargetDescriptor {
            title: Some("OK".to_string()),
            ..TargetDescriptor::default()
        };
        let bare = step(ActionKind::Click);
        // One of two steps has a target descriptor: 0.40 + 0.5 * 0.40.
        let value = calc_ax_compatibility("MysteryApp", &[with_target, bare]);
        assert!((value - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_rank_thresholds() {
        assert_eq!(Rank::from_score(0.71), Rank::A);
        assert_eq!(Rank::from_score(0.7), Rank::A);
        assert_eq!(Rank::from_score(0.69), Rank::B);
        assert_eq!(Rank::from_score(0.4), Rank::B);
        assert_eq!(Rank::from_score(0.39), Rank::C);
    }

    #[test]
    fn test_classify_category_app_before_tags() {
        let mut workflow = Workflow {
            app_name: "Finder".to_string(),
            tags: vec!["git".to_string()],
            ..Workflow::default()
        };
        // App match (システム操作) wins over the 開発 tag.
        assert_eq!(classify_category(&workflow), "システム操作");

        workflow.app_name = "UnknownApp".to_string();
        assert_eq!(classify_category(&workflow), "開発");

        workflow.tags.clear();
        assert_eq!(classify_category(&workflow), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_classify_category_tags_case_insensitive() {
        let workflow = Workflow {
            app_name: "UnknownApp".to_string(),
            tags: vec!["GIT".to_string()],
            ..Workflow::default()
        };
        assert_eq!(classify_category(&workflow), "開発");
    }
}
