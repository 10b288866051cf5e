use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    #[serde(alias = "warn")]
    Warning,
    Info,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Error, Severity::Warning, Severity::Info];

    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "Errors",
            Severity::Warning => "Warnings",
            Severity::Info => "Info",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" | "errors" => Some(Severity::Error),
            "warning" | "warnings" | "warn" => Some(Severity::Warning),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingRequirement,
    Incompatible,
    LoadOrderViolation,
    DirtyEdits,
    PatchAvailable,
    CrossGame,
    UnknownMod,
    Info,
    #[serde(other)]
    Unknown,
}

impl Default for IssueType {
    fn default() -> Self {
        IssueType::Unknown
    }
}

impl IssueType {
    pub fn label(self) -> &'static str {
        match self {
            IssueType::MissingRequirement => "Missing requirement",
            IssueType::Incompatible => "Incompatible",
            IssueType::LoadOrderViolation => "Load order",
            IssueType::DirtyEdits => "Dirty edits",
            IssueType::PatchAvailable => "Patch available",
            IssueType::CrossGame => "Wrong game",
            IssueType::UnknownMod => "Unknown mod",
            IssueType::Info => "Info",
            IssueType::Unknown => "Issue",
        }
    }
}

/// One problem reported by the analyzer. Every field tolerates being absent on the wire so a
/// malformed issue still renders instead of vanishing from the report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub severity: Severity,
    #[serde(rename = "type", default)]
    pub kind: IssueType,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "mod")]
    pub affected_mod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_mod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_count: Option<u32>,
}

impl Issue {
    /// The remedy text, if it carries any content.
    pub fn action(&self) -> Option<&str> {
        self.suggested_action
            .as_deref()
            .filter(|action| !action.trim().is_empty())
    }

    pub fn mod_label(&self) -> &str {
        self.affected_mod
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("Unknown mod")
    }

    pub fn display_message(&self) -> String {
        let message = self.message.trim();
        if !message.is_empty() {
            return message.to_string();
        }
        match (&self.affected_mod, &self.related_mod) {
            (Some(affected), Some(related)) => {
                format!("{}: {affected} / {related}", self.kind.label())
            }
            (Some(affected), None) => format!("{}: {affected}", self.kind.label()),
            _ => format!("{} (no details provided)", self.kind.label()),
        }
    }

    /// Text used for search matching.
    pub fn search_text(&self) -> String {
        let mut text = self.display_message();
        for part in [
            self.action(),
            self.affected_mod.as_deref(),
            self.related_mod.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            text.push('\n');
            text.push_str(part);
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Conflicts {
    #[serde(default)]
    pub errors: Vec<Issue>,
    #[serde(default)]
    pub warnings: Vec<Issue>,
    #[serde(default)]
    pub info: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub errors: usize,
    #[serde(default)]
    pub warnings: usize,
    #[serde(default)]
    pub info: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImpactEntry {
    #[serde(default, alias = "mod", alias = "name")]
    pub mod_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ImpactEntry {
    pub fn search_text(&self) -> String {
        let mut text = self.mod_name.clone();
        for part in [self.category.as_deref(), self.reason.as_deref()]
            .into_iter()
            .flatten()
        {
            text.push('\n');
            text.push_str(part);
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemImpact {
    #[serde(default, alias = "mods", alias = "ranked")]
    pub entries: Vec<ImpactEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub filters_applied: Vec<String>,
}

/// The analyzer's full response for one run. Replaced wholesale by each new analysis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub conflicts: Conflicts,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_load_order: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_impact: Option<SystemImpact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnalysisMetadata>,
    #[serde(default)]
    pub mod_count: usize,
    #[serde(default)]
    pub enabled_count: usize,
}

impl AnalysisResult {
    /// Stamps each issue with the severity of the bucket it arrived in and fills summary
    /// counts the backend left at zero.
    pub fn normalized(mut self) -> Self {
        for severity in Severity::ALL {
            for issue in self.bucket_mut(severity) {
                issue.severity = severity;
            }
        }
        if self.summary.errors == 0 {
            self.summary.errors = self.conflicts.errors.len();
        }
        if self.summary.warnings == 0 {
            self.summary.warnings = self.conflicts.warnings.len();
        }
        if self.summary.info == 0 {
            self.summary.info = self.conflicts.info.len();
        }
        self
    }

    pub fn bucket(&self, severity: Severity) -> &[Issue] {
        match severity {
            Severity::Error => &self.conflicts.errors,
            Severity::Warning => &self.conflicts.warnings,
            Severity::Info => &self.conflicts.info,
        }
    }

    fn bucket_mut(&mut self, severity: Severity) -> &mut Vec<Issue> {
        match severity {
            Severity::Error => &mut self.conflicts.errors,
            Severity::Warning => &mut self.conflicts.warnings,
            Severity::Info => &mut self.conflicts.info,
        }
    }

    pub fn total_issues(&self) -> usize {
        Severity::ALL
            .iter()
            .map(|severity| self.bucket(*severity).len())
            .sum()
    }

    pub fn load_order(&self) -> Option<&[String]> {
        self.suggested_load_order
            .as_deref()
            .filter(|order| !order.is_empty())
    }

    pub fn impact_entries(&self) -> &[ImpactEntry] {
        self.system_impact
            .as_ref()
            .map(|impact| impact.entries.as_slice())
            .unwrap_or(&[])
    }

    /// Plain-text rendering of the whole report, per issue (not grouped).
    pub fn render_text(&self, game_name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Load order report: {game_name}");
        let _ = writeln!(
            out,
            "Mods: {} ({} enabled)",
            self.mod_count, self.enabled_count
        );
        let _ = writeln!(
            out,
            "Errors: {}  Warnings: {}  Info: {}",
            self.conflicts.errors.len(),
            self.conflicts.warnings.len(),
            self.conflicts.info.len()
        );
        if let Some(confidence) = self.metadata.as_ref().and_then(|meta| meta.confidence) {
            let _ = writeln!(out, "Confidence: {:.0}%", confidence * 100.0);
        }

        for severity in Severity::ALL {
            let issues = self.bucket(severity);
            if issues.is_empty() {
                continue;
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "== {} ({}) ==", severity.label(), issues.len());
            for issue in issues {
                let _ = writeln!(out, "- [{}] {}", issue.mod_label(), issue.display_message());
                if let Some(action) = issue.action() {
                    let _ = writeln!(out, "    Fix: {action}");
                }
            }
        }

        if let Some(order) = self.load_order() {
            let _ = writeln!(out);
            let _ = writeln!(out, "== Suggested load order ==");
            for (index, name) in order.iter().enumerate() {
                let _ = writeln!(out, "{:>4}. {name}", index + 1);
            }
        }
        out
    }
}
