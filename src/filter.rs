use crate::{
    consolidate::ConsolidatedReport,
    report::{ImpactEntry, Severity},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default = "default_true")]
    pub show_errors: bool,
    #[serde(default = "default_true")]
    pub show_warnings: bool,
    #[serde(default = "default_true")]
    pub show_info: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            show_errors: true,
            show_warnings: true,
            show_info: true,
        }
    }
}

impl FilterState {
    pub fn enabled(&self, severity: Severity) -> bool {
        match severity {
            Severity::Error => self.show_errors,
            Severity::Warning => self.show_warnings,
            Severity::Info => self.show_info,
        }
    }

    pub fn set(&mut self, severity: Severity, enabled: bool) {
        match severity {
            Severity::Error => self.show_errors = enabled,
            Severity::Warning => self.show_warnings = enabled,
            Severity::Info => self.show_info = enabled,
        }
    }

    pub fn toggle(&mut self, severity: Severity) {
        let enabled = self.enabled(severity);
        self.set(severity, !enabled);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionVisibility {
    pub severity: Severity,
    pub visible: bool,
    pub nodes: Vec<bool>,
}

/// Result of one filtering pass. Counts and per-node flags are always computed together.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityReport {
    pub query: Option<String>,
    pub sections: Vec<SectionVisibility>,
    pub impact: Vec<bool>,
    pub eligible: usize,
    pub visible: usize,
}

impl VisibilityReport {
    pub fn section(&self, severity: Severity) -> Option<&SectionVisibility> {
        self.sections
            .iter()
            .find(|section| section.severity == severity)
    }

    pub fn section_visible(&self, severity: Severity) -> bool {
        self.section(severity)
            .map(|section| section.visible)
            .unwrap_or(false)
    }

    pub fn node_visible(&self, severity: Severity, index: usize) -> bool {
        self.section(severity)
            .and_then(|section| section.nodes.get(index).copied())
            .unwrap_or(false)
    }

    pub fn visible_in(&self, severity: Severity) -> usize {
        self.section(severity)
            .map(|section| section.nodes.iter().filter(|visible| **visible).count())
            .unwrap_or(0)
    }

    pub fn impact_visible(&self) -> usize {
        self.impact.iter().filter(|visible| **visible).count()
    }

    pub fn showing_line(&self) -> Option<String> {
        if self.query.is_none() || self.eligible == 0 {
            return None;
        }
        Some(format!("Showing {} of {}", self.visible, self.eligible))
    }

    /// Only when the search itself emptied a non-empty view; an empty report has its own
    /// empty state.
    pub fn no_results_line(&self) -> Option<String> {
        let query = self.query.as_deref()?;
        if self.eligible > 0 && self.visible == 0 {
            Some(format!("No results for '{query}'"))
        } else {
            None
        }
    }
}

pub fn normalize_query(query: &str) -> Option<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

pub fn evaluate(
    report: &ConsolidatedReport,
    impact: &[ImpactEntry],
    filter: FilterState,
    query: &str,
) -> VisibilityReport {
    let display_query = query.trim();
    let needle = normalize_query(query);
    let matches = |text: String| match &needle {
        Some(needle) => text.to_lowercase().contains(needle.as_str()),
        None => true,
    };

    let mut eligible = 0usize;
    let mut visible = 0usize;
    let mut sections = Vec::with_capacity(report.sections.len());
    for section in &report.sections {
        let enabled = filter.enabled(section.severity);
        let nodes: Vec<bool> = section
            .nodes
            .iter()
            .map(|node| enabled && matches(node.search_text()))
            .collect();
        if enabled {
            eligible += section.nodes.len();
        }
        let shown = nodes.iter().filter(|flag| **flag).count();
        visible += shown;
        sections.push(SectionVisibility {
            severity: section.severity,
            visible: enabled && shown > 0,
            nodes,
        });
    }

    let impact = impact
        .iter()
        .map(|entry| matches(entry.search_text()))
        .collect();

    VisibilityReport {
        query: needle.map(|_| display_query.to_string()),
        sections,
        impact,
        eligible,
        visible,
    }
}

fn default_true() -> bool {
    true
}
