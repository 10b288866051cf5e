use crate::{
    game::GameId,
    report::{AnalysisResult, Issue, Severity},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt::Write};
use time::Date;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FixGuideStep {
    Intro {
        content: String,
    },
    Step {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<Severity>,
        content: String,
    },
    Fix {
        severity: Severity,
        #[serde(rename = "mod")]
        mod_name: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        id: String,
    },
    Ai {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        question: Option<String>,
    },
}

impl FixGuideStep {
    pub fn fix_id(&self) -> Option<&str> {
        match self {
            FixGuideStep::Fix { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Empty,
    Built,
    Extended,
}

/// Step with the resolved overlay frozen in, as written to exports.
#[derive(Debug, Serialize)]
pub struct ExportedStep<'a> {
    #[serde(flatten)]
    pub step: &'a FixGuideStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
}

/// Per-issue narrative of the current analysis, extended by assistant replies. Resolved
/// marks are owned here and reset on every rebuild.
#[derive(Debug, Clone)]
pub struct LiveDocument {
    steps: Vec<FixGuideStep>,
    resolved: BTreeSet<String>,
    state: DocumentState,
}

impl Default for LiveDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveDocument {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            resolved: BTreeSet::new(),
            state: DocumentState::Empty,
        }
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn steps(&self) -> &[FixGuideStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.state == DocumentState::Empty
    }

    pub fn build(&mut self, result: &AnalysisResult, game: GameId, date: Date) {
        self.steps.clear();
        self.resolved.clear();

        let enabled = if result.enabled_count > 0 {
            result.enabled_count
        } else {
            result.mod_count
        };
        self.steps.push(FixGuideStep::Intro {
            content: format!(
                "Fix guide for {} ({}), {} enabled mods.",
                game.display_name(),
                format_date(date),
                enabled
            ),
        });

        for severity in Severity::ALL {
            let count = result.bucket(severity).len();
            if count == 0 {
                continue;
            }
            self.steps.push(FixGuideStep::Step {
                severity: Some(severity),
                content: summary_line(severity, count),
            });
        }

        for (index, issue) in result.conflicts.errors.iter().enumerate() {
            self.steps
                .push(fix_step(Severity::Error, issue, format!("err-{index}")));
        }
        for (index, issue) in result.conflicts.warnings.iter().enumerate() {
            self.steps
                .push(fix_step(Severity::Warning, issue, format!("warn-{index}")));
        }

        if let Some(order) = result.load_order() {
            self.steps.push(FixGuideStep::Step {
                severity: None,
                content: format!(
                    "Apply the suggested load order ({} plugins): {}",
                    order.len(),
                    order.join(" > ")
                ),
            });
        }
        self.state = DocumentState::Built;
    }

    /// Appends an assistant reply. Nothing is recorded before the first analysis.
    pub fn append_ai(&mut self, question: Option<&str>, reply: &str) -> bool {
        if self.state == DocumentState::Empty {
            return false;
        }
        self.steps.push(FixGuideStep::Ai {
            content: reply.trim().to_string(),
            question: question
                .map(str::trim)
                .filter(|question| !question.is_empty())
                .map(str::to_string),
        });
        self.state = DocumentState::Extended;
        true
    }

    pub fn clear(&mut self) {
        self.steps.clear();
        self.resolved.clear();
        self.state = DocumentState::Empty;
    }

    fn has_fix(&self, id: &str) -> bool {
        self.steps.iter().any(|step| step.fix_id() == Some(id))
    }

    /// Returns false when `id` names no fix step of the current build.
    pub fn set_resolved(&mut self, id: &str, resolved: bool) -> bool {
        if !self.has_fix(id) {
            return false;
        }
        if resolved {
            self.resolved.insert(id.to_string());
        } else {
            self.resolved.remove(id);
        }
        true
    }

    pub fn toggle_resolved(&mut self, id: &str) -> bool {
        let resolved = self.is_resolved(id);
        self.set_resolved(id, !resolved)
    }

    pub fn is_resolved(&self, id: &str) -> bool {
        self.resolved.contains(id)
    }

    /// (resolved, total) fix steps.
    pub fn progress(&self) -> (usize, usize) {
        let total = self
            .steps
            .iter()
            .filter(|step| step.fix_id().is_some())
            .count();
        (self.resolved.len(), total)
    }

    pub fn exported_steps(&self) -> Vec<ExportedStep<'_>> {
        self.steps
            .iter()
            .map(|step| ExportedStep {
                step,
                resolved: step.fix_id().map(|id| self.is_resolved(id)),
            })
            .collect()
    }

    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.exported_steps())
    }

    pub fn render_text(&self) -> String {
        if self.is_empty() {
            return "No fix guide yet. Run an analysis to build one.".to_string();
        }
        let mut out = String::new();
        let mut number = 0usize;
        for step in &self.steps {
            match step {
                FixGuideStep::Intro { content } => {
                    let _ = writeln!(out, "{content}");
                    let _ = writeln!(out);
                }
                FixGuideStep::Step { content, .. } => {
                    let _ = writeln!(out, "* {content}");
                }
                FixGuideStep::Fix {
                    mod_name,
                    message,
                    action,
                    id,
                    severity,
                } => {
                    number += 1;
                    let mark = if self.is_resolved(id) { "x" } else { " " };
                    let _ = writeln!(
                        out,
                        "{number:>3}. [{mark}] ({}) {mod_name}: {message}  <{id}>",
                        severity.as_str()
                    );
                    if let Some(action) = action {
                        let _ = writeln!(out, "       Fix: {action}");
                    }
                }
                FixGuideStep::Ai { content, question } => {
                    let _ = writeln!(out);
                    if let Some(question) = question {
                        let _ = writeln!(out, "Q: {question}");
                    }
                    let _ = writeln!(out, "A: {content}");
                }
            }
        }
        let (done, total) = self.progress();
        if total > 0 {
            let _ = writeln!(out);
            let _ = writeln!(out, "Resolved {done} of {total} fixes.");
        }
        out
    }

    /// Standalone HTML page with inline styling and the resolved marks frozen in.
    pub fn export_html(&self, title: &str, generated_at: &str) -> String {
        let mut body = String::new();
        if self.is_empty() {
            body.push_str("<p class=\"empty\">No analysis has been run yet, so there is nothing to fix.</p>\n");
        } else {
            let (done, total) = self.progress();
            let _ = writeln!(
                body,
                "<p class=\"progress\">Resolved {done} of {total} fixes</p>"
            );
            body.push_str("<ol class=\"steps\">\n");
            for exported in self.exported_steps() {
                body.push_str(&render_step_html(exported.step, exported.resolved));
            }
            body.push_str("</ol>\n");
        }

        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
             <h1>{title}</h1>\n<p class=\"meta\">Generated {generated}</p>\n{body}</body>\n</html>\n",
            title = escape_html(title),
            generated = escape_html(generated_at),
        )
    }
}

const STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:820px;margin:2rem auto;\
padding:0 1rem;color:#1d2330;background:#fbfbfd}h1{font-size:1.5rem}.meta,.progress{color:#5b6275}\
.steps{list-style:none;padding:0}.steps li{border:1px solid #d9dce5;border-radius:6px;\
padding:.6rem .8rem;margin:.5rem 0;background:#fff}.intro{font-weight:600}\
.sev-error{border-left:4px solid #c62828}.sev-warning{border-left:4px solid #ef8f00}\
.sev-info{border-left:4px solid #1e6fd9}.resolved{opacity:.55}.resolved .msg{text-decoration:line-through}\
.action{display:block;margin-top:.3rem;color:#2e7d32}.ai{background:#f3f0ff}.q{font-style:italic;color:#5b4b9a}\
.empty{color:#5b6275;font-style:italic}";

fn render_step_html(step: &FixGuideStep, resolved: Option<bool>) -> String {
    match step {
        FixGuideStep::Intro { content } => {
            format!("<li class=\"intro\">{}</li>\n", escape_html(content))
        }
        FixGuideStep::Step { severity, content } => {
            let class = severity
                .map(|severity| format!(" class=\"sev-{}\"", severity.as_str()))
                .unwrap_or_default();
            format!("<li{class}>{}</li>\n", escape_html(content))
        }
        FixGuideStep::Fix {
            severity,
            mod_name,
            message,
            action,
            id,
        } => {
            let resolved = resolved.unwrap_or(false);
            let mut out = format!(
                "<li id=\"{}\" class=\"sev-{}{}\" data-resolved=\"{resolved}\">",
                escape_html(id),
                severity.as_str(),
                if resolved { " resolved" } else { "" }
            );
            let _ = write!(
                out,
                "<input type=\"checkbox\" disabled{}> <strong>{}</strong> <span class=\"msg\">{}</span>",
                if resolved { " checked" } else { "" },
                escape_html(mod_name),
                escape_html(message)
            );
            if let Some(action) = action {
                let _ = write!(out, "<span class=\"action\">{}</span>", escape_html(action));
            }
            out.push_str("</li>\n");
            out
        }
        FixGuideStep::Ai { content, question } => {
            let mut out = String::from("<li class=\"ai\">");
            if let Some(question) = question {
                let _ = write!(out, "<p class=\"q\">{}</p>", escape_html(question));
            }
            for paragraph in content.split("\n\n") {
                let _ = write!(out, "<p>{}</p>", escape_html(paragraph).replace('\n', "<br>"));
            }
            out.push_str("</li>\n");
            out
        }
    }
}

fn fix_step(severity: Severity, issue: &Issue, id: String) -> FixGuideStep {
    FixGuideStep::Fix {
        severity,
        mod_name: issue.mod_label().to_string(),
        message: issue.display_message(),
        action: issue.action().map(str::to_string),
        id,
    }
}

fn summary_line(severity: Severity, count: usize) -> String {
    let plural = if count == 1 { "" } else { "s" };
    match severity {
        Severity::Error => format!("{count} error{plural} must be fixed before playing."),
        Severity::Warning => format!("{count} warning{plural} should be reviewed."),
        Severity::Info => format!("{count} informational note{plural}."),
    }
}

pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    )
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
