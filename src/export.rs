use crate::{report::AnalysisResult, storage::write_atomic};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

#[derive(Debug, Serialize)]
pub struct ReportExport<'a> {
    pub report_text: String,
    pub suggested_load_order: &'a [String],
    pub analysis: &'a AnalysisResult,
}

impl<'a> ReportExport<'a> {
    pub fn new(analysis: &'a AnalysisResult, game_name: &str) -> Self {
        Self {
            report_text: analysis.render_text(game_name),
            suggested_load_order: analysis.load_order().unwrap_or(&[]),
            analysis,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize report export")
    }
}

pub fn export_timestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}-{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

pub fn export_timestamp_rfc3339(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

pub fn write_export(
    dir: &Path,
    stem: &str,
    extension: &str,
    contents: &str,
    now: OffsetDateTime,
) -> Result<PathBuf> {
    let path = dir.join(format!("{stem}-{}.{extension}", export_timestamp(now)));
    write_atomic(&path, contents).with_context(|| format!("write export {}", path.display()))?;
    Ok(path)
}
