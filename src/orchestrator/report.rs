// In: src/orchestrator/report.rs

//! The per-pair result table, as JSON on disk and as a colored text table.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::compare::Divergence;
use crate::error::Result;

pub const REPORT_FILE_NAME: &str = "integration-report.json";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Pass,
    /// The consumer decoded the stream but the data diverged.
    Fail,
    /// The producer or consumer returned an error, crashed or panicked.
    Error,
    /// The pair lacks a feature the case needs.
    Skipped,
}

impl PairStatus {
    fn label(self) -> &'static str {
        match self {
            PairStatus::Pass => "PASS",
            PairStatus::Fail => "FAIL",
            PairStatus::Error => "ERROR",
            PairStatus::Skipped => "SKIP",
        }
    }
}

/// One row of the report: one case through one producer and one consumer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PairResult {
    pub case: String,
    pub producer: String,
    pub consumer: String,
    pub status: PairStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<Divergence>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_bytes: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MatrixReport {
    /// RFC 3339 start time of the run.
    pub started_at: String,
    pub implementations: Vec<String>,
    pub cases: usize,
    pub summary: ReportSummary,
    pub results: Vec<PairResult>,
}

impl MatrixReport {
    pub fn new(implementations: Vec<String>, cases: usize, results: Vec<PairResult>) -> Self {
        let mut summary = ReportSummary {
            total: results.len(),
            ..ReportSummary::default()
        };
        for result in &results {
            match result.status {
                PairStatus::Pass => summary.passed += 1,
                PairStatus::Fail => summary.failed += 1,
                PairStatus::Error => summary.errors += 1,
                PairStatus::Skipped => summary.skipped += 1,
            }
        }
        Self {
            started_at: chrono::Utc::now().to_rfc3339(),
            implementations,
            cases,
            summary,
            results,
        }
    }

    /// Zero only when nothing failed or errored.
    pub fn exit_code(&self) -> i32 {
        if self.summary.failed == 0 && self.summary.errors == 0 {
            0
        } else {
            1
        }
    }

    pub fn problems(&self) -> impl Iterator<Item = &PairResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, PairStatus::Fail | PairStatus::Error))
    }

    pub fn find(&self, case: &str, producer: &str, consumer: &str) -> Option<&PairResult> {
        self.results
            .iter()
            .find(|r| r.case == case && r.producer == producer && r.consumer == consumer)
    }

    /// Writes `<dir>/integration-report.json`, creating `dir` if needed.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE_NAME);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        log::info!("report written to {}", path.display());
        Ok(path)
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The result table, one row per pair, followed by the summary line.
    pub fn render_table(&self) -> String {
        let case_width = column_width(self.results.iter().map(|r| r.case.as_str()), "case");
        let producer_width =
            column_width(self.results.iter().map(|r| r.producer.as_str()), "producer");
        let consumer_width =
            column_width(self.results.iter().map(|r| r.consumer.as_str()), "consumer");

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<case_width$}  {:<producer_width$}  {:<consumer_width$}  {:<6}  {:>9}  {:>10}  detail",
            "case", "producer", "consumer", "status", "time (ms)", "bytes"
        );
        for r in &self.results {
            let status = format!("{:<6}", r.status.label());
            let status = match r.status {
                PairStatus::Pass => status.green(),
                PairStatus::Fail => status.red().bold(),
                PairStatus::Error => status.magenta().bold(),
                PairStatus::Skipped => status.yellow(),
            };
            let bytes = r
                .stream_bytes
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{:<case_width$}  {:<producer_width$}  {:<consumer_width$}  {}  {:>9}  {:>10}  {}",
                r.case,
                r.producer,
                r.consumer,
                status,
                r.duration_ms,
                bytes,
                r.detail.as_deref().unwrap_or("")
            );
        }
        let s = &self.summary;
        let _ = writeln!(
            out,
            "{} pairs: {} passed, {} failed, {} errors, {} skipped",
            s.total,
            s.passed.to_string().green(),
            s.failed.to_string().red(),
            s.errors.to_string().magenta(),
            s.skipped.to_string().yellow()
        );
        out
    }
}

fn column_width<'a>(values: impl Iterator<Item = &'a str>, header: &str) -> usize {
    values.map(str::len).chain([header.len()]).max().unwrap_or(0)
}
