//! JSON report written by `validate --output`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use geoval_core::BatchReport;
use geoval_model::{Finding, StageKind, StageStatus, ValidationResult};

#[derive(Debug, Serialize)]
pub struct ReportFile {
    pub generated_at: DateTime<Utc>,
    pub valid: bool,
    pub cancelled: bool,
    pub targets: Vec<TargetReport>,
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Serialize)]
pub struct TargetReport {
    pub target: PathBuf,
    pub valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub stages: Vec<StageEntry>,
    pub findings: Vec<Finding>,
    /// Complete per-stage result, including structured findings.
    pub result: ValidationResult,
}

#[derive(Debug, Serialize)]
pub struct StageEntry {
    pub stage: StageKind,
    pub status: StageStatus,
    pub message: Option<String>,
    pub processed_units: u64,
    pub total_units: u64,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct FailureEntry {
    pub target: PathBuf,
    pub error: String,
}

impl ReportFile {
    pub fn from_batch(report: &BatchReport, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            valid: report.is_valid(),
            cancelled: report.cancelled,
            targets: report.results.iter().map(TargetReport::from_result).collect(),
            failures: report
                .failures
                .iter()
                .map(|failure| FailureEntry {
                    target: failure.target.clone(),
                    error: failure.error.to_string(),
                })
                .collect(),
        }
    }
}

impl TargetReport {
    fn from_result(result: &ValidationResult) -> Self {
        Self {
            target: result.target_file.clone(),
            valid: result.is_valid(),
            error_count: result.error_count(),
            warning_count: result.warning_count(),
            stages: result
                .stages
                .iter()
                .map(|stage| StageEntry {
                    stage: stage.stage,
                    status: stage.status,
                    message: stage.message.clone(),
                    processed_units: stage.processed_units,
                    total_units: stage.total_units,
                    elapsed_seconds: stage.elapsed.as_secs_f64(),
                })
                .collect(),
            findings: result.findings().map(Finding::from).collect(),
            result: result.clone(),
        }
    }
}

pub fn write_report(path: &Path, report: &ReportFile) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("create report {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .with_context(|| format!("write report {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flush report {}", path.display()))?;
    Ok(())
}
