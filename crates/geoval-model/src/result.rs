//! Run context, per-stage and per-target validation results, run history.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::issue::{Issue, Severity};
use crate::stage::{StageKind, StageStatus};

/// Per-target metadata, fixed once a run starts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunContext {
    pub target_path: PathBuf,
    pub file_size_bytes: u64,
    pub feature_count: u64,
    pub layer_count: u32,
    pub field_count: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    #[default]
    Completed,
    Cancelled,
}

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageStatus,
    pub findings: Vec<Issue>,
    /// Status detail, e.g. the error text of a failed stage.
    pub message: Option<String>,
    pub processed_units: u64,
    pub total_units: u64,
    pub elapsed: Duration,
}

impl StageResult {
    pub fn not_started(stage: StageKind) -> Self {
        Self {
            stage,
            status: StageStatus::NotStarted,
            findings: Vec::new(),
            message: None,
            processed_units: 0,
            total_units: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|issue| issue.severity() == severity)
            .count()
    }
}

/// Terminal (or partial) result for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub target_file: PathBuf,
    pub started_at: DateTime<Utc>,
    pub processing_time: Duration,
    pub outcome: RunOutcome,
    /// One entry per catalog stage, in stage order.
    pub stages: Vec<StageResult>,
}

impl ValidationResult {
    pub fn new(target_file: impl Into<PathBuf>, started_at: DateTime<Utc>) -> Self {
        Self {
            target_file: target_file.into(),
            started_at,
            processing_time: Duration::ZERO,
            outcome: RunOutcome::Completed,
            stages: StageKind::ALL.into_iter().map(StageResult::not_started).collect(),
        }
    }

    pub fn stage(&self, stage: StageKind) -> &StageResult {
        &self.stages[stage.index()]
    }

    pub fn stage_mut(&mut self, stage: StageKind) -> &mut StageResult {
        &mut self.stages[stage.index()]
    }

    pub fn findings(&self) -> impl Iterator<Item = &Issue> {
        self.stages.iter().flat_map(|stage| stage.findings.iter())
    }

    pub fn error_count(&self) -> usize {
        self.stages.iter().map(StageResult::error_count).sum()
    }

    pub fn warning_count(&self) -> usize {
        self.stages.iter().map(StageResult::warning_count).sum()
    }

    /// No errors, no failed stage, and the run was not cancelled.
    pub fn is_valid(&self) -> bool {
        self.outcome == RunOutcome::Completed
            && self.error_count() == 0
            && self
                .stages
                .iter()
                .all(|stage| stage.status != StageStatus::Failed)
    }
}

/// Record written once per completed run, used to seed later predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub table_count: u32,
    pub feature_count: u64,
    pub field_count: u64,
    pub rule_count: u64,
    /// Seconds per stage number.
    pub stage_durations: BTreeMap<u8, f64>,
    pub total_duration: f64,
}

impl RunHistoryRecord {
    pub fn from_result(result: &ValidationResult, context: &RunContext, rule_count: u64) -> Self {
        let stage_durations = result
            .stages
            .iter()
            .filter(|stage| stage.status.is_terminal() && stage.status != StageStatus::Skipped)
            .map(|stage| (stage.stage.number(), stage.elapsed.as_secs_f64()))
            .collect();
        Self {
            timestamp: result.started_at,
            target: result.target_file.display().to_string(),
            table_count: context.layer_count,
            feature_count: context.feature_count,
            field_count: context.field_count,
            rule_count,
            stage_durations,
            total_duration: result.processing_time.as_secs_f64(),
        }
    }
}
