//! Per-stage summary rows and alerts shown to observers.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use geoval_model::{StageDefinition, StageKind, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// A notification owned by one stage; at most one is live per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub stage: StageKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub detail: Option<String>,
    pub related_status: StageStatus,
    /// Dismissed by the user but kept for reference.
    pub cleared: bool,
}

impl Alert {
    pub fn new(stage: StageKind, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity,
            message: message.into(),
            detail: None,
            related_status: StageStatus::NotStarted,
            cleared: false,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StageStatus) -> Self {
        self.related_status = status;
        self
    }

    /// Identity key: the owning stage id.
    pub fn key(&self) -> &'static str {
        self.stage.id()
    }
}

/// Live state of one stage for the current target.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSummary {
    pub definition: StageDefinition,
    pub status: StageStatus,
    pub progress_percent: f64,
    pub processed_units: u64,
    pub total_units: u64,
    pub started_at: Option<Instant>,
    pub last_updated_at: Option<Instant>,
    pub predicted_duration: Option<Duration>,
    pub estimated_remaining: Option<Duration>,
    pub confidence: f64,
    pub alert: Option<Alert>,
}

impl StageSummary {
    pub fn new(stage: StageKind) -> Self {
        Self {
            definition: *stage.definition(),
            status: StageStatus::NotStarted,
            progress_percent: 0.0,
            processed_units: 0,
            total_units: 0,
            started_at: None,
            last_updated_at: None,
            predicted_duration: None,
            estimated_remaining: None,
            confidence: 0.0,
            alert: None,
        }
    }

    pub fn stage(&self) -> StageKind {
        self.definition.kind
    }

    /// Back to `NotStarted`, keeping the catalog entry.
    pub fn reset(&mut self) {
        *self = Self::new(self.stage());
    }

    /// Record unit counts, keeping `processed <= total` once the total is known.
    pub fn set_units(&mut self, processed: u64, total: u64) {
        self.total_units = total;
        self.processed_units = if total > 0 { processed.min(total) } else { processed };
    }
}
