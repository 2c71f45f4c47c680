//! Value events published by the pipeline worker.

use std::collections::BTreeMap;
use std::time::Instant;

use crossbeam_channel::Sender;

use geoval_model::{RunContext, StageKind, StageStatus, ValidationResult};

use crate::estimate::StageProgressSample;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A target is about to run; observers reset their per-stage state.
    TargetStarted {
        index: usize,
        total: usize,
        context: RunContext,
        /// Predicted seconds per stage, empty without history.
        predictions: BTreeMap<StageKind, f64>,
    },
    Progress(Box<ProgressEvent>),
    TargetFinished {
        index: usize,
        result: Box<ValidationResult>,
    },
    BatchFinished {
        completed: usize,
        total: usize,
        cancelled: bool,
    },
}

/// Progress of one stage of one target.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub target_index: usize,
    pub stage: StageKind,
    pub stage_name: &'static str,
    /// Percent within the stage.
    pub percent: f64,
    /// Percent of the whole batch.
    pub overall_percent: f64,
    pub processed_units: u64,
    pub total_units: u64,
    pub message: Option<String>,
    pub is_completed: bool,
    pub is_successful: bool,
    pub is_skipped: bool,
    /// Terminal event produced by the orchestrator for a stage that reported
    /// no progress of its own.
    pub synthesized: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub started_at: Instant,
    pub observed_at: Instant,
    /// Snapshot with the findings of every finished stage; set exactly once
    /// per stage, on its terminal event.
    pub partial_result: Option<Box<ValidationResult>>,
}

impl ProgressEvent {
    /// Stage status implied by the completion flags.
    pub fn status(&self) -> StageStatus {
        if self.is_skipped {
            StageStatus::Skipped
        } else if !self.is_completed {
            StageStatus::Active
        } else if !self.is_successful {
            StageStatus::Failed
        } else if self.warning_count > 0 {
            StageStatus::CompletedWithWarnings
        } else {
            StageStatus::Completed
        }
    }

    pub fn sample(&self) -> StageProgressSample {
        StageProgressSample {
            stage: self.stage,
            observed_at: self.observed_at,
            progress_percent: self.percent,
            processed_units: self.processed_units,
            total_units: self.total_units,
            started_at: Some(self.started_at),
            is_completed: self.is_completed,
            is_successful: self.is_successful,
            is_skipped: self.is_skipped,
        }
    }
}

/// Destination for pipeline events.
pub trait EventSink {
    fn send(&mut self, event: PipelineEvent);
}

impl EventSink for Sender<PipelineEvent> {
    fn send(&mut self, event: PipelineEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = Sender::send(self, event);
    }
}

impl EventSink for Vec<PipelineEvent> {
    fn send(&mut self, event: PipelineEvent) {
        self.push(event);
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&mut self, _event: PipelineEvent) {}
}
