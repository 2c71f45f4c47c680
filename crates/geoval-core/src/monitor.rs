//! Single owner of stage summaries, alerts and ETA for observers.
//!
//! The monitor consumes [`PipelineEvent`]s in order and exposes immutable
//! [`MonitorSnapshot`]s. Stage summaries live in a dense arena indexed by
//! stage number and are created on first reference.

use std::collections::BTreeMap;
use std::time::Instant;

use crossbeam_channel::Receiver;
use tracing::debug;

use geoval_model::{RunContext, STAGE_COUNT, StageKind, StageStatus};

use crate::alerts::{AlertAggregator, AlertsAggregated, ClearReason};
use crate::board::{Alert, AlertSeverity, StageSummary};
use crate::config::PipelineSettings;
use crate::estimate::{Estimator, OverallEtaResult};
use crate::event::{PipelineEvent, ProgressEvent};

/// Immutable view of the monitor state.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSnapshot {
    /// Summaries created so far, in stage order.
    pub stages: Vec<StageSummary>,
    pub alerts: Vec<Alert>,
    pub eta: OverallEtaResult,
    pub overall_percent: f64,
    /// `(index, total)` of the current target.
    pub target: Option<(usize, usize)>,
}

impl MonitorSnapshot {
    pub fn stage(&self, stage: StageKind) -> Option<&StageSummary> {
        self.stages.iter().find(|summary| summary.stage() == stage)
    }
}

pub struct RunMonitor {
    summaries: [Option<StageSummary>; STAGE_COUNT],
    estimator: Estimator,
    aggregator: AlertAggregator,
    overall_percent: f64,
    target: Option<(usize, usize)>,
}

impl RunMonitor {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            summaries: Default::default(),
            estimator: Estimator::new(settings.estimator),
            aggregator: AlertAggregator::new(settings.alert_debounce()),
            overall_percent: 0.0,
            target: None,
        }
    }

    pub fn subscribe_alerts(&mut self) -> Receiver<AlertsAggregated> {
        self.aggregator.subscribe()
    }

    /// Summary for a stage number, created on first use; `None` outside the
    /// catalog.
    pub fn get_or_create_stage(&mut self, number: u8) -> Option<&mut StageSummary> {
        let stage = StageKind::from_number(number)?;
        Some(slot(&mut self.summaries, stage))
    }

    pub fn stage(&self, stage: StageKind) -> Option<&StageSummary> {
        self.summaries[stage.index()].as_ref()
    }

    /// Seed the estimator for a target.
    pub fn seed(&mut self, predictions: &BTreeMap<StageKind, f64>, context: &RunContext) {
        self.estimator.seed_predictions(predictions, context);
        for summary in self.summaries.iter_mut().flatten() {
            summary.predicted_duration = self.estimator.prediction(summary.stage());
            summary.estimated_remaining =
                self.estimator.stage_eta(summary.stage()).estimated_remaining;
        }
    }

    pub fn apply(&mut self, event: &PipelineEvent, now: Instant) {
        match event {
            PipelineEvent::TargetStarted {
                index,
                total,
                context,
                predictions,
            } => {
                self.reset();
                self.seed(predictions, context);
                self.target = Some((*index, *total));
                self.overall_percent = percent_of_batch(*index, *total);
            }
            PipelineEvent::Progress(progress) => self.apply_progress(progress, now),
            PipelineEvent::TargetFinished { index, .. } => {
                debug!(index, "target finished");
            }
            PipelineEvent::BatchFinished { cancelled, .. } => {
                if !cancelled {
                    self.overall_percent = 100.0;
                }
            }
        }
    }

    pub fn apply_progress(&mut self, event: &ProgressEvent, now: Instant) {
        let stage = event.stage;
        let next = event.status();
        let summary = slot(&mut self.summaries, stage);
        let previous = summary.status;

        let recovering = previous == StageStatus::Failed
            && matches!(
                next,
                StageStatus::Active | StageStatus::Completed | StageStatus::CompletedWithWarnings
            );
        if !recovering && !previous.can_advance_to(next) {
            debug!(stage = %stage, ?previous, ?next, "stale progress event ignored");
            return;
        }
        if recovering {
            debug!(stage = %stage, "failed stage restarted");
            self.aggregator
                .clear_alert(stage, ClearReason::ProgressRecovered, now);
            summary.started_at = None;
        }

        summary.status = next;
        summary.progress_percent = if next.is_terminal() {
            100.0
        } else if event.percent.is_finite() {
            event.percent.clamp(0.0, 100.0)
        } else {
            summary.progress_percent
        };
        summary.set_units(event.processed_units, event.total_units);
        if summary.started_at.is_none() {
            summary.started_at = Some(event.started_at);
        }
        summary.last_updated_at = Some(now);

        let eta = self.estimator.update_progress(&event.sample());
        summary.estimated_remaining = eta.estimated_remaining;
        summary.confidence = eta.confidence;
        summary.predicted_duration = self.estimator.prediction(stage);

        let raised = match next {
            StageStatus::Failed => Some(
                Alert::new(
                    stage,
                    AlertSeverity::Error,
                    event
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("{} failed", stage.display_name())),
                )
                .with_detail(format!("{} error(s)", event.error_count)),
            ),
            StageStatus::CompletedWithWarnings => Some(
                Alert::new(
                    stage,
                    AlertSeverity::Warning,
                    event
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("{} warning(s)", event.warning_count)),
                ),
            ),
            _ => None,
        };
        if let Some(alert) = raised {
            self.aggregator.enqueue_alert(alert.with_status(next), now);
        }
        summary.alert = self.aggregator.alert(stage).cloned();

        if event.overall_percent.is_finite() {
            self.overall_percent = event.overall_percent.clamp(0.0, 100.0);
        }
    }

    pub fn register_alert(&mut self, alert: Alert, now: Instant) {
        let stage = alert.stage;
        self.aggregator.enqueue_alert(alert, now);
        self.sync_alert(stage);
    }

    /// Manual dismissal: the alert stays as a cleared `Info` entry.
    pub fn dismiss_alert(&mut self, stage: StageKind, now: Instant) -> bool {
        let changed = self.aggregator.clear_alert(stage, ClearReason::Manual, now);
        self.sync_alert(stage);
        changed
    }

    pub fn resolve_alert(&mut self, stage: StageKind, now: Instant) -> bool {
        let changed = self.aggregator.clear_alert(stage, ClearReason::Resolved, now);
        self.sync_alert(stage);
        changed
    }

    pub fn poll_alerts(&mut self, now: Instant) -> Option<AlertsAggregated> {
        self.aggregator.poll(now)
    }

    pub fn flush_alerts(&mut self) -> AlertsAggregated {
        self.aggregator.flush()
    }

    /// Reset every summary in place and forget ETA and alert state.
    pub fn reset(&mut self) {
        for summary in self.summaries.iter_mut().flatten() {
            summary.reset();
        }
        self.estimator.reset();
        self.aggregator.reset();
        self.overall_percent = 0.0;
        self.target = None;
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            stages: self.summaries.iter().flatten().cloned().collect(),
            alerts: self.aggregator.current(),
            eta: self.estimator.overall_eta(),
            overall_percent: self.overall_percent,
            target: self.target,
        }
    }

    fn sync_alert(&mut self, stage: StageKind) {
        let alert = self.aggregator.alert(stage).cloned();
        slot(&mut self.summaries, stage).alert = alert;
    }
}

fn slot(summaries: &mut [Option<StageSummary>; STAGE_COUNT], stage: StageKind) -> &mut StageSummary {
    summaries[stage.index()].get_or_insert_with(|| StageSummary::new(stage))
}

fn percent_of_batch(index: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        index as f64 * 100.0 / total as f64
    }
}
