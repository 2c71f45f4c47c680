//! Stage orchestration for one target or a sequential batch of targets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::{Receiver, unbounded};
use tracing::{debug, info, info_span, warn};

use geoval_ingest::DataProvider;
use geoval_model::{
    Issue, RunContext, RunHistoryRecord, RunOutcome, STAGE_COUNT, Severity, StageKind,
    StageStatus, ValidationResult,
};
use geoval_rules::{ConfigError, RuleSet};
use geoval_validate::{Scope, StageContext, StageError, StageInput, StageRunner, default_runners};

use crate::config::PipelineSettings;
use crate::error::{HistoryError, PipelineError};
use crate::event::{EventSink, PipelineEvent, ProgressEvent};
use crate::history::{HistoryStore, PredictionModel};

/// Cooperative cancellation flag shared between the caller and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stage enablement and rule-item selection for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPlan {
    skipped: BTreeSet<StageKind>,
    scope: Scope,
}

impl RunPlan {
    /// Every stage over every rule item.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn skip(mut self, stage: StageKind) -> Self {
        self.skipped.insert(stage);
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn is_enabled(&self, stage: StageKind) -> bool {
        !self.skipped.contains(&stage)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Every threshold an enabled check needs must resolve before any
    /// stage runs.
    pub fn validate(&self, rules: &RuleSet) -> Result<(), ConfigError> {
        if self.is_enabled(StageKind::Geometry) {
            rules.check_criteria(|table| self.scope.includes(table))?;
        }
        Ok(())
    }
}

/// A target that could not be validated at all.
#[derive(Debug)]
pub struct TargetFailure {
    pub target: PathBuf,
    pub error: PipelineError,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Results in target order; a cancelled target contributes its partial
    /// result.
    pub results: Vec<ValidationResult>,
    pub failures: Vec<TargetFailure>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn is_valid(&self) -> bool {
        !self.cancelled
            && self.failures.is_empty()
            && self.results.iter().all(ValidationResult::is_valid)
    }
}

/// Runs the stage sequence against datasets.
pub struct Pipeline {
    rules: RuleSet,
    settings: PipelineSettings,
    runners: Vec<Box<dyn StageRunner>>,
    model: PredictionModel,
    history: Option<HistoryStore>,
}

impl Pipeline {
    pub fn new(rules: RuleSet, settings: PipelineSettings) -> Self {
        Self {
            rules,
            settings,
            runners: default_runners(),
            model: PredictionModel::default(),
            history: None,
        }
    }

    /// Replace the stage runners; they run in the order given.
    #[must_use]
    pub fn with_runners(mut self, runners: Vec<Box<dyn StageRunner>>) -> Self {
        self.runners = runners;
        self
    }

    /// Seed predictions from a history store and append a record after
    /// every completed run.
    pub fn with_history(mut self, store: HistoryStore) -> Result<Self, HistoryError> {
        self.model = store.prediction_model()?;
        let fitted: Vec<(&str, usize)> = StageKind::ALL
            .iter()
            .filter_map(|stage| self.model.stage_fit(*stage).map(|fit| (stage.id(), fit.samples)))
            .collect();
        info!(
            path = %store.path().display(),
            stages = ?fitted,
            "prediction model fitted from run history"
        );
        self.history = Some(store);
        Ok(self)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Predicted seconds per stage for a target.
    pub fn predictions(&self, context: &RunContext) -> BTreeMap<StageKind, f64> {
        self.model.predict(context)
    }

    /// Validate one target.
    pub fn run(
        &self,
        provider: &dyn DataProvider,
        plan: &RunPlan,
        cancel: &CancellationToken,
        sink: &mut dyn EventSink,
    ) -> Result<ValidationResult, PipelineError> {
        plan.validate(&self.rules)?;
        self.run_target(provider, plan, cancel, sink, Position { index: 0, total: 1 })
    }

    /// Validate targets one after another.
    ///
    /// Only a configuration error aborts the batch; a target whose dataset
    /// cannot be read is recorded as a failure and the batch moves on.
    pub fn run_batch(
        &self,
        providers: &[Box<dyn DataProvider>],
        plan: &RunPlan,
        cancel: &CancellationToken,
        sink: &mut dyn EventSink,
    ) -> Result<BatchReport, PipelineError> {
        plan.validate(&self.rules)?;
        let total = providers.len();
        let mut report = BatchReport::default();

        for (index, provider) in providers.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.run_target(provider.as_ref(), plan, cancel, sink, Position { index, total }) {
                Ok(result) => report.results.push(result),
                Err(PipelineError::Cancelled(partial)) => {
                    report.results.push(*partial);
                    report.cancelled = true;
                    break;
                }
                Err(error @ PipelineError::Configuration(_)) => return Err(error),
                Err(error) => {
                    warn!(target = %provider.target_path().display(), %error, "target failed");
                    report.failures.push(TargetFailure {
                        target: provider.target_path().to_path_buf(),
                        error,
                    });
                }
            }
        }

        sink.send(PipelineEvent::BatchFinished {
            completed: report.results.len(),
            total,
            cancelled: report.cancelled,
        });
        Ok(report)
    }

    /// Run a batch on a dedicated worker thread.
    pub fn spawn(
        self,
        providers: Vec<Box<dyn DataProvider>>,
        plan: RunPlan,
        cancel: CancellationToken,
    ) -> PipelineHandle {
        let (sender, events) = unbounded();
        let token = cancel.clone();
        let worker = std::thread::spawn(move || {
            let mut sender = sender;
            self.run_batch(&providers, &plan, &token, &mut sender)
        });
        PipelineHandle {
            events,
            cancel,
            worker,
        }
    }

    fn run_target(
        &self,
        provider: &dyn DataProvider,
        plan: &RunPlan,
        cancel: &CancellationToken,
        sink: &mut dyn EventSink,
        position: Position,
    ) -> Result<ValidationResult, PipelineError> {
        let target = provider.target_path().to_path_buf();
        let _span = info_span!("target", path = %target.display()).entered();
        let clock = Instant::now();
        let mut result = ValidationResult::new(&target, Utc::now());

        let context = provider.describe()?;
        let predictions = self.predictions(&context);
        info!(
            features = context.feature_count,
            layers = context.layer_count,
            "validating target"
        );
        sink.send(PipelineEvent::TargetStarted {
            index: position.index,
            total: position.total,
            context: context.clone(),
            predictions: predictions.clone(),
        });

        let shares = stage_shares(&self.settings, &predictions);
        let input = StageInput {
            provider,
            rules: &self.rules,
            scope: plan.scope(),
        };
        let mut done_share = 0.0;

        for runner in &self.runners {
            let stage = runner.kind();
            if cancel.is_cancelled() {
                return Err(cancelled(result, clock, position, sink));
            }
            let _stage_span = info_span!("stage", stage = %stage).entered();
            let frame = Frame {
                position,
                stage,
                started_at: Instant::now(),
                base: done_share,
                share: shares[stage.index()],
            };
            done_share += frame.share;

            let skip_reason = if !plan.is_enabled(stage) {
                Some("stage disabled")
            } else if input.selected_items(stage).is_empty() {
                Some("no rules selected")
            } else {
                None
            };
            if let Some(reason) = skip_reason {
                debug!(reason, "stage skipped");
                let stage_result = result.stage_mut(stage);
                stage_result.status = StageStatus::Skipped;
                stage_result.message = Some(reason.to_string());
                let mut event = frame.event(0, 0, 100.0);
                event.is_completed = true;
                event.is_successful = true;
                event.is_skipped = true;
                event.message = Some(reason.to_string());
                event.partial_result = Some(Box::new(result.clone()));
                sink.send(PipelineEvent::Progress(Box::new(event)));
                continue;
            }

            result.stage_mut(stage).status = StageStatus::Active;
            let estimate = runner.estimate_units(&input);
            let mut opening = frame.event(0, estimate, 0.0);
            opening.message = Some(format!("{} started", stage.display_name()));
            sink.send(PipelineEvent::Progress(Box::new(opening)));

            let mut tracker = StageTracker::new(
                &mut *sink,
                cancel,
                frame,
                self.settings.progress_interval,
                estimate,
            );
            let outcome = runner.run(&input, &mut tracker);
            let run = tracker.finish();

            let stage_result = result.stage_mut(stage);
            stage_result.findings = run.findings;
            stage_result.processed_units = run.processed;
            stage_result.total_units = run.total.max(run.processed);
            stage_result.elapsed = frame.started_at.elapsed();

            match outcome {
                Err(StageError::Cancelled) => {
                    info!(processed = run.processed, "stage interrupted by cancellation");
                    return Err(cancelled(result, clock, position, sink));
                }
                Err(error) => {
                    warn!(%error, "stage failed");
                    stage_result.status = StageStatus::Failed;
                    stage_result.message = Some(error.to_string());
                }
                Ok(()) => {
                    let errors = stage_result.error_count();
                    let warnings = stage_result.warning_count();
                    if errors > 0 {
                        stage_result.status = StageStatus::Failed;
                        stage_result.message =
                            Some(format!("{errors} error(s), {warnings} warning(s)"));
                    } else if warnings > 0 {
                        stage_result.status = StageStatus::CompletedWithWarnings;
                        stage_result.message = Some(format!("{warnings} warning(s)"));
                    } else {
                        stage_result.status = StageStatus::Completed;
                    }
                }
            }
            info!(
                status = ?stage_result.status,
                findings = stage_result.findings.len(),
                elapsed_ms = stage_result.elapsed.as_millis(),
                "stage finished"
            );

            let (processed, total) = if run.signals == 0 {
                let units = stage_result.total_units;
                (units, units)
            } else {
                (stage_result.processed_units, stage_result.total_units)
            };
            let mut closing = frame.event(processed, total, 100.0);
            closing.is_completed = true;
            closing.is_successful = stage_result.status != StageStatus::Failed;
            closing.synthesized = run.signals == 0;
            closing.error_count = stage_result.error_count();
            closing.warning_count = stage_result.warning_count();
            closing.message = stage_result.message.clone();
            closing.partial_result = Some(Box::new(result.clone()));
            sink.send(PipelineEvent::Progress(Box::new(closing)));
        }

        result.processing_time = clock.elapsed();
        info!(
            valid = result.is_valid(),
            errors = result.error_count(),
            warnings = result.warning_count(),
            elapsed_ms = result.processing_time.as_millis(),
            "target finished"
        );
        if let Some(store) = &self.history {
            let rule_count = self.rules.rule_count() as u64;
            let record = RunHistoryRecord::from_result(&result, &context, rule_count);
            if let Err(error) = store.append(&record) {
                warn!(%error, "failed to record run history");
            }
        }
        sink.send(PipelineEvent::TargetFinished {
            index: position.index,
            result: Box::new(result.clone()),
        });
        Ok(result)
    }
}

/// Close a run that observed cancellation; stages not reached stay
/// `NotStarted` and an interrupted stage stays `Active`.
fn cancelled(
    mut result: ValidationResult,
    clock: Instant,
    position: Position,
    sink: &mut dyn EventSink,
) -> PipelineError {
    result.outcome = RunOutcome::Cancelled;
    result.processing_time = clock.elapsed();
    info!("validation cancelled");
    sink.send(PipelineEvent::TargetFinished {
        index: position.index,
        result: Box::new(result.clone()),
    });
    PipelineError::Cancelled(Box::new(result))
}

/// A batch running on a worker thread.
pub struct PipelineHandle {
    events: Receiver<PipelineEvent>,
    cancel: CancellationToken,
    worker: JoinHandle<Result<BatchReport, PipelineError>>,
}

impl PipelineHandle {
    /// Events in emission order; disconnects when the worker finishes.
    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn join(self) -> Result<BatchReport, PipelineError> {
        self.worker.join().map_err(|_| PipelineError::WorkerPanicked)?
    }
}

#[derive(Debug, Clone, Copy)]
struct Position {
    index: usize,
    total: usize,
}

/// Fixed coordinates of the stage being reported on.
#[derive(Debug, Clone, Copy)]
struct Frame {
    position: Position,
    stage: StageKind,
    started_at: Instant,
    /// Share of the target completed before this stage, in `[0, 1]`.
    base: f64,
    share: f64,
}

impl Frame {
    fn event(&self, processed: u64, total: u64, percent: f64) -> ProgressEvent {
        ProgressEvent {
            target_index: self.position.index,
            stage: self.stage,
            stage_name: self.stage.display_name(),
            percent,
            overall_percent: self.overall_percent(percent),
            processed_units: processed,
            total_units: total,
            message: None,
            is_completed: false,
            is_successful: false,
            is_skipped: false,
            synthesized: false,
            error_count: 0,
            warning_count: 0,
            started_at: self.started_at,
            observed_at: Instant::now(),
            partial_result: None,
        }
    }

    /// `(completed_targets * 100 + current_target_percent) / N`.
    fn overall_percent(&self, stage_percent: f64) -> f64 {
        let target = ((self.base + self.share * stage_percent / 100.0) * 100.0).clamp(0.0, 100.0);
        let total = self.position.total.max(1) as f64;
        (self.position.index as f64 * 100.0 + target) / total
    }
}

/// Normalized stage shares: configured weight, else predicted seconds, else 1.
fn stage_shares(
    settings: &PipelineSettings,
    predictions: &BTreeMap<StageKind, f64>,
) -> [f64; STAGE_COUNT] {
    let mut weights = [1.0; STAGE_COUNT];
    for stage in StageKind::ALL {
        weights[stage.index()] = settings
            .stage_weight(stage)
            .or_else(|| predictions.get(&stage).copied().filter(|seconds| *seconds > 0.0))
            .unwrap_or(1.0);
    }
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        weights.map(|weight| weight / sum)
    } else {
        [1.0 / STAGE_COUNT as f64; STAGE_COUNT]
    }
}

fn percent(processed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (processed as f64 / total as f64 * 100.0).min(100.0)
    }
}

struct StageRun {
    findings: Vec<Issue>,
    processed: u64,
    total: u64,
    /// Progress reports made by the stage itself.
    signals: u64,
}

/// [`StageContext`] handed to a runner: collects findings and throttles
/// progress events.
struct StageTracker<'a> {
    sink: &'a mut dyn EventSink,
    cancel: &'a CancellationToken,
    frame: Frame,
    interval: u64,
    findings: Vec<Issue>,
    errors: usize,
    warnings: usize,
    processed: u64,
    total: u64,
    last_emitted: Option<u64>,
    signals: u64,
}

impl<'a> StageTracker<'a> {
    fn new(
        sink: &'a mut dyn EventSink,
        cancel: &'a CancellationToken,
        frame: Frame,
        interval: u64,
        total: u64,
    ) -> Self {
        Self {
            sink,
            cancel,
            frame,
            interval: interval.max(1),
            findings: Vec::new(),
            errors: 0,
            warnings: 0,
            processed: 0,
            total,
            last_emitted: None,
            signals: 0,
        }
    }

    fn finish(self) -> StageRun {
        StageRun {
            findings: self.findings,
            processed: self.processed,
            total: self.total,
            signals: self.signals,
        }
    }
}

impl StageContext for StageTracker<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn report_progress(&mut self, processed: u64, total: u64) {
        self.signals += 1;
        self.processed = processed;
        self.total = total;
        let due = self.last_emitted.is_none_or(|last| {
            processed >= last.saturating_add(self.interval) || processed >= total
        });
        if !due {
            return;
        }
        self.last_emitted = Some(processed);
        let mut event = self.frame.event(processed, total, percent(processed, total));
        event.error_count = self.errors;
        event.warning_count = self.warnings;
        event.message = Some(format!(
            "{}: {processed}/{total}",
            self.frame.stage.display_name()
        ));
        self.sink.send(PipelineEvent::Progress(Box::new(event)));
    }

    fn push_finding(&mut self, issue: Issue) {
        match issue.severity() {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
        self.findings.push(issue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_prefer_configured_weights() {
        let mut settings = PipelineSettings::default();
        settings.stage_weights.insert("geometry".into(), 5.0);
        let predictions = BTreeMap::from([(StageKind::Schema, 2.0), (StageKind::Geometry, 50.0)]);
        let shares = stage_shares(&settings, &predictions);
        assert!((shares.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((shares[StageKind::Geometry.index()] - 0.5).abs() < 1e-12);
        assert!((shares[StageKind::Schema.index()] - 0.2).abs() < 1e-12);
        assert!((shares[StageKind::Table.index()] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn batch_percent_combines_targets() {
        let frame = Frame {
            position: Position { index: 1, total: 4 },
            stage: StageKind::Relation,
            started_at: Instant::now(),
            base: 0.8,
            share: 0.2,
        };
        assert!((frame.overall_percent(50.0) - 47.5).abs() < 1e-9);
        assert!((frame.overall_percent(100.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_weights_fall_back_to_equal_shares() {
        let mut settings = PipelineSettings::default();
        for stage in StageKind::ALL {
            settings.stage_weights.insert(stage.id().into(), 0.0);
        }
        let shares = stage_shares(&settings, &BTreeMap::new());
        assert!(shares.iter().all(|share| (share - 0.2).abs() < 1e-12));
    }
}
