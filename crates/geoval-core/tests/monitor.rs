use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use geoval_core::{
    Alert, AlertSeverity, Estimator, EstimatorSettings, PipelineSettings, ProgressEvent,
    RunMonitor, StageProgressSample,
};
use geoval_model::{RunContext, StageKind, StageStatus};
use proptest::prelude::*;

fn progress(stage: StageKind, started: Instant, elapsed: f64, percent: f64) -> ProgressEvent {
    ProgressEvent {
        target_index: 0,
        stage,
        stage_name: stage.display_name(),
        percent,
        overall_percent: 0.0,
        processed_units: 0,
        total_units: 0,
        message: None,
        is_completed: false,
        is_successful: false,
        is_skipped: false,
        synthesized: false,
        error_count: 0,
        warning_count: 0,
        started_at: started,
        observed_at: started + Duration::from_secs_f64(elapsed),
        partial_result: None,
    }
}

fn finished(stage: StageKind, started: Instant, successful: bool, message: &str) -> ProgressEvent {
    ProgressEvent {
        is_completed: true,
        is_successful: successful,
        error_count: usize::from(!successful),
        message: Some(message.to_string()),
        ..progress(stage, started, 1.0, 100.0)
    }
}

fn monitor() -> RunMonitor {
    RunMonitor::new(&PipelineSettings::default())
}

fn seconds(duration: Option<Duration>) -> f64 {
    duration.map_or(0.0, |d| d.as_secs_f64())
}

#[test]
fn get_or_create_stage_is_idempotent() {
    let mut monitor = monitor();
    for number in 1..=5u8 {
        let first = monitor.get_or_create_stage(number).unwrap().clone();
        monitor.get_or_create_stage(number).unwrap().progress_percent = 0.0;
        let second = monitor.get_or_create_stage(number).unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(first.definition.number, number);
    }
    assert!(monitor.get_or_create_stage(0).is_none());
    assert!(monitor.get_or_create_stage(6).is_none());
    assert_eq!(monitor.snapshot().stages.len(), 5);
}

#[test]
fn seeded_eta_halves_with_half_progress() {
    let mut monitor = monitor();
    let predictions = BTreeMap::from([(StageKind::Table, 10.0), (StageKind::Schema, 5.0)]);
    monitor.seed(&predictions, &RunContext::default());
    assert!((seconds(monitor.snapshot().eta.estimated_remaining) - 15.0).abs() < 1.0);

    let start = Instant::now();
    monitor.apply_progress(&progress(StageKind::Table, start, 5.0, 50.0), start);
    let snapshot = monitor.snapshot();
    let table = snapshot.stage(StageKind::Table).unwrap();
    assert_eq!(table.status, StageStatus::Active);
    assert!((seconds(table.estimated_remaining) - 5.0).abs() < 1.0);
    assert!((seconds(snapshot.eta.estimated_remaining) - 10.0).abs() < 1.0);
    assert_eq!(table.predicted_duration, Some(Duration::from_secs(10)));
}

#[test]
fn failed_stage_raises_one_error_alert_and_recovers() {
    let mut monitor = monitor();
    let start = Instant::now();
    let failed = finished(StageKind::Geometry, start, false, "self-intersection found");
    monitor.apply_progress(&failed, start);
    monitor.apply_progress(&failed, start);

    let snapshot = monitor.snapshot();
    let geometry = snapshot.stage(StageKind::Geometry).unwrap();
    assert_eq!(geometry.status, StageStatus::Failed);
    assert_eq!(snapshot.alerts.len(), 1);
    let alert = &snapshot.alerts[0];
    assert_eq!(alert.key(), "geometry");
    assert_eq!(alert.severity, AlertSeverity::Error);
    assert_eq!(alert.message, "self-intersection found");
    assert_eq!(geometry.alert.as_ref(), Some(alert));

    let restarted = Instant::now();
    monitor.apply_progress(&progress(StageKind::Geometry, restarted, 1.0, 10.0), restarted);
    let snapshot = monitor.snapshot();
    let geometry = snapshot.stage(StageKind::Geometry).unwrap();
    assert!(snapshot.alerts.is_empty());
    assert!(geometry.alert.is_none());
    assert_eq!(geometry.status, StageStatus::Active);
    assert_eq!(geometry.progress_percent, 10.0);
}

#[test]
fn events_for_finished_stages_are_stale() {
    let mut monitor = monitor();
    let start = Instant::now();
    monitor.apply_progress(&finished(StageKind::Table, start, true, "done"), start);
    monitor.apply_progress(&progress(StageKind::Table, start, 2.0, 40.0), start);
    let table = monitor.stage(StageKind::Table).unwrap();
    assert_eq!(table.status, StageStatus::Completed);
    assert_eq!(table.progress_percent, 100.0);
}

#[test]
fn warnings_raise_warning_alert() {
    let mut monitor = monitor();
    let start = Instant::now();
    let event = ProgressEvent {
        warning_count: 2,
        ..finished(StageKind::Table, start, true, "2 warning(s)")
    };
    monitor.apply_progress(&event, start);
    let snapshot = monitor.snapshot();
    assert_eq!(
        snapshot.stage(StageKind::Table).unwrap().status,
        StageStatus::CompletedWithWarnings
    );
    assert_eq!(snapshot.alerts[0].severity, AlertSeverity::Warning);
}

#[test]
fn units_are_clamped_on_apply() {
    let mut monitor = monitor();
    let start = Instant::now();
    let event = ProgressEvent {
        processed_units: 12,
        total_units: 10,
        ..progress(StageKind::Schema, start, 1.0, 100.0)
    };
    monitor.apply_progress(&event, start);
    let schema = monitor.stage(StageKind::Schema).unwrap();
    assert_eq!(schema.processed_units, 10);
}

#[test]
fn dismissed_alert_is_kept_as_cleared_info() {
    let mut monitor = monitor();
    let now = Instant::now();
    monitor.register_alert(
        Alert::new(StageKind::Relation, AlertSeverity::Error, "points outside parcels"),
        now,
    );
    assert!(monitor.dismiss_alert(StageKind::Relation, now));
    let snapshot = monitor.snapshot();
    let alert = snapshot.stage(StageKind::Relation).unwrap().alert.as_ref().unwrap();
    assert!(alert.cleared);
    assert_eq!(alert.severity, AlertSeverity::Info);

    assert!(monitor.resolve_alert(StageKind::Relation, now));
    assert!(monitor.snapshot().alerts.is_empty());
}

#[test]
fn wait_for_debounce_before_emitting() {
    let settings = PipelineSettings {
        alert_debounce_ms: 100,
        ..PipelineSettings::default()
    };
    let mut monitor = RunMonitor::new(&settings);
    let receiver = monitor.subscribe_alerts();
    let start = Instant::now();
    monitor.apply_progress(&finished(StageKind::Schema, start, false, "duplicate keys"), start);
    assert!(monitor.poll_alerts(start + Duration::from_millis(50)).is_none());
    let emitted = monitor.poll_alerts(start + Duration::from_millis(100)).unwrap();
    assert_eq!(emitted.alerts.len(), 1);
    assert_eq!(receiver.try_recv().unwrap(), emitted);
}

#[test]
fn reset_reseed_and_replay_reproduce_state() {
    let start = Instant::now();
    let predictions = BTreeMap::from([(StageKind::Table, 4.0), (StageKind::Geometry, 20.0)]);
    let context = RunContext {
        feature_count: 100,
        ..RunContext::default()
    };
    let events = vec![
        progress(StageKind::Table, start, 1.0, 25.0),
        progress(StageKind::Table, start, 2.0, 60.0),
        finished(StageKind::Table, start, true, "done"),
        progress(StageKind::Geometry, start, 3.0, 10.0),
        finished(StageKind::Geometry, start, false, "spike found"),
    ];

    let mut monitor = monitor();
    monitor.seed(&predictions, &context);
    for event in &events {
        monitor.apply_progress(event, event.observed_at);
    }
    let first = monitor.snapshot();

    monitor.reset();
    assert!(monitor.snapshot().alerts.is_empty());
    monitor.seed(&predictions, &context);
    for event in &events {
        monitor.apply_progress(event, event.observed_at);
    }
    assert_eq!(monitor.snapshot(), first);
}

#[derive(Debug, Clone)]
enum Op {
    Register(u8, bool),
    Fail(u8),
    Restart(u8),
    Complete(u8),
    Dismiss(u8),
    Resolve(u8),
}

fn op() -> impl Strategy<Value = Op> {
    let stage = 1u8..=5;
    prop_oneof![
        (stage.clone(), any::<bool>()).prop_map(|(n, error)| Op::Register(n, error)),
        stage.clone().prop_map(Op::Fail),
        stage.clone().prop_map(Op::Restart),
        stage.clone().prop_map(Op::Complete),
        stage.clone().prop_map(Op::Dismiss),
        stage.prop_map(Op::Resolve),
    ]
}

proptest! {
    #[test]
    fn at_most_one_alert_per_stage(ops in proptest::collection::vec(op(), 0..40)) {
        let mut monitor = monitor();
        let start = Instant::now();
        for (step, op) in ops.into_iter().enumerate() {
            let now = start + Duration::from_millis(step as u64 * 10);
            match op {
                Op::Register(n, error) => {
                    let stage = StageKind::from_number(n).unwrap();
                    let severity = if error { AlertSeverity::Error } else { AlertSeverity::Warning };
                    monitor.register_alert(Alert::new(stage, severity, format!("step {step}")), now);
                }
                Op::Fail(n) => {
                    let stage = StageKind::from_number(n).unwrap();
                    monitor.apply_progress(&finished(stage, start, false, "failed"), now);
                }
                Op::Restart(n) => {
                    let stage = StageKind::from_number(n).unwrap();
                    monitor.apply_progress(&progress(stage, now, 0.0, 5.0), now);
                }
                Op::Complete(n) => {
                    let stage = StageKind::from_number(n).unwrap();
                    monitor.apply_progress(&finished(stage, start, true, "ok"), now);
                }
                Op::Dismiss(n) => {
                    monitor.dismiss_alert(StageKind::from_number(n).unwrap(), now);
                }
                Op::Resolve(n) => {
                    monitor.resolve_alert(StageKind::from_number(n).unwrap(), now);
                }
            }
            let snapshot = monitor.snapshot();
            let keys: BTreeSet<&str> = snapshot.alerts.iter().map(Alert::key).collect();
            prop_assert_eq!(keys.len(), snapshot.alerts.len());
            for summary in &snapshot.stages {
                let live = snapshot.alerts.iter().find(|alert| alert.stage == summary.stage());
                prop_assert_eq!(summary.alert.as_ref(), live);
            }
        }
    }

    #[test]
    fn confidence_never_drops_while_progress_grows(
        steps in proptest::collection::vec((0.1f64..10.0, 0.0f64..30.0), 1..40),
        prior in proptest::option::of(0.0f64..500.0),
    ) {
        let mut estimator = Estimator::new(EstimatorSettings::default());
        let priors: BTreeMap<StageKind, f64> = prior.map(|p| (StageKind::Geometry, p)).into_iter().collect();
        estimator.seed_predictions(&priors, &RunContext::default());
        let start = Instant::now();
        let (mut percent, mut elapsed, mut confidence) = (0.0, 0.0, 0.0);
        for (step, delay) in steps {
            percent += step;
            elapsed += delay;
            if percent >= 100.0 {
                break;
            }
            let eta = estimator.update_progress(&StageProgressSample {
                stage: StageKind::Geometry,
                observed_at: start + Duration::from_secs_f64(elapsed),
                progress_percent: percent,
                processed_units: 0,
                total_units: 0,
                started_at: Some(start),
                is_completed: false,
                is_successful: false,
                is_skipped: false,
            });
            prop_assert!(!eta.degenerate);
            prop_assert!(eta.confidence >= confidence);
            prop_assert!((0.0..=1.0).contains(&eta.confidence));
            confidence = eta.confidence;
        }
    }

    #[test]
    fn overall_eta_is_sum_of_stage_estimates(
        priors in proptest::collection::vec(proptest::option::of(0.0f64..1000.0), 5),
        progress_of in proptest::collection::vec(proptest::option::of((0.0f64..100.0, any::<bool>())), 5),
    ) {
        let mut estimator = Estimator::new(EstimatorSettings::default());
        let seeded: BTreeMap<StageKind, f64> = StageKind::ALL
            .into_iter()
            .zip(&priors)
            .filter_map(|(stage, prior)| prior.map(|p| (stage, p)))
            .collect();
        estimator.seed_predictions(&seeded, &RunContext::default());
        let start = Instant::now();
        for (stage, sample) in StageKind::ALL.into_iter().zip(&progress_of) {
            if let Some((percent, completed)) = sample {
                estimator.update_progress(&StageProgressSample {
                    stage,
                    observed_at: start + Duration::from_secs(10),
                    progress_percent: *percent,
                    processed_units: 0,
                    total_units: 0,
                    started_at: Some(start),
                    is_completed: *completed,
                    is_successful: true,
                    is_skipped: false,
                });
            }
        }
        let overall = estimator.overall_eta();
        let sum: f64 = overall.stages.iter().map(|stage| seconds(stage.estimated_remaining)).sum();
        match overall.estimated_remaining {
            None => prop_assert!(sum <= 1e-9),
            Some(total) => prop_assert!((total.as_secs_f64() - sum).abs() <= 1.0),
        }
    }
}
