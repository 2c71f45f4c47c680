use std::collections::BTreeSet;
use std::time::Instant;

use geoval_core::{
    BatchReport, CancellationToken, EventSink, HistoryStore, NullSink, Pipeline, PipelineError,
    PipelineEvent, PipelineSettings, RunMonitor, RunPlan,
};
use geoval_ingest::{DataProvider, MemoryProvider};
use geoval_model::{
    Feature, FieldDef, FieldType, Geometry, GeometryType, LineString, Polygon, RunOutcome,
    StageKind, StageStatus,
};
use geoval_rules::{Criteria, GeometryCheck, GeometryRule, RuleSet, SchemaRule, TableRule, names};
use geoval_validate::{StageContext, StageError, StageInput, StageRunner};

fn square(x: f64, size: f64) -> Geometry {
    let ring: LineString = [(x, 0.0), (x + size, 0.0), (x + size, size), (x, size), (x, 0.0)]
        .into_iter()
        .collect();
    Geometry::Polygon(Polygon::new(ring, vec![]))
}

fn buildings(path: &str, sizes: &[f64]) -> MemoryProvider {
    let features = sizes
        .iter()
        .enumerate()
        .map(|(i, size)| {
            Feature::new((i + 1).to_string(), Some(square(i as f64 * 10.0, *size)))
                .with_attribute("BLD_ID", format!("B{i}").as_str())
        })
        .collect();
    let mut id = FieldDef::new("BLD_ID", FieldType::Text);
    id.is_primary_key = true;
    id.nullable = false;
    MemoryProvider::builder(path)
        .layer("building", Some(GeometryType::Polygon), vec![id], features)
        .build()
}

fn table_rule(table: &str) -> TableRule {
    TableRule {
        table_id: table.into(),
        table_name: None,
        geometry_type: Some(GeometryType::Polygon),
        required: true,
    }
}

fn schema_rule(column: &str, primary_key: bool) -> SchemaRule {
    SchemaRule {
        table_id: "building".into(),
        column: column.into(),
        field_type: None,
        length: None,
        precision: None,
        nullable: None,
        primary_key,
        unique: false,
        foreign_key: None,
    }
}

fn rules() -> RuleSet {
    RuleSet {
        tables: vec![table_rule("building")],
        geometries: vec![GeometryRule {
            table_id: "building".into(),
            geometry_type: None,
            checks: [GeometryCheck::SmallPolygon].into_iter().collect(),
        }],
        criteria: Criteria::new().with(names::MIN_POLYGON_AREA, 1.0),
        ..RuleSet::default()
    }
}

fn eager_settings() -> PipelineSettings {
    PipelineSettings {
        progress_interval: 1,
        ..PipelineSettings::default()
    }
}

fn progress_events(events: &[PipelineEvent]) -> Vec<&geoval_core::ProgressEvent> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::Progress(progress) => Some(progress.as_ref()),
            _ => None,
        })
        .collect()
}

#[test]
fn completion_policy_per_stage() {
    let provider = buildings("memory://a", &[0.5, 2.0]);
    let pipeline = Pipeline::new(rules(), eager_settings());
    let mut events = Vec::new();
    let result = pipeline
        .run(&provider, &RunPlan::new(), &CancellationToken::new(), &mut events)
        .unwrap();

    let statuses: Vec<_> = result.stages.iter().map(|stage| stage.status).collect();
    assert_eq!(
        statuses,
        vec![
            StageStatus::Completed,
            StageStatus::Skipped,
            StageStatus::Failed,
            StageStatus::Skipped,
            StageStatus::Skipped,
        ]
    );
    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(result.error_count(), 1);
    assert!(!result.is_valid());

    assert!(matches!(events.first(), Some(PipelineEvent::TargetStarted { index: 0, total: 1, .. })));
    assert!(matches!(events.last(), Some(PipelineEvent::TargetFinished { index: 0, .. })));

    let progress = progress_events(&events);
    for stage in StageKind::ALL {
        let snapshots = progress
            .iter()
            .filter(|event| event.stage == stage && event.partial_result.is_some())
            .count();
        assert_eq!(snapshots, 1, "one partial result for {stage}");
    }
    let geometry_done = progress
        .iter()
        .find(|event| event.stage == StageKind::Geometry && event.is_completed)
        .unwrap();
    assert!(!geometry_done.is_successful);
    assert_eq!(geometry_done.error_count, 1);
    let partial = geometry_done.partial_result.as_ref().unwrap();
    assert_eq!(partial.stage(StageKind::Table).status, StageStatus::Completed);
    assert_eq!(partial.stage(StageKind::Geometry).findings.len(), 1);

    let overall: Vec<f64> = progress.iter().map(|event| event.overall_percent).collect();
    assert!(overall.windows(2).all(|pair| pair[0] <= pair[1] + 1e-9));
    assert!((overall.last().copied().unwrap() - 100.0).abs() < 1e-9);
}

#[test]
fn missing_threshold_is_rejected_before_any_stage() {
    let provider = buildings("memory://a", &[2.0]);
    let mut rules = rules();
    rules.criteria = Criteria::new();
    let pipeline = Pipeline::new(rules, eager_settings());
    let mut events = Vec::new();
    let error = pipeline
        .run(&provider, &RunPlan::new(), &CancellationToken::new(), &mut events)
        .unwrap_err();
    assert!(matches!(error, PipelineError::Configuration(_)));
    assert!(events.is_empty());

    let plan = RunPlan::new().skip(StageKind::Geometry);
    let result = pipeline
        .run(&provider, &plan, &CancellationToken::new(), &mut NullSink)
        .unwrap();
    assert_eq!(result.stage(StageKind::Geometry).status, StageStatus::Skipped);
}

/// Cancels the run once the schema stage has processed two features.
struct CancelDuringSchema {
    token: CancellationToken,
    events: Vec<PipelineEvent>,
}

impl EventSink for CancelDuringSchema {
    fn send(&mut self, event: PipelineEvent) {
        if let PipelineEvent::Progress(progress) = &event
            && progress.stage == StageKind::Schema
            && !progress.is_completed
            && progress.processed_units >= 2
        {
            self.token.cancel();
        }
        self.events.push(event);
    }
}

#[test]
fn cancellation_mid_stage_keeps_partial_findings() {
    let provider = buildings("memory://a", &[2.0, 2.0, 2.0, 2.0, 2.0]);
    let mut rules = rules();
    rules.tables.push(table_rule("road"));
    rules.schemas = vec![schema_rule("BLD_ID", true), schema_rule("HEIGHT", false)];
    let pipeline = Pipeline::new(rules, eager_settings());
    let token = CancellationToken::new();
    let mut sink = CancelDuringSchema {
        token: token.clone(),
        events: Vec::new(),
    };

    let error = pipeline
        .run(&provider, &RunPlan::new(), &token, &mut sink)
        .unwrap_err();
    let partial = error.partial_result().unwrap();
    assert_eq!(partial.outcome, RunOutcome::Cancelled);
    assert!(!partial.is_valid());

    let table = partial.stage(StageKind::Table);
    assert_eq!(table.status, StageStatus::Failed);
    assert!(table.findings.iter().any(|issue| issue.rule() == "layer_missing"));

    let schema = partial.stage(StageKind::Schema);
    assert_eq!(schema.status, StageStatus::Active);
    assert_eq!(schema.processed_units, 2);
    let rules_hit: Vec<&str> = schema.findings.iter().map(|issue| issue.rule()).collect();
    assert_eq!(rules_hit, vec!["column_missing"]);

    for stage in [StageKind::Geometry, StageKind::Attribute, StageKind::Relation] {
        assert_eq!(partial.stage(stage).status, StageStatus::NotStarted);
    }
    assert!(matches!(
        sink.events.last(),
        Some(PipelineEvent::TargetFinished { result, .. }) if result.outcome == RunOutcome::Cancelled
    ));
}

/// Runner that does its work without reporting progress.
struct Quiet(StageKind, u64);

impl StageRunner for Quiet {
    fn kind(&self) -> StageKind {
        self.0
    }

    fn estimate_units(&self, _input: &StageInput<'_>) -> u64 {
        self.1
    }

    fn run(&self, _input: &StageInput<'_>, _ctx: &mut dyn StageContext) -> geoval_validate::Result<()> {
        Ok(())
    }
}

struct Broken;

impl StageRunner for Broken {
    fn kind(&self) -> StageKind {
        StageKind::Table
    }

    fn estimate_units(&self, _input: &StageInput<'_>) -> u64 {
        1
    }

    fn run(&self, _input: &StageInput<'_>, _ctx: &mut dyn StageContext) -> geoval_validate::Result<()> {
        Err(StageError::Pattern {
            pattern: "[".into(),
            message: "unclosed character class".into(),
        })
    }
}

#[test]
fn silent_stage_gets_synthesized_terminal_event() {
    let provider = buildings("memory://a", &[2.0]);
    let pipeline = Pipeline::new(rules(), eager_settings())
        .with_runners(vec![Box::new(Quiet(StageKind::Table, 7))]);
    let mut events = Vec::new();
    let result = pipeline
        .run(&provider, &RunPlan::new(), &CancellationToken::new(), &mut events)
        .unwrap();
    assert_eq!(result.stage(StageKind::Table).status, StageStatus::Completed);

    let progress = progress_events(&events);
    let closing = progress.iter().find(|event| event.is_completed).unwrap();
    assert!(closing.synthesized);
    assert_eq!(closing.percent, 100.0);
    assert_eq!((closing.processed_units, closing.total_units), (7, 7));
}

#[test]
fn stage_error_fails_stage_and_run_continues() {
    let provider = buildings("memory://a", &[2.0]);
    let pipeline = Pipeline::new(rules(), eager_settings())
        .with_runners(vec![Box::new(Broken), Box::new(Quiet(StageKind::Geometry, 1))]);
    let result = pipeline
        .run(&provider, &RunPlan::new(), &CancellationToken::new(), &mut NullSink)
        .unwrap();
    let table = result.stage(StageKind::Table);
    assert_eq!(table.status, StageStatus::Failed);
    assert!(table.message.as_deref().unwrap().contains("unclosed character class"));
    assert_eq!(result.stage(StageKind::Geometry).status, StageStatus::Completed);
}

fn batch(paths: &[&str]) -> Vec<Box<dyn DataProvider>> {
    paths
        .iter()
        .map(|path| Box::new(buildings(path, &[2.0, 3.0])) as Box<dyn DataProvider>)
        .collect()
}

#[test]
fn batch_runs_targets_in_order() {
    let pipeline = Pipeline::new(rules(), eager_settings());
    let mut events = Vec::new();
    let report = pipeline
        .run_batch(&batch(&["memory://a", "memory://b"]), &RunPlan::new(), &CancellationToken::new(), &mut events)
        .unwrap();
    assert!(report.is_valid());
    let targets: Vec<String> = report
        .results
        .iter()
        .map(|result| result.target_file.display().to_string())
        .collect();
    assert_eq!(targets, vec!["memory://a", "memory://b"]);

    let started: Vec<usize> = events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::TargetStarted { index, total: 2, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![0, 1]);
    let overall: Vec<f64> = progress_events(&events)
        .iter()
        .map(|event| event.overall_percent)
        .collect();
    assert!(overall.windows(2).all(|pair| pair[0] <= pair[1] + 1e-9));
    assert!(overall.iter().any(|percent| (*percent - 50.0).abs() < 1e-9));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::BatchFinished { completed: 2, total: 2, cancelled: false })
    ));

    // Replaying the events through a monitor ends on the last target.
    let mut monitor = RunMonitor::new(pipeline.settings());
    for event in &events {
        monitor.apply(event, Instant::now());
    }
    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.target, Some((1, 2)));
    assert_eq!(snapshot.overall_percent, 100.0);
    assert_eq!(
        snapshot.stage(StageKind::Geometry).unwrap().status,
        StageStatus::Completed
    );
}

#[test]
fn cancelled_batch_stops_before_next_target() {
    let pipeline = Pipeline::new(rules(), eager_settings());
    let token = CancellationToken::new();
    token.cancel();
    let report: BatchReport = pipeline
        .run_batch(&batch(&["memory://a", "memory://b"]), &RunPlan::new(), &token, &mut NullSink)
        .unwrap();
    assert!(report.cancelled);
    assert!(report.results.is_empty());
    assert!(!report.is_valid());
}

#[test]
fn worker_thread_streams_events() {
    let pipeline = Pipeline::new(rules(), eager_settings());
    let handle = pipeline.spawn(
        batch(&["memory://a", "memory://b", "memory://c"]),
        RunPlan::new(),
        CancellationToken::new(),
    );
    let events: Vec<PipelineEvent> = handle.events().iter().collect();
    let report = handle.join().unwrap();
    assert_eq!(report.results.len(), 3);
    let finished: BTreeSet<usize> = events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::TargetFinished { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(finished, BTreeSet::from([0, 1, 2]));
}

#[test]
fn completed_runs_are_recorded_in_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::new(dir.path().join("history").join("runs.jsonl"));
    let pipeline = Pipeline::new(rules(), eager_settings())
        .with_history(store.clone())
        .unwrap();
    let provider = buildings("memory://a", &[2.0, 3.0, 4.0]);
    pipeline
        .run(&provider, &RunPlan::new(), &CancellationToken::new(), &mut NullSink)
        .unwrap();
    pipeline
        .run(&provider, &RunPlan::new(), &CancellationToken::new(), &mut NullSink)
        .unwrap();

    let records = store.load().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].feature_count, 3);
    assert_eq!(records[0].table_count, 1);
    assert!(records[0].stage_durations.contains_key(&3));
    assert!(!records[0].stage_durations.contains_key(&2));

    let reloaded = Pipeline::new(rules(), eager_settings()).with_history(store).unwrap();
    let context = provider.describe().unwrap();
    assert!(reloaded.predictions(&context).contains_key(&StageKind::Geometry));
}
