use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, info_span, warn};

use geoval_core::{
    BatchReport, CancellationToken, HistoryStore, Pipeline, PipelineSettings, RunMonitor, RunPlan,
};
use geoval_ingest::{DataProvider, JsonDatasetProvider};
use geoval_rules::load_rule_set;
use geoval_validate::Scope;

use crate::cli::ValidateArgs;
use crate::progress::ProgressReporter;
use crate::report::{ReportFile, write_report};
use crate::summary::print_stage_catalog;

pub fn run_stages() -> Result<()> {
    print_stage_catalog();
    Ok(())
}

/// Exit status for a finished batch: 0 valid, 1 invalid, 2 cancelled.
pub fn exit_code(report: &BatchReport) -> i32 {
    if report.cancelled {
        2
    } else if report.is_valid() {
        0
    } else {
        1
    }
}

/// Run a batch that Ctrl-C cancels.
pub fn run_validate(args: &ValidateArgs) -> Result<BatchReport> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    run_validate_with(args, cancel)
}

pub fn run_validate_with(args: &ValidateArgs, cancel: CancellationToken) -> Result<BatchReport> {
    let _span = info_span!("validate", targets = args.targets.len()).entered();

    let rules = load_rule_set(&args.rules)
        .with_context(|| format!("load rules from {}", args.rules.display()))?;
    let settings = PipelineSettings::load_or_default(args.config.as_deref())
        .context("load pipeline settings")?;
    let plan = build_plan(args);
    plan.validate(&rules).context("check rule configuration")?;

    let mut providers: Vec<Box<dyn DataProvider>> = Vec::with_capacity(args.targets.len());
    for target in &args.targets {
        let provider = JsonDatasetProvider::open(target)
            .with_context(|| format!("open dataset {}", target.display()))?;
        providers.push(Box::new(provider));
    }

    let mut pipeline = Pipeline::new(rules, settings.clone());
    if let Some(path) = history_path(args, &settings) {
        pipeline = pipeline
            .with_history(HistoryStore::new(&path))
            .with_context(|| format!("load run history {}", path.display()))?;
    }
    info!(
        targets = providers.len(),
        rules = pipeline.rules().rule_count(),
        "starting validation"
    );

    let mut monitor = RunMonitor::new(&settings);
    let progress = ProgressReporter::new(!args.no_progress);
    let handle = pipeline.spawn(providers, plan, cancel);
    for event in handle.events() {
        let now = Instant::now();
        monitor.apply(&event, now);
        progress.update(&monitor.snapshot());
        if let Some(aggregated) = monitor.poll_alerts(now) {
            progress.report_alerts(&aggregated);
        }
    }
    progress.report_alerts(&monitor.flush_alerts());
    progress.finish();

    let report = handle.join().context("run validation pipeline")?;
    if let Some(path) = &args.output {
        write_report(path, &ReportFile::from_batch(&report, Utc::now()))?;
        info!(path = %path.display(), "report written");
    }
    Ok(report)
}

/// Cancel `token` on the first Ctrl-C, from a dedicated signal thread.
fn cancel_on_interrupt(token: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("geoval-interrupt".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(error) => {
                    warn!(%error, "interrupt handler unavailable");
                    return;
                }
            };
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        warn!("interrupt received, cancelling validation");
                        token.cancel();
                    }
                    Err(error) => warn!(%error, "failed to listen for interrupt"),
                }
            });
        });
    if let Err(error) = spawned {
        warn!(%error, "failed to start interrupt handler");
    }
}

/// Stage skips and item restrictions from the command line.
pub fn build_plan(args: &ValidateArgs) -> RunPlan {
    let mut plan = RunPlan::new();
    for stage in &args.skip_stage {
        plan = plan.skip(*stage);
    }
    if !args.only.is_empty() {
        plan = plan.with_scope(Scope::only(args.only.iter().cloned()));
    }
    plan
}

fn history_path(args: &ValidateArgs, settings: &PipelineSettings) -> Option<PathBuf> {
    args.history
        .clone()
        .or_else(|| settings.history_path.clone())
}
