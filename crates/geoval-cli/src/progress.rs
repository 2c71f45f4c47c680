//! Live progress bar fed from [`MonitorSnapshot`]s.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use geoval_core::{AlertSeverity, AlertsAggregated, MonitorSnapshot};
use geoval_model::StageStatus;

use crate::summary::format_duration;

const TEMPLATE: &str = "{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}";

pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(enabled: bool) -> Self {
        let bar = if enabled {
            ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr())
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }

    pub fn update(&self, snapshot: &MonitorSnapshot) {
        self.bar.set_position(position(snapshot.overall_percent));
        self.bar.set_message(status_line(snapshot));
        self.bar.tick();
    }

    pub fn report_alerts(&self, aggregated: &AlertsAggregated) {
        for alert in aggregated.alerts.iter().filter(|alert| !alert.cleared) {
            if alert.severity == AlertSeverity::Info {
                continue;
            }
            let line = match &alert.detail {
                Some(detail) => format!("{}: {} ({detail})", alert.severity, alert.message),
                None => format!("{}: {}", alert.severity, alert.message),
            };
            self.bar.println(line);
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// One-line description of the running stage and the remaining time.
pub fn status_line(snapshot: &MonitorSnapshot) -> String {
    let mut parts = Vec::new();
    if let Some((index, total)) = snapshot.target {
        parts.push(format!("target {}/{total}", index + 1));
    }
    if let Some(active) = snapshot
        .stages
        .iter()
        .find(|summary| summary.status == StageStatus::Active)
    {
        parts.push(format!(
            "{} {:.0}%",
            active.definition.display_name, active.progress_percent
        ));
    }
    if let Some(remaining) = snapshot.eta.estimated_remaining {
        parts.push(format!("eta {}", format_duration(remaining)));
    }
    parts.join(" | ")
}

fn position(percent: f64) -> u64 {
    percent.clamp(0.0, 100.0).round() as u64
}
