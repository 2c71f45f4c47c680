//! Run history and history-seeded duration predictions.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use geoval_model::{RunContext, RunHistoryRecord, StageKind};

use crate::error::HistoryError;

/// `seconds = intercept + slope * feature_count` for one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageFit {
    pub intercept: f64,
    pub slope: f64,
    pub samples: usize,
}

impl StageFit {
    pub fn predict(&self, feature_count: u64) -> f64 {
        let x = feature_count as f64;
        (self.intercept + self.slope * x).max(0.0)
    }
}

/// Per-stage linear models fitted from past runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionModel {
    fits: BTreeMap<StageKind, StageFit>,
}

impl PredictionModel {
    /// Ordinary least squares per stage; with fewer than two distinct
    /// feature counts the model falls back to the mean time per feature.
    pub fn fit(records: &[RunHistoryRecord]) -> Self {
        let mut points: BTreeMap<StageKind, Vec<(f64, f64)>> = BTreeMap::new();
        for record in records {
            let x = record.feature_count as f64;
            for (&number, &seconds) in &record.stage_durations {
                let Some(stage) = StageKind::from_number(number) else {
                    continue;
                };
                if seconds.is_finite() && seconds >= 0.0 {
                    points.entry(stage).or_default().push((x, seconds));
                }
            }
        }
        let fits = points
            .into_iter()
            .map(|(stage, points)| (stage, fit_points(&points)))
            .collect();
        Self { fits }
    }

    pub fn is_empty(&self) -> bool {
        self.fits.is_empty()
    }

    pub fn stage_fit(&self, stage: StageKind) -> Option<&StageFit> {
        self.fits.get(&stage)
    }

    /// Predicted seconds per stage for a target.
    pub fn predict(&self, context: &RunContext) -> BTreeMap<StageKind, f64> {
        self.fits
            .iter()
            .map(|(stage, fit)| (*stage, fit.predict(context.feature_count)))
            .collect()
    }
}

fn fit_points(points: &[(f64, f64)]) -> StageFit {
    let n = points.len() as f64;
    let distinct: BTreeSet<u64> = points.iter().map(|(x, _)| x.to_bits()).collect();
    if distinct.len() >= 2 {
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
        let covariance: f64 = points.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
        let variance: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
        let slope = covariance / variance;
        return StageFit {
            intercept: mean_y - slope * mean_x,
            slope,
            samples: points.len(),
        };
    }
    let total_x: f64 = points.iter().map(|(x, _)| x).sum();
    let total_y: f64 = points.iter().map(|(_, y)| y).sum();
    if total_x > 0.0 {
        StageFit {
            intercept: 0.0,
            slope: total_y / total_x,
            samples: points.len(),
        }
    } else {
        StageFit {
            intercept: total_y / n,
            slope: 0.0,
            samples: points.len(),
        }
    }
}

/// Append-only JSON-lines file of [`RunHistoryRecord`]s.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All readable records; a missing file is an empty history and
    /// malformed lines are skipped.
    pub fn load(&self) -> Result<Vec<RunHistoryRecord>, HistoryError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no run history yet");
                return Ok(Vec::new());
            }
            Err(source) => return Err(self.io_error(source)),
        };
        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| self.io_error(source))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(error) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    %error,
                    "skipping malformed history record"
                ),
            }
        }
        Ok(records)
    }

    pub fn append(&self, record: &RunHistoryRecord) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|source| self.io_error(source))
    }

    pub fn prediction_model(&self) -> Result<PredictionModel, HistoryError> {
        Ok(PredictionModel::fit(&self.load()?))
    }

    fn io_error(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(features: u64, geometry_seconds: f64) -> RunHistoryRecord {
        RunHistoryRecord {
            timestamp: Utc::now(),
            target: "sample.json".into(),
            table_count: 1,
            feature_count: features,
            field_count: 3,
            rule_count: 4,
            stage_durations: BTreeMap::from([(1, 0.5), (3, geometry_seconds)]),
            total_duration: geometry_seconds + 0.5,
        }
    }

    #[test]
    fn least_squares_recovers_linear_cost() {
        let records = [record(100, 3.0), record(200, 5.0), record(400, 9.0)];
        let model = PredictionModel::fit(&records);
        let fit = model.stage_fit(StageKind::Geometry).unwrap();
        assert!((fit.slope - 0.02).abs() < 1e-9);
        assert!((fit.intercept - 1.0).abs() < 1e-9);
        let context = RunContext {
            feature_count: 1000,
            ..RunContext::default()
        };
        let predicted = model.predict(&context);
        assert!((predicted[&StageKind::Geometry] - 21.0).abs() < 1e-6);
        assert!((predicted[&StageKind::Table] - 0.5).abs() < 1e-9);
        assert!(!predicted.contains_key(&StageKind::Schema));
    }

    #[test]
    fn single_feature_count_uses_rate() {
        let model = PredictionModel::fit(&[record(50, 2.0), record(50, 4.0)]);
        let fit = model.stage_fit(StageKind::Geometry).unwrap();
        assert_eq!(fit.intercept, 0.0);
        assert!((fit.predict(100) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn empty_feature_counts_use_mean() {
        let model = PredictionModel::fit(&[record(0, 2.0), record(0, 4.0)]);
        assert!((model.stage_fit(StageKind::Geometry).unwrap().predict(10) - 3.0).abs() < 1e-9);
    }
}
