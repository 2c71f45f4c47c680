//! Remaining-time estimation.
//!
//! Each stage starts from a prior duration prediction. Once a stage passes
//! `min_percent`, its observed rate yields a projection of the remaining time
//! that is blended with the scaled prior using `w = n / (n + k)`, where `n`
//! counts the valid projections seen so far.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

use geoval_model::{RunContext, STAGE_COUNT, StageKind};

use crate::config::EstimatorSettings;

const EPSILON: f64 = 1e-9;

/// One progress observation of a stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageProgressSample {
    pub stage: StageKind,
    pub observed_at: Instant,
    pub progress_percent: f64,
    pub processed_units: u64,
    pub total_units: u64,
    pub started_at: Option<Instant>,
    pub is_completed: bool,
    pub is_successful: bool,
    pub is_skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageEtaResult {
    pub stage: StageKind,
    pub estimated_remaining: Option<Duration>,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// The sample could not be used and the result was clamped to zero.
    pub degenerate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverallEtaResult {
    /// Sum of the stage estimates; `None` when nothing remains to estimate.
    pub estimated_remaining: Option<Duration>,
    /// Lowest confidence among started stages, 0 when none started.
    pub confidence: f64,
    pub stages: Vec<StageEtaResult>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct StageState {
    prior: Option<f64>,
    started: bool,
    started_at: Option<Instant>,
    percent: f64,
    projections: u32,
    last_projection: Option<f64>,
    confidence: f64,
    remaining: Option<f64>,
    locked: bool,
}

impl StageState {
    fn seeded(prior: Option<f64>) -> Self {
        Self {
            prior,
            remaining: prior,
            ..Self::default()
        }
    }
}

enum Projection {
    NotYet,
    Value(f64),
    Degenerate,
}

#[derive(Debug, Clone)]
pub struct Estimator {
    settings: EstimatorSettings,
    context: Option<RunContext>,
    stages: [StageState; STAGE_COUNT],
}

impl Estimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self {
            settings,
            context: None,
            stages: Default::default(),
        }
    }

    /// Replace all state with fresh priors for a new target.
    ///
    /// Missing, negative or non-finite predictions leave the stage without a
    /// prior.
    pub fn seed_predictions(
        &mut self,
        per_stage_seconds: &BTreeMap<StageKind, f64>,
        context: &RunContext,
    ) {
        for stage in StageKind::ALL {
            let prior = per_stage_seconds
                .get(&stage)
                .copied()
                .filter(|seconds| seconds.is_finite() && *seconds >= 0.0);
            self.stages[stage.index()] = StageState::seeded(prior);
        }
        debug!(
            target = %context.target_path.display(),
            features = context.feature_count,
            "estimator seeded"
        );
        self.context = Some(context.clone());
    }

    /// Forget priors, samples and context.
    pub fn reset(&mut self) {
        self.stages = Default::default();
        self.context = None;
    }

    pub fn context(&self) -> Option<&RunContext> {
        self.context.as_ref()
    }

    pub fn prediction(&self, stage: StageKind) -> Option<Duration> {
        self.stages[stage.index()].prior.map(to_duration)
    }

    pub fn update_progress(&mut self, sample: &StageProgressSample) -> StageEtaResult {
        let stage = sample.stage;
        let percent = sample.progress_percent;
        if !percent.is_finite() || percent < 0.0 {
            return degenerate(stage);
        }
        let percent = percent.min(100.0);
        let current = &self.stages[stage.index()];

        let restarted = current.started
            && (percent < current.percent
                || matches!(
                    (current.started_at, sample.started_at),
                    (Some(before), Some(now)) if before != now
                ));
        let mut next = if restarted {
            debug!(stage = %stage, "stage restarted, estimate reset");
            StageState::seeded(current.prior)
        } else if current.locked {
            return self.stage_eta(stage);
        } else {
            current.clone()
        };

        next.started = true;
        if sample.started_at.is_some() {
            next.started_at = sample.started_at;
        }
        next.percent = percent;

        if sample.is_completed || sample.is_skipped {
            next.remaining = Some(0.0);
            next.confidence = 1.0;
            next.locked = true;
        } else {
            let prior_remaining = next.prior.map(|prior| prior * (1.0 - percent / 100.0));
            match self.project(sample, next.started_at, percent) {
                Projection::Degenerate => return degenerate(stage),
                Projection::NotYet => next.remaining = prior_remaining,
                Projection::Value(projection) => {
                    next.projections += 1;
                    let agreement = next
                        .last_projection
                        .map_or(0.0, |previous| agreement(previous, projection));
                    let n = f64::from(next.projections);
                    let weight = n / (n + self.settings.blend_k);
                    let candidate = weight * (0.5 + 0.5 * agreement);
                    next.confidence = next.confidence.max(candidate).clamp(0.0, 1.0);
                    next.last_projection = Some(projection);
                    next.remaining = Some(match prior_remaining {
                        Some(prior) => weight * projection + (1.0 - weight) * prior,
                        None => projection,
                    });
                }
            }
        }

        self.stages[stage.index()] = next;
        self.stage_eta(stage)
    }

    fn project(
        &self,
        sample: &StageProgressSample,
        started_at: Option<Instant>,
        percent: f64,
    ) -> Projection {
        if percent <= self.settings.min_percent || percent <= EPSILON {
            return Projection::NotYet;
        }
        let Some(started_at) = started_at else {
            return Projection::NotYet;
        };
        let Some(elapsed) = sample.observed_at.checked_duration_since(started_at) else {
            return Projection::Degenerate;
        };
        let projection = elapsed.as_secs_f64() / percent * (100.0 - percent);
        if projection.is_finite() && projection >= 0.0 {
            Projection::Value(projection)
        } else {
            Projection::Degenerate
        }
    }

    pub fn stage_eta(&self, stage: StageKind) -> StageEtaResult {
        let state = &self.stages[stage.index()];
        StageEtaResult {
            stage,
            estimated_remaining: state.remaining.map(to_duration),
            confidence: state.confidence,
            degenerate: false,
        }
    }

    pub fn overall_eta(&self) -> OverallEtaResult {
        let stages: Vec<StageEtaResult> = StageKind::ALL
            .into_iter()
            .map(|stage| self.stage_eta(stage))
            .collect();
        let total: f64 = self
            .stages
            .iter()
            .filter(|state| !state.locked)
            .filter_map(|state| state.remaining)
            .sum();
        let confidence = self
            .stages
            .iter()
            .filter(|state| state.started)
            .map(|state| state.confidence)
            .reduce(f64::min)
            .unwrap_or(0.0);
        OverallEtaResult {
            estimated_remaining: (total > 0.0).then(|| to_duration(total)),
            confidence,
            stages,
        }
    }
}

fn degenerate(stage: StageKind) -> StageEtaResult {
    StageEtaResult {
        stage,
        estimated_remaining: Some(Duration::ZERO),
        confidence: 0.0,
        degenerate: true,
    }
}

/// 1 for identical successive projections, falling towards 0 as they diverge.
fn agreement(previous: f64, current: f64) -> f64 {
    let scale = previous.max(current);
    if scale <= EPSILON {
        1.0
    } else {
        (1.0 - (previous - current).abs() / scale).clamp(0.0, 1.0)
    }
}

fn to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(stage: StageKind, started: Instant, elapsed: f64, percent: f64) -> StageProgressSample {
        StageProgressSample {
            stage,
            observed_at: started + Duration::from_secs_f64(elapsed),
            progress_percent: percent,
            processed_units: 0,
            total_units: 0,
            started_at: Some(started),
            is_completed: false,
            is_successful: false,
            is_skipped: false,
        }
    }

    fn seeded(priors: &[(StageKind, f64)]) -> Estimator {
        let mut estimator = Estimator::new(EstimatorSettings::default());
        let priors: BTreeMap<_, _> = priors.iter().copied().collect();
        estimator.seed_predictions(&priors, &RunContext::default());
        estimator
    }

    #[test]
    fn seeded_priors_sum_to_overall() {
        let estimator = seeded(&[(StageKind::Table, 10.0), (StageKind::Schema, 5.0)]);
        let overall = estimator.overall_eta();
        assert_eq!(overall.estimated_remaining, Some(Duration::from_secs(15)));
        assert_eq!(overall.confidence, 0.0);
    }

    #[test]
    fn half_done_stage_halves_its_prior() {
        let mut estimator = seeded(&[(StageKind::Table, 10.0), (StageKind::Schema, 5.0)]);
        let start = Instant::now();
        let eta = estimator.update_progress(&sample(StageKind::Table, start, 5.0, 50.0));
        let remaining = eta.estimated_remaining.unwrap().as_secs_f64();
        assert!((remaining - 5.0).abs() < 1e-6);
        let overall = estimator.overall_eta().estimated_remaining.unwrap().as_secs_f64();
        assert!((overall - 10.0).abs() < 1e-6);
    }

    #[test]
    fn completion_locks_stage_at_zero() {
        let mut estimator = seeded(&[(StageKind::Table, 10.0)]);
        let start = Instant::now();
        let mut done = sample(StageKind::Table, start, 3.0, 100.0);
        done.is_completed = true;
        done.is_successful = true;
        let eta = estimator.update_progress(&done);
        assert_eq!(eta.estimated_remaining, Some(Duration::ZERO));
        assert_eq!(eta.confidence, 1.0);
        assert_eq!(estimator.overall_eta().estimated_remaining, None);

        // A late sample at the same start time does not reopen the stage.
        let late = estimator.update_progress(&sample(StageKind::Table, start, 4.0, 100.0));
        assert_eq!(late.estimated_remaining, Some(Duration::ZERO));
    }

    #[test]
    fn backwards_progress_restarts_stage() {
        let mut estimator = seeded(&[(StageKind::Geometry, 100.0)]);
        let start = Instant::now();
        for (elapsed, percent) in [(10.0, 10.0), (20.0, 20.0), (30.0, 30.0)] {
            estimator.update_progress(&sample(StageKind::Geometry, start, elapsed, percent));
        }
        assert!(estimator.stage_eta(StageKind::Geometry).confidence > 0.0);
        let eta = estimator.update_progress(&sample(StageKind::Geometry, start, 31.0, 0.5));
        assert_eq!(eta.confidence, 0.0);
    }

    #[test]
    fn degenerate_samples_leave_state_untouched() {
        let mut estimator = seeded(&[(StageKind::Schema, 8.0)]);
        let before = estimator.stage_eta(StageKind::Schema);
        let mut bad = sample(StageKind::Schema, Instant::now(), 1.0, f64::NAN);
        let eta = estimator.update_progress(&bad);
        assert!(eta.degenerate);
        assert_eq!(eta.confidence, 0.0);
        assert_eq!(eta.estimated_remaining, Some(Duration::ZERO));
        assert_eq!(estimator.stage_eta(StageKind::Schema), before);

        bad.progress_percent = -3.0;
        assert!(estimator.update_progress(&bad).degenerate);
        assert_eq!(estimator.stage_eta(StageKind::Schema), before);
    }

    #[test]
    fn reseeding_replaces_state() {
        let mut estimator = seeded(&[(StageKind::Table, 10.0)]);
        estimator.update_progress(&sample(StageKind::Table, Instant::now(), 2.0, 40.0));
        let again = seeded(&[(StageKind::Table, 10.0)]);
        estimator.seed_predictions(
            &BTreeMap::from([(StageKind::Table, 10.0)]),
            &RunContext::default(),
        );
        assert_eq!(estimator.overall_eta(), again.overall_eta());
    }
}
