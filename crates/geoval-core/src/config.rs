//! Pipeline settings.
//!
//! Settings come from an optional TOML file; every key has a default so an
//! empty file (or no file at all) is a valid configuration.
//!
//! ```toml
//! progress_interval = 500
//! alert_debounce_ms = 250
//! history_path = "runs.jsonl"
//!
//! [stage_weights]
//! geometry = 4.0
//!
//! [estimator]
//! min_percent = 2.0
//! blend_k = 3.0
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use geoval_model::StageKind;

use crate::error::SettingsError;

/// Tunables of the remaining-time estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    /// Progress (percent) a stage must pass before its observed rate is
    /// trusted for projections.
    pub min_percent: f64,
    /// Blend constant `k` in `w = n / (n + k)`.
    pub blend_k: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            min_percent: 1.0,
            blend_k: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Features between two progress events of a running stage.
    pub progress_interval: u64,
    /// Debounce window for coalesced alert emissions.
    pub alert_debounce_ms: u64,
    /// Relative stage weights for the overall percentage, keyed by stage id.
    /// Stages without a weight use their predicted duration, or 1.0.
    pub stage_weights: BTreeMap<String, f64>,
    pub estimator: EstimatorSettings,
    /// JSON-lines run history used to seed predictions.
    pub history_path: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            progress_interval: 100,
            alert_debounce_ms: 250,
            stage_weights: BTreeMap::new(),
            estimator: EstimatorSettings::default(),
            history_path: None,
        }
    }
}

impl PipelineSettings {
    /// Load settings from a TOML file and validate them.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&content).map_err(|source| SettingsError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        info!(path = %path.display(), "loaded pipeline settings");
        Ok(settings)
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SettingsError> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.progress_interval == 0 {
            return Err(invalid("progress_interval", "must be at least 1"));
        }
        let estimator = &self.estimator;
        if !(0.0..100.0).contains(&estimator.min_percent) {
            return Err(invalid("estimator.min_percent", "must be in [0, 100)"));
        }
        if !estimator.blend_k.is_finite() || estimator.blend_k <= 0.0 {
            return Err(invalid("estimator.blend_k", "must be a positive number"));
        }
        for (key, weight) in &self.stage_weights {
            if key.parse::<StageKind>().is_err() {
                return Err(invalid(&format!("stage_weights.{key}"), "unknown stage"));
            }
            if !weight.is_finite() || *weight < 0.0 {
                return Err(invalid(
                    &format!("stage_weights.{key}"),
                    "must be a non-negative number",
                ));
            }
        }
        Ok(())
    }

    pub fn alert_debounce(&self) -> Duration {
        Duration::from_millis(self.alert_debounce_ms)
    }

    /// Configured weight of a stage, if any.
    pub fn stage_weight(&self, stage: StageKind) -> Option<f64> {
        self.stage_weights
            .iter()
            .find(|(key, _)| key.parse::<StageKind>().ok() == Some(stage))
            .map(|(_, weight)| *weight)
    }
}

fn invalid(key: &str, message: &str) -> SettingsError {
    SettingsError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}
