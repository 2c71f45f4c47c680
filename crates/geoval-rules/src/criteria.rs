//! Named numeric thresholds.
//!
//! Criteria names are the keys used by the rule configuration tables; rule
//! evaluators look them up by name. A missing entry for a required threshold
//! is a configuration error, never a silent default, except for the ring
//! closure tolerance which has a documented fallback.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Criteria keys as they appear in `criteria.csv`.
pub mod names {
    /// Maximum vertex distance for two geometries to count as duplicates.
    pub const DUPLICATE_TOLERANCE: &str = "중복허용오차";
    /// Overlap area (polygons) or length (lines) tolerated between features.
    pub const OVERLAP_TOLERANCE: &str = "겹침허용오차";
    /// Crossing angle (degrees) at or below which a self-crossing is ignored.
    pub const SELF_INTERSECTION_ANGLE: &str = "꼬임허용각도";
    pub const SLIVER_AREA: &str = "슬리버면적";
    pub const SLIVER_SHAPE_INDEX: &str = "슬리버형태지수";
    pub const SLIVER_ELONGATION: &str = "슬리버신장률";
    pub const MIN_LINE_LENGTH: &str = "최소선길이";
    pub const MIN_POLYGON_AREA: &str = "최소폴리곤면적";
    pub const RING_CLOSURE_TOLERANCE: &str = "링폐합오차";
    /// Vertex angle (degrees) below which a vertex is a spike.
    pub const SPIKE_ANGLE: &str = "스파이크각도";
    pub const NETWORK_SEARCH_DISTANCE: &str = "네트워크탐색거리";
}

/// Fallback for [`names::RING_CLOSURE_TOLERANCE`].
pub const DEFAULT_RING_CLOSURE_TOLERANCE: f64 = 1e-8;

/// A threshold value with its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub value: f64,
    pub unit: Option<String>,
}

/// Immutable-for-the-run mapping from threshold name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    entries: BTreeMap<String, Criterion>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mainly for tests and programmatic setups.
    #[must_use]
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.entries.insert(
            name.to_string(),
            Criterion {
                value,
                unit: None,
            },
        );
        self
    }

    /// Insert a criterion, rejecting duplicates.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: f64,
        unit: Option<String>,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(ConfigError::DuplicateCriterion { name });
        }
        self.entries.insert(name, Criterion { value, unit });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Criterion> {
        self.entries.get(name.trim())
    }

    /// Value of a required threshold.
    pub fn require(&self, name: &str, required_by: &str) -> Result<f64, ConfigError> {
        self.get(name)
            .map(|criterion| criterion.value)
            .ok_or_else(|| ConfigError::MissingCriterion {
                name: name.to_string(),
                required_by: required_by.to_string(),
            })
    }

    pub fn ring_closure_tolerance(&self) -> f64 {
        self.get(names::RING_CLOSURE_TOLERANCE)
            .map_or(DEFAULT_RING_CLOSURE_TOLERANCE, |criterion| criterion.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Criterion)> {
        self.entries.iter().map(|(name, c)| (name.as_str(), c))
    }
}
