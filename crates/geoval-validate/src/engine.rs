//! The seam between the orchestrator and the rule engines.

use std::collections::BTreeSet;

use geoval_ingest::DataProvider;
use geoval_model::{Issue, StageKind};
use geoval_rules::RuleSet;

use crate::error::{Result, StageError};

/// Callbacks a running stage reports through.
pub trait StageContext {
    fn is_cancelled(&self) -> bool;

    /// Record progress; `total` may grow as the stage discovers work.
    fn report_progress(&mut self, processed: u64, total: u64);

    fn push_finding(&mut self, issue: Issue);

    /// Return `Err(Cancelled)` when cancellation has been requested.
    fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Which rule items (table ids) take part in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    only: Option<BTreeSet<String>>,
}

impl Scope {
    /// Every rule item.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            only: Some(items.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_all(&self) -> bool {
        self.only.is_none()
    }

    pub fn includes(&self, table: &str) -> bool {
        self.only.as_ref().is_none_or(|only| only.contains(table))
    }
}

/// Inputs shared by every stage of one target.
pub struct StageInput<'a> {
    pub provider: &'a dyn DataProvider,
    pub rules: &'a RuleSet,
    pub scope: &'a Scope,
}

impl StageInput<'_> {
    /// Rule items of `stage` inside the scope.
    pub fn selected_items(&self, stage: StageKind) -> BTreeSet<String> {
        self.rules
            .items(stage)
            .into_iter()
            .filter(|item| self.scope.includes(item))
            .collect()
    }
}

/// One validation stage.
pub trait StageRunner: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Units of work the stage expects to process, used for the first
    /// progress report.
    fn estimate_units(&self, input: &StageInput<'_>) -> u64;

    fn run(&self, input: &StageInput<'_>, ctx: &mut dyn StageContext) -> Result<()>;
}

/// Runners for the full stage catalog, in stage order.
pub fn default_runners() -> Vec<Box<dyn StageRunner>> {
    vec![
        Box::new(crate::table::TableStage),
        Box::new(crate::schema::SchemaStage),
        Box::new(crate::geometry::GeometryStage),
        Box::new(crate::attribute::AttributeStage),
        Box::new(crate::relation::RelationStage),
    ]
}

/// Sum of layer feature counts for the selected tables, each counted once.
pub(crate) fn feature_units(input: &StageInput<'_>, tables: &BTreeSet<String>) -> u64 {
    let Ok(layers) = input.provider.list_layers() else {
        return 0;
    };
    let resolved: BTreeSet<&str> = tables
        .iter()
        .filter_map(|table| resolve_layer(&layers, table))
        .map(|layer| layer.id.as_str())
        .collect();
    layers
        .iter()
        .filter(|layer| resolved.contains(layer.id.as_str()))
        .map(|layer| layer.feature_count)
        .sum()
}

/// Collects up to [`geoval_model::SAMPLE_LIMIT`] distinct samples while counting.
#[derive(Debug, Default)]
pub(crate) struct Samples {
    pub(crate) count: u64,
    pub(crate) features: Vec<String>,
    pub(crate) values: Vec<String>,
}

impl Samples {
    pub(crate) fn record(&mut self, feature: &str, value: Option<String>) {
        self.count += 1;
        if self.features.len() < geoval_model::SAMPLE_LIMIT {
            self.features.push(feature.to_string());
        }
        if let Some(value) = value
            && self.values.len() < geoval_model::SAMPLE_LIMIT
            && !self.values.contains(&value)
        {
            self.values.push(value);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Find the layer a rule's table id refers to: exact id first, then a
/// case-insensitive match on id or name.
pub(crate) fn resolve_layer<'l>(
    layers: &'l [geoval_model::LayerInfo],
    table: &str,
) -> Option<&'l geoval_model::LayerInfo> {
    layers.iter().find(|layer| layer.id == table).or_else(|| {
        layers.iter().find(|layer| {
            layer.id.eq_ignore_ascii_case(table) || layer.name.eq_ignore_ascii_case(table)
        })
    })
}
