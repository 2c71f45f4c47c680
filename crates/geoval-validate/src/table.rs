//! Stage 1: expected tables are present, typed and populated.

use std::collections::BTreeSet;

use tracing::debug;

use geoval_model::{Issue, StageKind};

use crate::engine::{StageContext, StageInput, StageRunner, resolve_layer};
use crate::error::Result;

pub struct TableStage;

impl StageRunner for TableStage {
    fn kind(&self) -> StageKind {
        StageKind::Table
    }

    fn estimate_units(&self, input: &StageInput<'_>) -> u64 {
        input
            .rules
            .tables
            .iter()
            .filter(|rule| input.scope.includes(&rule.table_id))
            .count() as u64
    }

    fn run(&self, input: &StageInput<'_>, ctx: &mut dyn StageContext) -> Result<()> {
        let layers = input.provider.list_layers()?;
        let rules: Vec<_> = input
            .rules
            .tables
            .iter()
            .filter(|rule| input.scope.includes(&rule.table_id))
            .collect();
        let total = rules.len() as u64;
        let mut covered = BTreeSet::new();

        for (index, rule) in rules.iter().enumerate() {
            ctx.checkpoint()?;
            let layer = resolve_layer(&layers, &rule.table_id).or_else(|| {
                rule.table_name
                    .as_deref()
                    .and_then(|name| resolve_layer(&layers, name))
            });
            match layer {
                None if rule.required => ctx.push_finding(Issue::LayerMissing {
                    table: rule.table_id.clone(),
                }),
                None => debug!(table = %rule.table_id, "optional table absent"),
                Some(layer) => {
                    covered.insert(layer.id.clone());
                    if let Some(expected) = rule.geometry_type
                        && layer.geometry_type != Some(expected)
                    {
                        ctx.push_finding(Issue::GeometryTypeMismatch {
                            table: rule.table_id.clone(),
                            expected: Some(expected),
                            actual: layer.geometry_type,
                        });
                    }
                    if layer.feature_count == 0 {
                        ctx.push_finding(Issue::LayerEmpty {
                            table: rule.table_id.clone(),
                        });
                    }
                }
            }
            ctx.report_progress(index as u64 + 1, total);
        }

        // Only a full run can say a layer is uncovered.
        if input.scope.is_all() && !input.rules.tables.is_empty() {
            for layer in layers.iter().filter(|layer| !covered.contains(&layer.id)) {
                ctx.push_finding(Issue::UnexpectedLayer {
                    table: layer.id.clone(),
                });
            }
        }
        Ok(())
    }
}
