//! Stage 2: column declarations and data-level key constraints.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use geoval_model::{FieldDef, Issue, KeyKind, LayerInfo, SAMPLE_LIMIT, StageKind};
use geoval_rules::SchemaRule;

use crate::engine::{Samples, StageContext, StageInput, StageRunner, feature_units, resolve_layer};
use crate::error::Result;

pub struct SchemaStage;

impl StageRunner for SchemaStage {
    fn kind(&self) -> StageKind {
        StageKind::Schema
    }

    fn estimate_units(&self, input: &StageInput<'_>) -> u64 {
        feature_units(input, &input.selected_items(StageKind::Schema))
    }

    fn run(&self, input: &StageInput<'_>, ctx: &mut dyn StageContext) -> Result<()> {
        let layers = input.provider.list_layers()?;
        let mut by_table: BTreeMap<&str, Vec<&SchemaRule>> = BTreeMap::new();
        for rule in input
            .rules
            .schemas
            .iter()
            .filter(|rule| input.scope.includes(&rule.table_id))
        {
            by_table.entry(rule.table_id.as_str()).or_default().push(rule);
        }

        let mut progress = Progress {
            processed: 0,
            total: self.estimate_units(input),
        };
        for (table, rules) in by_table {
            ctx.checkpoint()?;
            let Some(layer) = resolve_layer(&layers, table) else {
                debug!(table, "schema rules skipped, table absent");
                continue;
            };
            let fields = input.provider.field_schema(&layer.id)?;
            let columns = check_declarations(table, &rules, &fields, ctx);
            check_data(input, &layers, table, layer, &columns, ctx, &mut progress)?;
        }
        Ok(())
    }
}

struct Progress {
    processed: u64,
    total: u64,
}

/// Compare declared columns with the rules; returns the rules whose column
/// exists, paired with the actual column name.
fn check_declarations<'r>(
    table: &str,
    rules: &[&'r SchemaRule],
    fields: &[FieldDef],
    ctx: &mut dyn StageContext,
) -> Vec<(&'r SchemaRule, String)> {
    let mut present = Vec::new();
    for &rule in rules {
        let Some(field) = fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(&rule.column))
        else {
            ctx.push_finding(Issue::ColumnMissing {
                table: table.to_string(),
                column: rule.column.clone(),
            });
            continue;
        };
        let column = rule.column.clone();

        if let Some(expected) = rule.field_type
            && expected != field.field_type
        {
            ctx.push_finding(Issue::ColumnTypeMismatch {
                table: table.to_string(),
                column: column.clone(),
                expected,
                actual: field.field_type,
            });
        }
        if let Some(expected) = rule.length
            && field.length != Some(expected)
        {
            ctx.push_finding(Issue::ColumnLengthMismatch {
                table: table.to_string(),
                column: column.clone(),
                expected,
                actual: field.length,
            });
        }
        if let Some(expected) = rule.precision
            && field.precision != Some(expected)
        {
            ctx.push_finding(Issue::ColumnPrecisionMismatch {
                table: table.to_string(),
                column: column.clone(),
                expected,
                actual: field.precision,
            });
        }
        if let Some(expected_nullable) = rule.nullable
            && expected_nullable != field.nullable
        {
            ctx.push_finding(Issue::NullabilityMismatch {
                table: table.to_string(),
                column: column.clone(),
                expected_nullable,
            });
        }
        if rule.primary_key != field.is_primary_key {
            ctx.push_finding(Issue::KeyDeclarationMismatch {
                table: table.to_string(),
                column: column.clone(),
                key: KeyKind::PrimaryKey,
                expected: rule.primary_key,
            });
        }
        if rule.unique && !(field.is_unique || field.is_primary_key) {
            ctx.push_finding(Issue::KeyDeclarationMismatch {
                table: table.to_string(),
                column: column.clone(),
                key: KeyKind::Unique,
                expected: true,
            });
        }
        if let Some(expected) = &rule.foreign_key {
            let expected_text = format!("{}.{}", expected.table, expected.column);
            let matches = field.foreign_key.as_ref().is_some_and(|actual| {
                actual.table.eq_ignore_ascii_case(&expected.table)
                    && actual.column.eq_ignore_ascii_case(&expected.column)
            });
            if !matches {
                ctx.push_finding(Issue::ForeignKeyDeclarationMismatch {
                    table: table.to_string(),
                    column: column.clone(),
                    expected: expected_text,
                    actual: field
                        .foreign_key
                        .as_ref()
                        .map(|fk| format!("{}.{}", fk.table, fk.column)),
                });
            }
        }
        present.push((rule, column));
    }
    present
}

#[derive(Default)]
struct ColumnStats {
    nulls: Samples,
    seen: HashMap<String, u64>,
    duplicates: u64,
    foreign: Samples,
}

fn check_data(
    input: &StageInput<'_>,
    layers: &[LayerInfo],
    table: &str,
    layer: &LayerInfo,
    columns: &[(&SchemaRule, String)],
    ctx: &mut dyn StageContext,
    progress: &mut Progress,
) -> Result<()> {
    let needs_scan = columns.iter().any(|(rule, _)| {
        rule.nullable == Some(false) || rule.primary_key || rule.unique || rule.foreign_key.is_some()
    });
    if !needs_scan {
        progress.processed += layer.feature_count;
        ctx.report_progress(progress.processed, progress.total);
        return Ok(());
    }

    let mut references: Vec<Option<HashSet<String>>> = Vec::with_capacity(columns.len());
    for (rule, _) in columns {
        references.push(match &rule.foreign_key {
            Some(fk) => reference_values(input, layers, &fk.table, &fk.column)?,
            None => None,
        });
    }

    let mut stats: Vec<ColumnStats> = columns.iter().map(|_| ColumnStats::default()).collect();
    for feature in input.provider.iterate_features(&layer.id)? {
        ctx.checkpoint()?;
        let feature = feature?;
        for (index, (rule, column)) in columns.iter().enumerate() {
            let value = feature.attribute(column).and_then(geoval_model::AttributeValue::as_key);
            let entry = &mut stats[index];
            match value {
                None => {
                    if rule.nullable == Some(false) || rule.primary_key {
                        entry.nulls.record(&feature.id, None);
                    }
                }
                Some(value) => {
                    if rule.unique || rule.primary_key {
                        let seen = entry.seen.entry(value.clone()).or_insert(0);
                        *seen += 1;
                        if *seen > 1 {
                            entry.duplicates += 1;
                        }
                    }
                    if rule.foreign_key.is_some() {
                        let found = references[index]
                            .as_ref()
                            .is_some_and(|values| values.contains(&value));
                        if !found {
                            entry.foreign.record(&feature.id, Some(value));
                        }
                    }
                }
            }
        }
        progress.processed += 1;
        ctx.report_progress(progress.processed, progress.total);
    }

    for ((rule, column), entry) in columns.iter().zip(stats) {
        if !entry.nulls.is_empty() {
            ctx.push_finding(Issue::NullValues {
                table: table.to_string(),
                column: column.clone(),
                count: entry.nulls.count,
                features: entry.nulls.features,
            });
        }
        if entry.duplicates > 0 {
            let mut values: Vec<String> = entry
                .seen
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(value, _)| value)
                .collect();
            values.sort();
            values.truncate(SAMPLE_LIMIT);
            ctx.push_finding(Issue::DuplicateValues {
                table: table.to_string(),
                column: column.clone(),
                count: entry.duplicates,
                values,
            });
        }
        if let Some(fk) = &rule.foreign_key
            && !entry.foreign.is_empty()
        {
            ctx.push_finding(Issue::ForeignKeyViolation {
                table: table.to_string(),
                column: column.clone(),
                referenced: format!("{}.{}", fk.table, fk.column),
                count: entry.foreign.count,
                features: entry.foreign.features,
                values: entry.foreign.values,
            });
        }
    }
    Ok(())
}

/// Values of the referenced column; `None` when the referenced table is absent.
fn reference_values(
    input: &StageInput<'_>,
    layers: &[LayerInfo],
    table: &str,
    column: &str,
) -> Result<Option<HashSet<String>>> {
    let Some(layer) = resolve_layer(layers, table) else {
        warn!(table, "referenced table absent, every value is a violation");
        return Ok(None);
    };
    let mut values = HashSet::new();
    for feature in input.provider.iterate_features(&layer.id)? {
        if let Some(value) = feature?.attribute(column).and_then(geoval_model::AttributeValue::as_key) {
            values.insert(value);
        }
    }
    Ok(Some(values))
}
