//! Stage 4: attribute value checks.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use geoval_model::{AttributeValue, Issue, StageKind};
use geoval_rules::{AttributeCheck, AttributeRule};

use crate::engine::{Samples, StageContext, StageInput, StageRunner, feature_units, resolve_layer};
use crate::error::{Result, StageError};

pub struct AttributeStage;

/// A rule ready to evaluate: the regex compiled once per run.
enum Matcher<'r> {
    CodeList(&'r [String]),
    Range(Option<f64>, Option<f64>),
    Pattern(Regex),
    NotNull,
}

impl Matcher<'_> {
    /// `Some(rendered value)` when the value violates the rule.
    fn violation(&self, value: Option<&AttributeValue>) -> Option<Option<String>> {
        let key = value.and_then(AttributeValue::as_key);
        match (self, key) {
            (Self::NotNull, None) => Some(None),
            (Self::NotNull, Some(_)) | (_, None) => None,
            (Self::CodeList(codes), Some(key)) => {
                (!codes.iter().any(|code| code == &key)).then_some(Some(key))
            }
            (Self::Range(min, max), Some(key)) => {
                let number = value.and_then(AttributeValue::as_f64);
                let ok = number.is_some_and(|n| {
                    min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi)
                });
                (!ok).then_some(Some(key))
            }
            (Self::Pattern(regex), Some(key)) => (!regex.is_match(&key)).then_some(Some(key)),
        }
    }
}

impl StageRunner for AttributeStage {
    fn kind(&self) -> StageKind {
        StageKind::Attribute
    }

    fn estimate_units(&self, input: &StageInput<'_>) -> u64 {
        feature_units(input, &input.selected_items(StageKind::Attribute))
    }

    fn run(&self, input: &StageInput<'_>, ctx: &mut dyn StageContext) -> Result<()> {
        let layers = input.provider.list_layers()?;
        let total = self.estimate_units(input);
        let mut processed = 0u64;

        let mut by_table: BTreeMap<&str, Vec<&AttributeRule>> = BTreeMap::new();
        for rule in input
            .rules
            .attributes
            .iter()
            .filter(|rule| input.scope.includes(&rule.table_id))
        {
            by_table.entry(rule.table_id.as_str()).or_default().push(rule);
        }

        for (table, rules) in by_table {
            ctx.checkpoint()?;
            let Some(layer) = resolve_layer(&layers, table) else {
                debug!(table, "attribute rules skipped, table absent");
                continue;
            };
            let fields = input.provider.field_schema(&layer.id)?;

            let mut active = Vec::new();
            for rule in rules {
                let declared = fields.is_empty()
                    || fields
                        .iter()
                        .any(|field| field.name.eq_ignore_ascii_case(&rule.field));
                if !declared {
                    ctx.push_finding(Issue::FieldMissing {
                        table: table.to_string(),
                        field: rule.field.clone(),
                    });
                    continue;
                }
                active.push((rule, compile(&rule.check)?, Samples::default()));
            }
            if active.is_empty() {
                processed += layer.feature_count;
                ctx.report_progress(processed, total);
                continue;
            }

            for feature in input.provider.iterate_features(&layer.id)? {
                ctx.checkpoint()?;
                let feature = feature?;
                for (rule, matcher, samples) in &mut active {
                    if let Some(value) = matcher.violation(feature.attribute(&rule.field)) {
                        samples.record(&feature.id, value);
                    }
                }
                processed += 1;
                ctx.report_progress(processed, total);
            }

            for (rule, _, samples) in active {
                if let Some(issue) = summarize(table, rule, samples) {
                    ctx.push_finding(issue);
                }
            }
        }
        Ok(())
    }
}

fn compile(check: &AttributeCheck) -> Result<Matcher<'_>> {
    Ok(match check {
        AttributeCheck::CodeList { codes } => Matcher::CodeList(codes),
        AttributeCheck::Range { min, max } => Matcher::Range(*min, *max),
        AttributeCheck::Pattern { pattern } => {
            Matcher::Pattern(Regex::new(pattern).map_err(|error| StageError::Pattern {
                pattern: pattern.clone(),
                message: error.to_string(),
            })?)
        }
        AttributeCheck::NotNull => Matcher::NotNull,
    })
}

fn summarize(table: &str, rule: &AttributeRule, samples: Samples) -> Option<Issue> {
    if samples.is_empty() {
        return None;
    }
    let table = table.to_string();
    let field = rule.field.clone();
    Some(match &rule.check {
        AttributeCheck::NotNull => Issue::RequiredValueMissing {
            table,
            field,
            count: samples.count,
            features: samples.features,
        },
        AttributeCheck::CodeList { codes } => Issue::CodeListViolation {
            table,
            field,
            count: samples.count,
            features: samples.features,
            values: samples.values,
            allowed: codes.len(),
        },
        AttributeCheck::Range { min, max } => Issue::OutOfRange {
            table,
            field,
            count: samples.count,
            features: samples.features,
            values: samples.values,
            min: *min,
            max: *max,
        },
        AttributeCheck::Pattern { pattern } => Issue::PatternMismatch {
            table,
            field,
            count: samples.count,
            features: samples.features,
            values: samples.values,
            pattern: pattern.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_values_only_fail_not_null() {
        let codes = vec!["01".to_string()];
        let code_list = Matcher::CodeList(&codes);
        assert_eq!(code_list.violation(None), None);
        assert_eq!(code_list.violation(Some(&AttributeValue::Null)), None);
        assert_eq!(
            code_list.violation(Some(&AttributeValue::from("02"))),
            Some(Some("02".to_string()))
        );
        assert_eq!(Matcher::NotNull.violation(None), Some(None));
    }

    #[test]
    fn range_rejects_non_numeric_text() {
        let range = Matcher::Range(Some(1.0), Some(10.0));
        assert_eq!(range.violation(Some(&AttributeValue::Integer(5))), None);
        assert_eq!(range.violation(Some(&AttributeValue::from(" 7 "))), None);
        assert!(range.violation(Some(&AttributeValue::Float(10.5))).is_some());
        assert!(range.violation(Some(&AttributeValue::from("many"))).is_some());
    }
}
