//! Rule directory loader.
//!
//! A rules directory holds up to six CSV tables. Every table is optional; a
//! missing file yields no rules of that kind. Headers are matched
//! case-insensitively after trimming a UTF-8 BOM.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use csv::ReaderBuilder;
use regex::Regex;
use tracing::{debug, info};

use geoval_model::{FieldType, ForeignKey, GeometryType};

use crate::criteria::Criteria;
use crate::error::ConfigError;
use crate::rules::{
    AttributeCheck, AttributeRule, FieldFilter, GeometryCheck, GeometryRule, RelationKind,
    RelationRule, RuleSet, SchemaRule, TableRule,
};

pub const TABLE_FILE: &str = "table.csv";
pub const SCHEMA_FILE: &str = "schema.csv";
pub const GEOMETRY_FILE: &str = "geometry.csv";
pub const ATTRIBUTE_FILE: &str = "attribute.csv";
pub const RELATION_FILE: &str = "relation.csv";
pub const CRITERIA_FILE: &str = "criteria.csv";

/// One data row with its 1-based line number (header is line 1).
struct Row<'a> {
    path: &'a Path,
    line: u64,
    fields: BTreeMap<String, String>,
}

impl Row<'_> {
    fn optional(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<&str, ConfigError> {
        self.optional(key).ok_or_else(|| self.invalid(key, "value is required"))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => parse_flag(value).ok_or_else(|| {
                self.invalid(key, &format!("expected Y/N, got {value:?}"))
            }),
        }
    }

    fn optional_flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.optional(key)
            .map(|value| {
                parse_flag(value)
                    .ok_or_else(|| self.invalid(key, &format!("expected Y/N, got {value:?}")))
            })
            .transpose()
    }

    fn optional_u32(&self, key: &str) -> Result<Option<u32>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .parse::<u32>()
                    .map_err(|_| self.invalid(key, &format!("{value:?} is not a whole number")))
            })
            .transpose()
    }

    fn optional_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .parse::<f64>()
                    .ok()
                    .filter(|number| number.is_finite())
                    .ok_or_else(|| self.invalid(key, &format!("{value:?} is not a number")))
            })
            .transpose()
    }

    fn geometry_type(&self, key: &str) -> Result<Option<GeometryType>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .parse::<GeometryType>()
                    .map_err(|error| self.invalid(key, &error.to_string()))
            })
            .transpose()
    }

    fn invalid(&self, column: &str, message: &str) -> ConfigError {
        ConfigError::InvalidValue {
            path: self.path.to_path_buf(),
            line: self.line,
            column: column.to_string(),
            message: message.to_string(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "y" | "yes" | "true" | "1" | "o" => Some(true),
        "n" | "no" | "false" | "0" | "x" => Some(false),
        _ => None,
    }
}

/// Read a CSV file into rows keyed by lower-cased header.
///
/// Returns `Ok(None)` when the file does not exist.
fn read_rows<'a>(path: &'a Path, required: &[&str]) -> Result<Option<Vec<Row<'a>>>, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "rule table absent");
        return Ok(None);
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|error| csv_error(path, &error))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|error| csv_error(path, &error))?
        .iter()
        .map(|header| header.trim_matches('\u{feff}').trim().to_lowercase())
        .collect();
    for column in required {
        if !headers.iter().any(|header| header == column) {
            return Err(ConfigError::MissingColumn {
                path: path.to_path_buf(),
                column: (*column).to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|error| csv_error(path, &error))?;
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        let mut fields = BTreeMap::new();
        for (idx, value) in record.iter().enumerate() {
            if let Some(key) = headers.get(idx) {
                fields.insert(key.clone(), value.trim().to_string());
            }
        }
        rows.push(Row {
            path,
            line: index as u64 + 2,
            fields,
        });
    }
    Ok(Some(rows))
}

fn csv_error(path: &Path, error: &csv::Error) -> ConfigError {
    if let csv::ErrorKind::Io(io) = error.kind() {
        return ConfigError::io(path, std::io::Error::new(io.kind(), io.to_string()));
    }
    ConfigError::Csv {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}

/// Load every rule table found under `dir`.
pub fn load_rule_set(dir: &Path) -> Result<RuleSet, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "rules directory not found"),
        ));
    }
    let rules = RuleSet {
        tables: load_table_rules(&dir.join(TABLE_FILE))?,
        schemas: load_schema_rules(&dir.join(SCHEMA_FILE))?,
        geometries: load_geometry_rules(&dir.join(GEOMETRY_FILE))?,
        attributes: load_attribute_rules(&dir.join(ATTRIBUTE_FILE))?,
        relations: load_relation_rules(&dir.join(RELATION_FILE))?,
        criteria: load_criteria(&dir.join(CRITERIA_FILE))?,
    };
    info!(
        dir = %dir.display(),
        tables = rules.tables.len(),
        schemas = rules.schemas.len(),
        geometries = rules.geometries.len(),
        attributes = rules.attributes.len(),
        relations = rules.relations.len(),
        criteria = rules.criteria.len(),
        "loaded rule set"
    );
    Ok(rules)
}

pub fn load_table_rules(path: &Path) -> Result<Vec<TableRule>, ConfigError> {
    let Some(rows) = read_rows(path, &["table_id"])? else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|row| {
            Ok(TableRule {
                table_id: row.required("table_id")?.to_string(),
                table_name: row.optional("table_name").map(str::to_string),
                geometry_type: row.geometry_type("geometry_type")?,
                required: row.flag("required", true)?,
            })
        })
        .collect()
}

pub fn load_schema_rules(path: &Path) -> Result<Vec<SchemaRule>, ConfigError> {
    let Some(rows) = read_rows(path, &["table_id", "column"])? else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|row| {
            let field_type = row
                .optional("type")
                .map(|value| {
                    value
                        .parse::<FieldType>()
                        .map_err(|error| row.invalid("type", &error.to_string()))
                })
                .transpose()?;
            let foreign_key = row
                .optional("foreign_key")
                .map(|value| parse_foreign_key(value).ok_or_else(|| {
                    row.invalid("foreign_key", &format!("expected table.column, got {value:?}"))
                }))
                .transpose()?;
            Ok(SchemaRule {
                table_id: row.required("table_id")?.to_string(),
                column: row.required("column")?.to_string(),
                field_type,
                length: row.optional_u32("length")?,
                precision: row.optional_u32("precision")?,
                nullable: row.optional_flag("nullable")?,
                primary_key: row.flag("primary_key", false)?,
                unique: row.flag("unique", false)?,
                foreign_key,
            })
        })
        .collect()
}

fn parse_foreign_key(value: &str) -> Option<ForeignKey> {
    let (table, column) = value.split_once('.')?;
    let (table, column) = (table.trim(), column.trim());
    if table.is_empty() || column.is_empty() {
        return None;
    }
    Some(ForeignKey {
        table: table.to_string(),
        column: column.to_string(),
    })
}

/// Each check is a flag column named after [`GeometryCheck::column`].
pub fn load_geometry_rules(path: &Path) -> Result<Vec<GeometryRule>, ConfigError> {
    let Some(rows) = read_rows(path, &["table_id"])? else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|row| {
            let mut checks = BTreeSet::new();
            for check in GeometryCheck::ALL {
                if row.flag(check.column(), false)? {
                    checks.insert(check);
                }
            }
            Ok(GeometryRule {
                table_id: row.required("table_id")?.to_string(),
                geometry_type: row.geometry_type("geometry_type")?,
                checks,
            })
        })
        .collect()
}

pub fn load_attribute_rules(path: &Path) -> Result<Vec<AttributeRule>, ConfigError> {
    let Some(rows) = read_rows(path, &["table_id", "field", "check_type"])? else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|row| {
            let check = AttributeCheck::parse(
                row.required("check_type")?,
                row.optional("parameters").unwrap_or_default(),
            )
            .map_err(|message| row.invalid("check_type", &message))?;
            if let AttributeCheck::Pattern { pattern } = &check {
                Regex::new(pattern).map_err(|error| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: error.to_string(),
                })?;
            }
            Ok(AttributeRule {
                table_id: row.required("table_id")?.to_string(),
                field: row.required("field")?.to_string(),
                check,
            })
        })
        .collect()
}

pub fn load_relation_rules(path: &Path) -> Result<Vec<RelationRule>, ConfigError> {
    let Some(rows) = read_rows(path, &["case_type", "main_table", "related_table"])? else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|row| {
            let kind = row
                .required("case_type")?
                .parse::<RelationKind>()
                .map_err(|message| row.invalid("case_type", &message))?;
            let field_filter = FieldFilter::parse(row.optional("field_filter").unwrap_or_default())
                .map_err(|message| row.invalid("field_filter", &message))?;
            let tolerance = row.optional_f64("tolerance")?;
            if tolerance.is_some_and(|value| value < 0.0) {
                return Err(row.invalid("tolerance", "tolerance must not be negative"));
            }
            Ok(RelationRule {
                kind,
                main_table: row.required("main_table")?.to_string(),
                related_table: row.required("related_table")?.to_string(),
                field_filter,
                tolerance,
            })
        })
        .collect()
}

pub fn load_criteria(path: &Path) -> Result<Criteria, ConfigError> {
    let mut criteria = Criteria::new();
    let Some(rows) = read_rows(path, &["name", "value"])? else {
        return Ok(criteria);
    };
    for row in &rows {
        let name = row.required("name")?;
        let raw = row.optional("value").unwrap_or_default();
        let value = raw
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .ok_or_else(|| ConfigError::NonNumericCriterion {
                name: name.to_string(),
                value: raw.to_string(),
            })?;
        criteria.insert(name, value, row.optional("unit").map(str::to_string))?;
    }
    Ok(criteria)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        for yes in ["Y", "yes", "TRUE", "1", "O"] {
            assert_eq!(parse_flag(yes), Some(true), "{yes}");
        }
        for no in ["n", "No", "false", "0", "X"] {
            assert_eq!(parse_flag(no), Some(false), "{no}");
        }
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn foreign_keys_need_table_and_column() {
        assert_eq!(
            parse_foreign_key("parcel.PNU"),
            Some(ForeignKey {
                table: "parcel".into(),
                column: "PNU".into()
            })
        );
        assert_eq!(parse_foreign_key("parcel"), None);
        assert_eq!(parse_foreign_key(".PNU"), None);
    }
}
