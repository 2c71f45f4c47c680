//! Layers, field schemas and features as exposed by a data provider.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::geometry::{Geometry, GeometryType};

/// Layer metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub id: String,
    pub name: String,
    /// `None` for attribute-only tables.
    pub geometry_type: Option<GeometryType>,
    pub feature_count: u64,
}

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Date,
    Boolean,
}

impl FieldType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Date => "date",
            Self::Boolean => "boolean",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FieldType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "int" | "integer" | "int32" | "int64" | "smallint" | "bigint" => Ok(Self::Integer),
            "real" | "float" | "double" | "numeric" | "decimal" | "number" => Ok(Self::Real),
            "text" | "string" | "varchar" | "char" | "character" => Ok(Self::Text),
            "date" | "datetime" | "timestamp" => Ok(Self::Date),
            "bool" | "boolean" => Ok(Self::Boolean),
            _ => Err(ModelError::UnknownFieldType(s.to_string())),
        }
    }
}

/// Foreign key declaration on a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub foreign_key: Option<ForeignKey>,
}

fn default_nullable() -> bool {
    true
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            length: None,
            precision: None,
            nullable: true,
            is_primary_key: false,
            is_unique: false,
            foreign_key: None,
        }
    }
}

/// An attribute value read from a feature.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Null or blank text.
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Value rendered for comparisons and messages; `None` when missing.
    pub fn as_key(&self) -> Option<String> {
        if self.is_missing() {
            return None;
        }
        Some(match self {
            Self::Text(text) => text.trim().to_string(),
            other => other.to_string(),
        })
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// A single feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Feature {
    pub fn new(id: impl Into<String>, geometry: Option<Geometry>) -> Self {
        Self {
            id: id.into(),
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Attribute lookup, exact name first, then case-insensitive.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_lookup_is_case_insensitive() {
        let feature = Feature::new("1", None).with_attribute("ROAD_CODE", "A001");
        assert_eq!(
            feature.attribute("road_code").and_then(AttributeValue::as_key),
            Some("A001".to_string())
        );
        assert!(feature.attribute("missing").is_none());
    }

    #[test]
    fn blank_text_is_missing() {
        assert!(AttributeValue::Text("  ".into()).is_missing());
        assert!(AttributeValue::Null.is_missing());
        assert!(!AttributeValue::Integer(0).is_missing());
    }

    #[test]
    fn untagged_values_deserialize_by_shape() {
        let values: Vec<AttributeValue> =
            serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).expect("parse values");
        assert_eq!(
            values,
            vec![
                AttributeValue::Null,
                AttributeValue::Bool(true),
                AttributeValue::Integer(3),
                AttributeValue::Float(2.5),
                AttributeValue::Text("x".into()),
            ]
        );
    }
}
