//! Typed rule records, one family per validation stage.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use geoval_model::{Feature, FieldType, ForeignKey, GeometryType, StageKind};

use crate::criteria::{Criteria, names};
use crate::error::ConfigError;

/// Stage 1: expected table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRule {
    pub table_id: String,
    pub table_name: Option<String>,
    pub geometry_type: Option<GeometryType>,
    /// A missing required table is an error.
    pub required: bool,
}

/// Stage 2: one column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRule {
    pub table_id: String,
    pub column: String,
    pub field_type: Option<FieldType>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub nullable: Option<bool>,
    pub primary_key: bool,
    pub unique: bool,
    pub foreign_key: Option<ForeignKey>,
}

/// Stage 3 sub-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryCheck {
    Duplicate,
    Overlap,
    SelfIntersection,
    Sliver,
    ShortSegment,
    SmallPolygon,
    InvalidHole,
    MinimumVertices,
    Spike,
    SelfOverlap,
    Undershoot,
    Overshoot,
}

impl GeometryCheck {
    pub const ALL: [GeometryCheck; 12] = [
        GeometryCheck::Duplicate,
        GeometryCheck::Overlap,
        GeometryCheck::SelfIntersection,
        GeometryCheck::Sliver,
        GeometryCheck::ShortSegment,
        GeometryCheck::SmallPolygon,
        GeometryCheck::InvalidHole,
        GeometryCheck::MinimumVertices,
        GeometryCheck::Spike,
        GeometryCheck::SelfOverlap,
        GeometryCheck::Undershoot,
        GeometryCheck::Overshoot,
    ];

    /// Column name in `geometry.csv`.
    pub fn column(self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Overlap => "overlap",
            Self::SelfIntersection => "self_intersection",
            Self::Sliver => "sliver",
            Self::ShortSegment => "short_segment",
            Self::SmallPolygon => "small_polygon",
            Self::InvalidHole => "invalid_hole",
            Self::MinimumVertices => "minimum_vertices",
            Self::Spike => "spike",
            Self::SelfOverlap => "self_overlap",
            Self::Undershoot => "undershoot",
            Self::Overshoot => "overshoot",
        }
    }

    /// Whether the check is meaningful for a geometry family.
    pub fn applies_to(self, geometry_type: GeometryType) -> bool {
        match self {
            Self::Duplicate => true,
            Self::Overlap
            | Self::SelfIntersection
            | Self::MinimumVertices
            | Self::Spike
            | Self::SelfOverlap => {
                matches!(geometry_type, GeometryType::Line | GeometryType::Polygon)
            }
            Self::Sliver | Self::SmallPolygon | Self::InvalidHole => {
                geometry_type == GeometryType::Polygon
            }
            Self::ShortSegment | Self::Undershoot | Self::Overshoot => {
                geometry_type == GeometryType::Line
            }
        }
    }

    /// Criteria that must be present when the check is enabled.
    pub fn required_criteria(self) -> &'static [&'static str] {
        match self {
            Self::Duplicate => &[names::DUPLICATE_TOLERANCE],
            Self::Overlap => &[names::OVERLAP_TOLERANCE],
            Self::SelfIntersection => &[names::SELF_INTERSECTION_ANGLE],
            Self::Sliver => &[
                names::SLIVER_AREA,
                names::SLIVER_SHAPE_INDEX,
                names::SLIVER_ELONGATION,
            ],
            Self::ShortSegment => &[names::MIN_LINE_LENGTH],
            Self::SmallPolygon => &[names::MIN_POLYGON_AREA],
            Self::Spike => &[names::SPIKE_ANGLE],
            Self::Undershoot | Self::Overshoot => &[names::NETWORK_SEARCH_DISTANCE],
            Self::InvalidHole | Self::MinimumVertices | Self::SelfOverlap => &[],
        }
    }
}

impl fmt::Display for GeometryCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Stage 3: enabled geometry checks for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRule {
    pub table_id: String,
    /// Overrides the layer's reported geometry type when set.
    pub geometry_type: Option<GeometryType>,
    pub checks: BTreeSet<GeometryCheck>,
}

impl GeometryRule {
    pub fn is_enabled(&self, check: GeometryCheck) -> bool {
        self.checks.contains(&check)
    }
}

/// Stage 4 check types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeCheck {
    CodeList { codes: Vec<String> },
    Range { min: Option<f64>, max: Option<f64> },
    Pattern { pattern: String },
    NotNull,
}

impl AttributeCheck {
    /// Build a check from its `check_type` and `parameters` cells.
    pub fn parse(check_type: &str, parameters: &str) -> Result<Self, String> {
        let parameters = parameters.trim();
        match check_type.trim().to_lowercase().as_str() {
            "codelist" | "code_list" | "code" | "코드" => {
                let codes: Vec<String> = parameters
                    .split([';', '|'])
                    .map(str::trim)
                    .filter(|code| !code.is_empty())
                    .map(str::to_string)
                    .collect();
                if codes.is_empty() {
                    return Err("code list requires at least one code".to_string());
                }
                Ok(Self::CodeList { codes })
            }
            "range" | "범위" => {
                let (min, max) = parameters
                    .split_once("..")
                    .or_else(|| parameters.split_once('~'))
                    .ok_or_else(|| format!("range must look like min..max, got {parameters:?}"))?;
                let min = parse_bound(min)?;
                let max = parse_bound(max)?;
                if let (Some(lo), Some(hi)) = (min, max)
                    && lo > hi
                {
                    return Err(format!("range minimum {lo} exceeds maximum {hi}"));
                }
                Ok(Self::Range { min, max })
            }
            "pattern" | "regex" | "패턴" => {
                if parameters.is_empty() {
                    return Err("pattern requires a regular expression".to_string());
                }
                Ok(Self::Pattern {
                    pattern: parameters.to_string(),
                })
            }
            "notnull" | "not_null" | "required" | "필수" => Ok(Self::NotNull),
            other => Err(format!("unknown attribute check type {other:?}")),
        }
    }
}

fn parse_bound(value: &str) -> Result<Option<f64>, String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("range bound {value:?} is not a number"))
}

/// Stage 4: one field check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRule {
    pub table_id: String,
    pub field: String,
    pub check: AttributeCheck,
}

/// Stage 5 relation case types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    PointInsidePolygon,
    LineWithinPolygon,
    PolygonWithinPolygon,
    PolygonNotWithinPolygon,
    LineConnectivity,
}

/// Default tolerance for [`RelationKind::PointInsidePolygon`].
pub const DEFAULT_POINT_IN_POLYGON_TOLERANCE: f64 = 0.0;
/// Default tolerance for [`RelationKind::LineWithinPolygon`].
pub const DEFAULT_LINE_IN_POLYGON_TOLERANCE: f64 = 0.001;
/// Default tolerance for polygon containment cases.
pub const DEFAULT_POLYGON_IN_POLYGON_TOLERANCE: f64 = 0.001;
/// Default search distance for [`RelationKind::LineConnectivity`].
pub const DEFAULT_CONNECTIVITY_SEARCH_DISTANCE: f64 = 1.0;

impl RelationKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::PointInsidePolygon => "PointInsidePolygon",
            Self::LineWithinPolygon => "LineWithinPolygon",
            Self::PolygonWithinPolygon => "PolygonWithinPolygon",
            Self::PolygonNotWithinPolygon => "PolygonNotWithinPolygon",
            Self::LineConnectivity => "LineConnectivity",
        }
    }

    pub fn default_tolerance(self) -> f64 {
        match self {
            Self::PointInsidePolygon => DEFAULT_POINT_IN_POLYGON_TOLERANCE,
            Self::LineWithinPolygon => DEFAULT_LINE_IN_POLYGON_TOLERANCE,
            Self::PolygonWithinPolygon | Self::PolygonNotWithinPolygon => {
                DEFAULT_POLYGON_IN_POLYGON_TOLERANCE
            }
            Self::LineConnectivity => DEFAULT_CONNECTIVITY_SEARCH_DISTANCE,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        [
            Self::PointInsidePolygon,
            Self::LineWithinPolygon,
            Self::PolygonWithinPolygon,
            Self::PolygonNotWithinPolygon,
            Self::LineConnectivity,
        ]
        .into_iter()
        .find(|kind| kind.label().to_lowercase() == normalized)
        .ok_or_else(|| format!("unknown relation case type {s:?}"))
    }
}

/// Restricts which related features participate in a relation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub values: BTreeSet<String>,
}

impl FieldFilter {
    /// Parse `FIELD=v1;v2`.
    pub fn parse(text: &str) -> Result<Option<Self>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let (field, values) = text
            .split_once('=')
            .ok_or_else(|| format!("field filter must look like FIELD=v1;v2, got {text:?}"))?;
        let values: BTreeSet<String> = values
            .split([';', '|'])
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect();
        if field.trim().is_empty() || values.is_empty() {
            return Err(format!("field filter {text:?} needs a field and values"));
        }
        Ok(Some(Self {
            field: field.trim().to_string(),
            values,
        }))
    }

    pub fn matches(&self, feature: &Feature) -> bool {
        feature
            .attribute(&self.field)
            .and_then(geoval_model::AttributeValue::as_key)
            .is_some_and(|value| self.values.contains(&value))
    }
}

/// Stage 5: one relation between a main and a related table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRule {
    pub kind: RelationKind,
    pub main_table: String,
    pub related_table: String,
    pub field_filter: Option<FieldFilter>,
    pub tolerance: Option<f64>,
}

impl RelationRule {
    /// Configured tolerance, or the case type's default when absent.
    pub fn effective_tolerance(&self) -> f64 {
        self.tolerance.unwrap_or_else(|| self.kind.default_tolerance())
    }
}

/// All rule tables for a run plus the criteria table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub tables: Vec<TableRule>,
    pub schemas: Vec<SchemaRule>,
    pub geometries: Vec<GeometryRule>,
    pub attributes: Vec<AttributeRule>,
    pub relations: Vec<RelationRule>,
    pub criteria: Criteria,
}

impl RuleSet {
    /// Selectable rule items of a stage, keyed by table id (the main table
    /// for relations).
    pub fn items(&self, stage: StageKind) -> BTreeSet<String> {
        match stage {
            StageKind::Table => self.tables.iter().map(|r| r.table_id.clone()).collect(),
            StageKind::Schema => self.schemas.iter().map(|r| r.table_id.clone()).collect(),
            StageKind::Geometry => self.geometries.iter().map(|r| r.table_id.clone()).collect(),
            StageKind::Attribute => self.attributes.iter().map(|r| r.table_id.clone()).collect(),
            StageKind::Relation => self.relations.iter().map(|r| r.main_table.clone()).collect(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.tables.len()
            + self.schemas.len()
            + self.geometries.iter().map(|r| r.checks.len()).sum::<usize>()
            + self.attributes.len()
            + self.relations.len()
    }

    /// Verify every threshold needed by an enabled geometry check resolves.
    ///
    /// `selected` decides whether a table's rules take part in the run; rules
    /// outside the selection do not need their criteria.
    pub fn check_criteria(&self, selected: impl Fn(&str) -> bool) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for rule in self.geometries.iter().filter(|r| selected(&r.table_id)) {
            for check in &rule.checks {
                for name in check.required_criteria() {
                    if seen.insert(*name) {
                        self.criteria
                            .require(name, &format!("{} on {}", check, rule.table_id))?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoval_model::AttributeValue;

    #[test]
    fn attribute_checks_parse() {
        assert_eq!(
            AttributeCheck::parse("codelist", "A001; A002|A003"),
            Ok(AttributeCheck::CodeList {
                codes: vec!["A001".into(), "A002".into(), "A003".into()]
            })
        );
        assert_eq!(
            AttributeCheck::parse("range", "..100"),
            Ok(AttributeCheck::Range {
                min: None,
                max: Some(100.0)
            })
        );
        assert!(AttributeCheck::parse("range", "5..1").is_err());
        assert!(AttributeCheck::parse("checksum", "").is_err());
    }

    #[test]
    fn relation_kind_parses_loosely() {
        assert_eq!(
            "line_within_polygon".parse::<RelationKind>(),
            Ok(RelationKind::LineWithinPolygon)
        );
        assert_eq!(
            "LineConnectivity".parse::<RelationKind>(),
            Ok(RelationKind::LineConnectivity)
        );
    }

    #[test]
    fn absent_tolerance_uses_case_default() {
        let rule = RelationRule {
            kind: RelationKind::LineConnectivity,
            main_table: "road".into(),
            related_table: "road".into(),
            field_filter: None,
            tolerance: None,
        };
        assert_eq!(rule.effective_tolerance(), DEFAULT_CONNECTIVITY_SEARCH_DISTANCE);
    }

    #[test]
    fn field_filter_matches_attribute_values() {
        let filter = FieldFilter::parse("KIND=A;B")
            .expect("parse filter")
            .expect("filter present");
        let yes = Feature::new("1", None).with_attribute("KIND", "B");
        let no = Feature::new("2", None).with_attribute("KIND", AttributeValue::Null);
        assert!(filter.matches(&yes));
        assert!(!filter.matches(&no));
        assert_eq!(FieldFilter::parse("  "), Ok(None));
    }

    #[test]
    fn criteria_check_honours_selection() {
        let rules = RuleSet {
            geometries: vec![GeometryRule {
                table_id: "building".into(),
                geometry_type: None,
                checks: [GeometryCheck::SmallPolygon].into_iter().collect(),
            }],
            ..RuleSet::default()
        };
        assert!(rules.check_criteria(|_| true).is_err());
        assert!(rules.check_criteria(|table| table != "building").is_ok());
    }
}
