//! Validation findings.
//!
//! The `Issue` enum provides type-safe finding creation where each variant
//! carries only its needed data: the table, the offending feature id(s), and
//! the measured value together with the threshold it was compared against.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::feature::FieldType;
use crate::geometry::{Coord, GeometryType};
use crate::stage::StageKind;

/// Maximum number of sample ids/values carried by aggregated findings.
pub const SAMPLE_LIMIT: usize = 5;

/// Finding severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fatal for the stage.
    Error,
    /// Non-fatal, should be reviewed.
    Warning,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Warning => "Warning",
        }
    }
}

impl FromStr for Severity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" | "오류" => Ok(Self::Error),
            "warning" | "warn" | "경고" => Ok(Self::Warning),
            _ => Err(ModelError::UnknownSeverity(s.to_string())),
        }
    }
}

/// Which key declaration a schema finding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    PrimaryKey,
    Unique,
}

impl KeyKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::PrimaryKey => "primary key",
            Self::Unique => "unique",
        }
    }
}

/// What an overlap finding measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMeasure {
    Area,
    Length,
}

/// Why an interior ring is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoleDefect {
    NotClosed,
    OutsideExterior,
    TouchesExterior,
    CrossesExterior,
}

impl HoleDefect {
    pub fn label(self) -> &'static str {
        match self {
            Self::NotClosed => "is not closed",
            Self::OutsideExterior => "lies outside the exterior ring",
            Self::TouchesExterior => "touches the exterior ring",
            Self::CrossesExterior => "crosses the exterior ring",
        }
    }
}

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Issue {
    // Table checks
    LayerMissing {
        table: String,
    },
    GeometryTypeMismatch {
        table: String,
        expected: Option<GeometryType>,
        actual: Option<GeometryType>,
    },
    LayerEmpty {
        table: String,
    },
    UnexpectedLayer {
        table: String,
    },

    // Schema checks
    ColumnMissing {
        table: String,
        column: String,
    },
    ColumnTypeMismatch {
        table: String,
        column: String,
        expected: FieldType,
        actual: FieldType,
    },
    ColumnLengthMismatch {
        table: String,
        column: String,
        expected: u32,
        actual: Option<u32>,
    },
    ColumnPrecisionMismatch {
        table: String,
        column: String,
        expected: u32,
        actual: Option<u32>,
    },
    NullabilityMismatch {
        table: String,
        column: String,
        expected_nullable: bool,
    },
    KeyDeclarationMismatch {
        table: String,
        column: String,
        key: KeyKind,
        expected: bool,
    },
    ForeignKeyDeclarationMismatch {
        table: String,
        column: String,
        expected: String,
        actual: Option<String>,
    },
    NullValues {
        table: String,
        column: String,
        count: u64,
        features: Vec<String>,
    },
    DuplicateValues {
        table: String,
        column: String,
        count: u64,
        values: Vec<String>,
    },
    ForeignKeyViolation {
        table: String,
        column: String,
        referenced: String,
        count: u64,
        features: Vec<String>,
        values: Vec<String>,
    },

    // Geometry checks
    MissingGeometry {
        table: String,
        feature: String,
    },
    DuplicateGeometry {
        table: String,
        feature: String,
        duplicate_of: String,
        tolerance: f64,
    },
    Overlap {
        table: String,
        feature: String,
        other: String,
        measure: OverlapMeasure,
        amount: f64,
        tolerance: f64,
    },
    SelfIntersection {
        table: String,
        feature: String,
        at: Coord,
        angle: f64,
        tolerance: f64,
    },
    SliverPolygon {
        table: String,
        feature: String,
        area: f64,
        shape_index: f64,
        elongation: f64,
        area_threshold: f64,
        shape_index_threshold: f64,
        elongation_threshold: f64,
    },
    ShortSegment {
        table: String,
        feature: String,
        at: Coord,
        length: f64,
        minimum: f64,
    },
    SmallPolygon {
        table: String,
        feature: String,
        area: f64,
        minimum: f64,
    },
    InvalidHole {
        table: String,
        feature: String,
        ring: usize,
        defect: HoleDefect,
    },
    TooFewVertices {
        table: String,
        feature: String,
        count: usize,
        minimum: usize,
    },
    Spike {
        table: String,
        feature: String,
        at: Coord,
        angle: f64,
        threshold: f64,
    },
    SelfOverlap {
        table: String,
        feature: String,
        length: f64,
    },
    Undershoot {
        table: String,
        feature: String,
        other: String,
        at: Coord,
        distance: f64,
        search_distance: f64,
    },
    Overshoot {
        table: String,
        feature: String,
        other: String,
        at: Coord,
        overshoot: f64,
        search_distance: f64,
    },

    // Attribute checks
    FieldMissing {
        table: String,
        field: String,
    },
    RequiredValueMissing {
        table: String,
        field: String,
        count: u64,
        features: Vec<String>,
    },
    CodeListViolation {
        table: String,
        field: String,
        count: u64,
        features: Vec<String>,
        values: Vec<String>,
        allowed: usize,
    },
    OutOfRange {
        table: String,
        field: String,
        count: u64,
        features: Vec<String>,
        values: Vec<String>,
        min: Option<f64>,
        max: Option<f64>,
    },
    PatternMismatch {
        table: String,
        field: String,
        count: u64,
        features: Vec<String>,
        values: Vec<String>,
        pattern: String,
    },

    // Relation checks
    RelatedTableMissing {
        table: String,
        related_table: String,
    },
    PointOutsidePolygon {
        table: String,
        feature: String,
        related_table: String,
        distance: f64,
        tolerance: f64,
    },
    LineOutsidePolygon {
        table: String,
        feature: String,
        related_table: String,
        outside_length: f64,
        tolerance: f64,
    },
    PolygonOutsidePolygon {
        table: String,
        feature: String,
        related_table: String,
        outside_area: f64,
        tolerance: f64,
    },
    PolygonWithinPolygon {
        table: String,
        feature: String,
        related_table: String,
        related_feature: String,
    },
    Disconnected {
        table: String,
        feature: String,
        related_table: String,
        at: Coord,
        search_distance: f64,
    },
}

impl Issue {
    /// Stable rule name (matches the serialized `rule` tag).
    pub fn rule(&self) -> &'static str {
        match self {
            Issue::LayerMissing { .. } => "layer_missing",
            Issue::GeometryTypeMismatch { .. } => "geometry_type_mismatch",
            Issue::LayerEmpty { .. } => "layer_empty",
            Issue::UnexpectedLayer { .. } => "unexpected_layer",
            Issue::ColumnMissing { .. } => "column_missing",
            Issue::ColumnTypeMismatch { .. } => "column_type_mismatch",
            Issue::ColumnLengthMismatch { .. } => "column_length_mismatch",
            Issue::ColumnPrecisionMismatch { .. } => "column_precision_mismatch",
            Issue::NullabilityMismatch { .. } => "nullability_mismatch",
            Issue::KeyDeclarationMismatch { .. } => "key_declaration_mismatch",
            Issue::ForeignKeyDeclarationMismatch { .. } => "foreign_key_declaration_mismatch",
            Issue::NullValues { .. } => "null_values",
            Issue::DuplicateValues { .. } => "duplicate_values",
            Issue::ForeignKeyViolation { .. } => "foreign_key_violation",
            Issue::MissingGeometry { .. } => "missing_geometry",
            Issue::DuplicateGeometry { .. } => "duplicate_geometry",
            Issue::Overlap { .. } => "overlap",
            Issue::SelfIntersection { .. } => "self_intersection",
            Issue::SliverPolygon { .. } => "sliver_polygon",
            Issue::ShortSegment { .. } => "short_segment",
            Issue::SmallPolygon { .. } => "small_polygon",
            Issue::InvalidHole { .. } => "invalid_hole",
            Issue::TooFewVertices { .. } => "too_few_vertices",
            Issue::Spike { .. } => "spike",
            Issue::SelfOverlap { .. } => "self_overlap",
            Issue::Undershoot { .. } => "undershoot",
            Issue::Overshoot { .. } => "overshoot",
            Issue::FieldMissing { .. } => "field_missing",
            Issue::RequiredValueMissing { .. } => "required_value_missing",
            Issue::CodeListViolation { .. } => "code_list_violation",
            Issue::OutOfRange { .. } => "out_of_range",
            Issue::PatternMismatch { .. } => "pattern_mismatch",
            Issue::RelatedTableMissing { .. } => "related_table_missing",
            Issue::PointOutsidePolygon { .. } => "point_outside_polygon",
            Issue::LineOutsidePolygon { .. } => "line_outside_polygon",
            Issue::PolygonOutsidePolygon { .. } => "polygon_outside_polygon",
            Issue::PolygonWithinPolygon { .. } => "polygon_within_polygon",
            Issue::Disconnected { .. } => "disconnected",
        }
    }

    /// Stage whose rule family produces this issue.
    pub fn stage(&self) -> StageKind {
        match self {
            Issue::LayerMissing { .. }
            | Issue::GeometryTypeMismatch { .. }
            | Issue::LayerEmpty { .. }
            | Issue::UnexpectedLayer { .. } => StageKind::Table,
            Issue::ColumnMissing { .. }
            | Issue::ColumnTypeMismatch { .. }
            | Issue::ColumnLengthMismatch { .. }
            | Issue::ColumnPrecisionMismatch { .. }
            | Issue::NullabilityMismatch { .. }
            | Issue::KeyDeclarationMismatch { .. }
            | Issue::ForeignKeyDeclarationMismatch { .. }
            | Issue::NullValues { .. }
            | Issue::DuplicateValues { .. }
            | Issue::ForeignKeyViolation { .. } => StageKind::Schema,
            Issue::MissingGeometry { .. }
            | Issue::DuplicateGeometry { .. }
            | Issue::Overlap { .. }
            | Issue::SelfIntersection { .. }
            | Issue::SliverPolygon { .. }
            | Issue::ShortSegment { .. }
            | Issue::SmallPolygon { .. }
            | Issue::InvalidHole { .. }
            | Issue::TooFewVertices { .. }
            | Issue::Spike { .. }
            | Issue::SelfOverlap { .. }
            | Issue::Undershoot { .. }
            | Issue::Overshoot { .. } => StageKind::Geometry,
            Issue::FieldMissing { .. }
            | Issue::RequiredValueMissing { .. }
            | Issue::CodeListViolation { .. }
            | Issue::OutOfRange { .. }
            | Issue::PatternMismatch { .. } => StageKind::Attribute,
            Issue::RelatedTableMissing { .. }
            | Issue::PointOutsidePolygon { .. }
            | Issue::LineOutsidePolygon { .. }
            | Issue::PolygonOutsidePolygon { .. }
            | Issue::PolygonWithinPolygon { .. }
            | Issue::Disconnected { .. } => StageKind::Relation,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Issue::LayerEmpty { .. }
            | Issue::UnexpectedLayer { .. }
            | Issue::ColumnLengthMismatch { .. }
            | Issue::ColumnPrecisionMismatch { .. }
            | Issue::ShortSegment { .. }
            | Issue::SliverPolygon { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Table the issue was found in (all issues have one).
    pub fn table(&self) -> &str {
        match self {
            Issue::LayerMissing { table }
            | Issue::GeometryTypeMismatch { table, .. }
            | Issue::LayerEmpty { table }
            | Issue::UnexpectedLayer { table }
            | Issue::ColumnMissing { table, .. }
            | Issue::ColumnTypeMismatch { table, .. }
            | Issue::ColumnLengthMismatch { table, .. }
            | Issue::ColumnPrecisionMismatch { table, .. }
            | Issue::NullabilityMismatch { table, .. }
            | Issue::KeyDeclarationMismatch { table, .. }
            | Issue::ForeignKeyDeclarationMismatch { table, .. }
            | Issue::NullValues { table, .. }
            | Issue::DuplicateValues { table, .. }
            | Issue::ForeignKeyViolation { table, .. }
            | Issue::MissingGeometry { table, .. }
            | Issue::DuplicateGeometry { table, .. }
            | Issue::Overlap { table, .. }
            | Issue::SelfIntersection { table, .. }
            | Issue::SliverPolygon { table, .. }
            | Issue::ShortSegment { table, .. }
            | Issue::SmallPolygon { table, .. }
            | Issue::InvalidHole { table, .. }
            | Issue::TooFewVertices { table, .. }
            | Issue::Spike { table, .. }
            | Issue::SelfOverlap { table, .. }
            | Issue::Undershoot { table, .. }
            | Issue::Overshoot { table, .. }
            | Issue::FieldMissing { table, .. }
            | Issue::RequiredValueMissing { table, .. }
            | Issue::CodeListViolation { table, .. }
            | Issue::OutOfRange { table, .. }
            | Issue::PatternMismatch { table, .. }
            | Issue::RelatedTableMissing { table, .. }
            | Issue::PointOutsidePolygon { table, .. }
            | Issue::LineOutsidePolygon { table, .. }
            | Issue::PolygonOutsidePolygon { table, .. }
            | Issue::PolygonWithinPolygon { table, .. }
            | Issue::Disconnected { table, .. } => table,
        }
    }

    /// Offending feature ids; aggregated issues return their samples.
    pub fn feature_ids(&self) -> Vec<&str> {
        match self {
            Issue::DuplicateGeometry {
                feature,
                duplicate_of,
                ..
            } => vec![feature, duplicate_of],
            Issue::Overlap { feature, other, .. }
            | Issue::Undershoot { feature, other, .. }
            | Issue::Overshoot { feature, other, .. } => vec![feature, other],
            Issue::PolygonWithinPolygon {
                feature,
                related_feature,
                ..
            } => vec![feature, related_feature],
            Issue::MissingGeometry { feature, .. }
            | Issue::SelfIntersection { feature, .. }
            | Issue::SliverPolygon { feature, .. }
            | Issue::ShortSegment { feature, .. }
            | Issue::SmallPolygon { feature, .. }
            | Issue::InvalidHole { feature, .. }
            | Issue::TooFewVertices { feature, .. }
            | Issue::Spike { feature, .. }
            | Issue::SelfOverlap { feature, .. }
            | Issue::PointOutsidePolygon { feature, .. }
            | Issue::LineOutsidePolygon { feature, .. }
            | Issue::PolygonOutsidePolygon { feature, .. }
            | Issue::Disconnected { feature, .. } => vec![feature],
            Issue::NullValues { features, .. }
            | Issue::ForeignKeyViolation { features, .. }
            | Issue::RequiredValueMissing { features, .. }
            | Issue::CodeListViolation { features, .. }
            | Issue::OutOfRange { features, .. }
            | Issue::PatternMismatch { features, .. } => {
                features.iter().map(String::as_str).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Human-readable description with the measured value and its threshold.
    pub fn message(&self) -> String {
        match self {
            Issue::LayerMissing { table } => format!("Table {table} is missing from the dataset"),
            Issue::GeometryTypeMismatch {
                table,
                expected,
                actual,
            } => format!(
                "Table {table} has geometry type {} but {} is expected",
                geometry_label(*actual),
                geometry_label(*expected)
            ),
            Issue::LayerEmpty { table } => format!("Table {table} contains no features"),
            Issue::UnexpectedLayer { table } => {
                format!("Table {table} is not covered by any table rule")
            }

            Issue::ColumnMissing { table, column } => {
                format!("Column {column} is missing from table {table}")
            }
            Issue::ColumnTypeMismatch {
                table,
                column,
                expected,
                actual,
            } => format!("Column {table}.{column} has type {actual} but {expected} is expected"),
            Issue::ColumnLengthMismatch {
                table,
                column,
                expected,
                actual,
            } => format!(
                "Column {table}.{column} has length {} but {expected} is expected",
                optional_number(*actual)
            ),
            Issue::ColumnPrecisionMismatch {
                table,
                column,
                expected,
                actual,
            } => format!(
                "Column {table}.{column} has precision {} but {expected} is expected",
                optional_number(*actual)
            ),
            Issue::NullabilityMismatch {
                table,
                column,
                expected_nullable,
            } => {
                let expected = if *expected_nullable {
                    "nullable"
                } else {
                    "NOT NULL"
                };
                format!("Column {table}.{column} should be declared {expected}")
            }
            Issue::KeyDeclarationMismatch {
                table,
                column,
                key,
                expected,
            } => {
                let verb = if *expected { "should" } else { "should not" };
                format!("Column {table}.{column} {verb} be declared {}", key.label())
            }
            Issue::ForeignKeyDeclarationMismatch {
                table,
                column,
                expected,
                actual,
            } => format!(
                "Column {table}.{column} references {} but {expected} is expected",
                actual.as_deref().unwrap_or("nothing")
            ),
            Issue::NullValues {
                table,
                column,
                count,
                features,
            } => format!(
                "Column {table}.{column} is NOT NULL but has {count} null values{}",
                samples(features)
            ),
            Issue::DuplicateValues {
                table,
                column,
                count,
                values,
            } => format!(
                "Column {table}.{column} must be unique but has {count} duplicate values{}",
                samples(values)
            ),
            Issue::ForeignKeyViolation {
                table,
                column,
                referenced,
                count,
                values,
                ..
            } => format!(
                "Column {table}.{column} has {count} values not found in {referenced}{}",
                samples(values)
            ),

            Issue::MissingGeometry { table, feature } => {
                format!("Feature {feature} in {table} has no geometry")
            }
            Issue::DuplicateGeometry {
                table,
                feature,
                duplicate_of,
                tolerance,
            } => format!(
                "Feature {feature} in {table} duplicates feature {duplicate_of} \
                 (within tolerance {tolerance})"
            ),
            Issue::Overlap {
                table,
                feature,
                other,
                measure,
                amount,
                tolerance,
            } => {
                let what = match measure {
                    OverlapMeasure::Area => "area",
                    OverlapMeasure::Length => "length",
                };
                format!(
                    "Feature {feature} in {table} overlaps feature {other} by {what} {amount:.3} \
                     (tolerance {tolerance})"
                )
            }
            Issue::SelfIntersection {
                table,
                feature,
                at,
                angle,
                tolerance,
            } => format!(
                "Feature {feature} in {table} intersects itself at ({:.3}, {:.3}) with crossing \
                 angle {angle:.1}° (tolerance {tolerance}°)",
                at.x, at.y
            ),
            Issue::SliverPolygon {
                table,
                feature,
                area,
                shape_index,
                elongation,
                area_threshold,
                shape_index_threshold,
                elongation_threshold,
            } => format!(
                "Feature {feature} in {table} is a sliver polygon: area {area:.3} < \
                 {area_threshold}, shape index {shape_index:.3} (threshold \
                 {shape_index_threshold}), elongation {elongation:.2} (threshold \
                 {elongation_threshold})"
            ),
            Issue::ShortSegment {
                table,
                feature,
                at,
                length,
                minimum,
            } => format!(
                "Feature {feature} in {table} has a segment of length {length:.3} at ({:.3}, \
                 {:.3}) shorter than minimum {minimum}",
                at.x, at.y
            ),
            Issue::SmallPolygon {
                table,
                feature,
                area,
                minimum,
            } => format!(
                "Feature {feature} in {table} has area {area:.3} smaller than minimum {minimum}"
            ),
            Issue::InvalidHole {
                table,
                feature,
                ring,
                defect,
            } => format!(
                "Feature {feature} in {table}: interior ring {ring} {}",
                defect.label()
            ),
            Issue::TooFewVertices {
                table,
                feature,
                count,
                minimum,
            } => format!(
                "Feature {feature} in {table} has {count} vertices, at least {minimum} required"
            ),
            Issue::Spike {
                table,
                feature,
                at,
                angle,
                threshold,
            } => format!(
                "Feature {feature} in {table} has a spike of {angle:.2}° at ({:.3}, {:.3}) \
                 (threshold {threshold}°)",
                at.x, at.y
            ),
            Issue::SelfOverlap {
                table,
                feature,
                length,
            } => format!("Feature {feature} in {table} retraces itself over length {length:.3}"),
            Issue::Undershoot {
                table,
                feature,
                other,
                at,
                distance,
                search_distance,
            } => format!(
                "Feature {feature} in {table} ends at ({:.3}, {:.3}) {distance:.3} short of \
                 feature {other} (search distance {search_distance})",
                at.x, at.y
            ),
            Issue::Overshoot {
                table,
                feature,
                other,
                at,
                overshoot,
                search_distance,
            } => format!(
                "Feature {feature} in {table} extends {overshoot:.3} past feature {other} at \
                 ({:.3}, {:.3}) (search distance {search_distance})",
                at.x, at.y
            ),

            Issue::FieldMissing { table, field } => {
                format!("Field {field} is missing from table {table}")
            }
            Issue::RequiredValueMissing {
                table,
                field,
                count,
                features,
            } => format!(
                "Field {table}.{field} requires a value but {count} features have none{}",
                samples(features)
            ),
            Issue::CodeListViolation {
                table,
                field,
                count,
                values,
                allowed,
                ..
            } => format!(
                "Field {table}.{field} has {count} values outside its code list of {allowed} \
                 codes{}",
                samples(values)
            ),
            Issue::OutOfRange {
                table,
                field,
                count,
                values,
                min,
                max,
                ..
            } => format!(
                "Field {table}.{field} has {count} values outside [{}, {}]{}",
                optional_bound(*min),
                optional_bound(*max),
                samples(values)
            ),
            Issue::PatternMismatch {
                table,
                field,
                count,
                values,
                pattern,
                ..
            } => format!(
                "Field {table}.{field} has {count} values not matching /{pattern}/{}",
                samples(values)
            ),

            Issue::RelatedTableMissing {
                table,
                related_table,
            } => format!("Relation from {table} references missing table {related_table}"),
            Issue::PointOutsidePolygon {
                table,
                feature,
                related_table,
                distance,
                tolerance,
            } => format!(
                "Point {feature} in {table} lies {distance:.3} outside every polygon of \
                 {related_table} (tolerance {tolerance})"
            ),
            Issue::LineOutsidePolygon {
                table,
                feature,
                related_table,
                outside_length,
                tolerance,
            } => format!(
                "Line {feature} in {table} runs {outside_length:.3} outside the polygons of \
                 {related_table} (tolerance {tolerance})"
            ),
            Issue::PolygonOutsidePolygon {
                table,
                feature,
                related_table,
                outside_area,
                tolerance,
            } => format!(
                "Polygon {feature} in {table} has area {outside_area:.3} outside the polygons of \
                 {related_table} (tolerance {tolerance})"
            ),
            Issue::PolygonWithinPolygon {
                table,
                feature,
                related_table,
                related_feature,
            } => format!(
                "Polygon {feature} in {table} lies within polygon {related_feature} of \
                 {related_table}"
            ),
            Issue::Disconnected {
                table,
                feature,
                related_table,
                at,
                search_distance,
            } => format!(
                "Line {feature} in {table} has an endpoint at ({:.3}, {:.3}) with no connecting \
                 line in {related_table} within {search_distance}",
                at.x, at.y
            ),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity().label(), self.message())
    }
}

/// Flat view of an [`Issue`] for reports and tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: String,
    pub stage: StageKind,
    pub severity: Severity,
    pub table: String,
    pub feature_ids: Vec<String>,
    pub message: String,
}

impl From<&Issue> for Finding {
    fn from(issue: &Issue) -> Self {
        Self {
            rule: issue.rule().to_string(),
            stage: issue.stage(),
            severity: issue.severity(),
            table: issue.table().to_string(),
            feature_ids: issue.feature_ids().into_iter().map(str::to_string).collect(),
            message: issue.message(),
        }
    }
}

fn geometry_label(geometry_type: Option<GeometryType>) -> &'static str {
    geometry_type.map_or("none", GeometryType::label)
}

fn optional_number(value: Option<u32>) -> String {
    value.map_or_else(|| "unset".to_string(), |v| v.to_string())
}

fn optional_bound(value: Option<f64>) -> String {
    value.map_or_else(|| "-inf".to_string(), |v| v.to_string())
}

fn samples(values: &[String]) -> String {
    if values.is_empty() {
        String::new()
    } else {
        format!(" (e.g., {})", values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_tag_matches_rule_name() {
        let issue = Issue::SmallPolygon {
            table: "building".into(),
            feature: "7".into(),
            area: 0.5,
            minimum: 1.0,
        };
        let json = serde_json::to_value(&issue).expect("serialize issue");
        assert_eq!(json["rule"], issue.rule());
        assert_eq!(issue.stage(), StageKind::Geometry);
        assert_eq!(issue.feature_ids(), vec!["7"]);
    }

    #[test]
    fn finding_flattens_issue() {
        let issue = Issue::Overlap {
            table: "building".into(),
            feature: "2".into(),
            other: "1".into(),
            measure: OverlapMeasure::Area,
            amount: 1.5,
            tolerance: 0.1,
        };
        let finding = Finding::from(&issue);
        assert_eq!(finding.rule, "overlap");
        assert_eq!(finding.table, "building");
        assert_eq!(finding.feature_ids, vec!["2", "1"]);
        assert_eq!(finding.message, issue.message());
    }

    #[test]
    fn warnings_are_non_fatal_rules() {
        let warning = Issue::LayerEmpty {
            table: "road".into(),
        };
        let error = Issue::LayerMissing {
            table: "road".into(),
        };
        assert_eq!(warning.severity(), Severity::Warning);
        assert_eq!(error.severity(), Severity::Error);
    }
}
