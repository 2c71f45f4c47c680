#![deny(unsafe_code)]

//! Rule configuration for geospatial validation: typed rule records per stage,
//! the named criteria table and the CSV loader for a rules directory.

pub mod criteria;
pub mod error;
pub mod loader;
pub mod rules;

pub use criteria::{Criteria, Criterion, DEFAULT_RING_CLOSURE_TOLERANCE, names};
pub use error::ConfigError;
pub use loader::{
    ATTRIBUTE_FILE, CRITERIA_FILE, GEOMETRY_FILE, RELATION_FILE, SCHEMA_FILE, TABLE_FILE,
    load_rule_set,
};
pub use rules::{
    AttributeCheck, AttributeRule, DEFAULT_CONNECTIVITY_SEARCH_DISTANCE,
    DEFAULT_LINE_IN_POLYGON_TOLERANCE, DEFAULT_POINT_IN_POLYGON_TOLERANCE,
    DEFAULT_POLYGON_IN_POLYGON_TOLERANCE, FieldFilter, GeometryCheck, GeometryRule, RelationKind,
    RelationRule, RuleSet, SchemaRule, TableRule,
};
