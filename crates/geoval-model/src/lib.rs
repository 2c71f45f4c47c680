pub mod error;
pub mod feature;
pub mod geometry;
pub mod issue;
pub mod result;
pub mod stage;

pub use error::{ModelError, Result};
pub use feature::{AttributeValue, Feature, FieldDef, FieldType, ForeignKey, LayerInfo};
pub use geometry::{Coord, Geometry, GeometryType, LineString, Polygon};
pub use issue::{Finding, HoleDefect, Issue, KeyKind, OverlapMeasure, SAMPLE_LIMIT, Severity};
pub use result::{RunContext, RunHistoryRecord, RunOutcome, StageResult, ValidationResult};
pub use stage::{STAGE_CATALOG, STAGE_COUNT, StageDefinition, StageKind, StageStatus};
