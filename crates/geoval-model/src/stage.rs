//! Fixed validation stage catalog and stage lifecycle status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Number of stages in the catalog.
pub const STAGE_COUNT: usize = 5;

/// One of the five ordered validation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Table,
    Schema,
    Geometry,
    Attribute,
    Relation,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; STAGE_COUNT] = [
        StageKind::Table,
        StageKind::Schema,
        StageKind::Geometry,
        StageKind::Attribute,
        StageKind::Relation,
    ];

    /// 1-based stage number.
    pub fn number(self) -> u8 {
        match self {
            Self::Table => 1,
            Self::Schema => 2,
            Self::Geometry => 3,
            Self::Attribute => 4,
            Self::Relation => 5,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::Table),
            2 => Some(Self::Schema),
            3 => Some(Self::Geometry),
            4 => Some(Self::Attribute),
            5 => Some(Self::Relation),
            _ => None,
        }
    }

    /// Stable string key used for alert identity and history records.
    pub fn id(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Schema => "schema",
            Self::Geometry => "geometry",
            Self::Attribute => "attribute",
            Self::Relation => "relation",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Table => "Table check",
            Self::Schema => "Schema check",
            Self::Geometry => "Geometry check",
            Self::Attribute => "Attribute check",
            Self::Relation => "Relation check",
        }
    }

    pub fn definition(self) -> &'static StageDefinition {
        &STAGE_CATALOG[self.index()]
    }

    /// Zero-based index into dense per-stage arrays.
    pub fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for StageKind {
    type Err = ModelError;

    /// Accepts either the stage id (`geometry`) or its number (`3`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(number) = trimmed.parse::<u8>() {
            return Self::from_number(number).ok_or_else(|| ModelError::UnknownStage(s.into()));
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.id().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ModelError::UnknownStage(s.into()))
    }
}

/// Immutable catalog entry for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageDefinition {
    pub number: u8,
    pub id: &'static str,
    pub display_name: &'static str,
    pub kind: StageKind,
}

const fn definition(
    kind: StageKind,
    number: u8,
    id: &'static str,
    display_name: &'static str,
) -> StageDefinition {
    StageDefinition {
        number,
        id,
        display_name,
        kind,
    }
}

/// The fixed stage catalog, contiguous from 1.
pub static STAGE_CATALOG: [StageDefinition; STAGE_COUNT] = [
    definition(StageKind::Table, 1, "table", "Table check"),
    definition(StageKind::Schema, 2, "schema", "Schema check"),
    definition(StageKind::Geometry, 3, "geometry", "Geometry check"),
    definition(StageKind::Attribute, 4, "attribute", "Attribute check"),
    definition(StageKind::Relation, 5, "relation", "Relation check"),
];

/// Stage lifecycle status.
///
/// Advances `NotStarted -> Pending -> Active -> terminal`; terminal states are
/// `Completed`, `CompletedWithWarnings`, `Failed` and `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotStarted,
    Pending,
    Active,
    Completed,
    CompletedWithWarnings,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithWarnings | Self::Failed | Self::Skipped
        )
    }

    fn rank(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Pending => 1,
            Self::Active => 2,
            _ => 3,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// `Active -> Active` is allowed (progress updates); a terminal state never
    /// moves to another state without an explicit reset.
    pub fn can_advance_to(self, next: StageStatus) -> bool {
        if self == Self::Active && next == Self::Active {
            return true;
        }
        next.rank() > self.rank()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Pending => "Pending",
            Self::Active => "Running",
            Self::Completed => "Completed",
            Self::CompletedWithWarnings => "Completed with warnings",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_contiguous_and_matches_kinds() {
        for (idx, def) in STAGE_CATALOG.iter().enumerate() {
            assert_eq!(usize::from(def.number), idx + 1);
            assert_eq!(def.kind.number(), def.number);
            assert_eq!(def.kind.id(), def.id);
            assert_eq!(StageKind::from_number(def.number), Some(def.kind));
        }
    }

    #[test]
    fn parses_ids_and_numbers() {
        assert_eq!("geometry".parse::<StageKind>(), Ok(StageKind::Geometry));
        assert_eq!("5".parse::<StageKind>(), Ok(StageKind::Relation));
        assert!("6".parse::<StageKind>().is_err());
        assert!("topology".parse::<StageKind>().is_err());
    }

    #[test]
    fn status_only_moves_forward() {
        assert!(StageStatus::NotStarted.can_advance_to(StageStatus::Pending));
        assert!(StageStatus::Pending.can_advance_to(StageStatus::Active));
        assert!(StageStatus::Active.can_advance_to(StageStatus::Active));
        assert!(StageStatus::Active.can_advance_to(StageStatus::Failed));
        assert!(!StageStatus::Failed.can_advance_to(StageStatus::Active));
        assert!(!StageStatus::Completed.can_advance_to(StageStatus::Failed));
        assert!(!StageStatus::Active.can_advance_to(StageStatus::Pending));
    }
}
