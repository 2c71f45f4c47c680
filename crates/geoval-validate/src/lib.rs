#![deny(unsafe_code)]

//! Rule engines for the five validation stages.
//!
//! Each stage is a stateless [`StageRunner`] that reads the dataset through a
//! [`geoval_ingest::DataProvider`], applies its rule family with thresholds
//! from the run's [`geoval_rules::Criteria`], and reports findings and progress
//! through a [`StageContext`].

pub mod attribute;
pub mod engine;
pub mod error;
pub mod geom;
pub mod geometry;
pub mod relation;
pub mod schema;
pub mod table;

pub use engine::{Scope, StageContext, StageInput, StageRunner, default_runners};
pub use error::{Result, StageError};
pub use geometry::{SliverShape, Thresholds, check_feature};
