//! CLI library components for the geospatial dataset validator.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod progress;
pub mod report;
pub mod summary;
