//! Dataset access for the validation pipeline.
//!
//! The pipeline reads datasets only through [`DataProvider`]. Two providers
//! ship with the crate: [`MemoryProvider`] for programmatic datasets and
//! [`JsonDatasetProvider`] for JSON dataset files.

mod error;
mod json;
mod memory;
mod provider;

pub use error::{ProviderError, Result};
pub use json::JsonDatasetProvider;
pub use memory::{MemoryProvider, MemoryProviderBuilder};
pub use provider::{DataProvider, FeatureIter};
