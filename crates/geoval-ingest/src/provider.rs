//! The narrow contract the validation pipeline reads datasets through.

use std::collections::BTreeMap;
use std::path::Path;

use geoval_model::{Feature, FieldDef, LayerInfo, RunContext};

use crate::error::Result;

/// Boxed one-pass feature iterator.
pub type FeatureIter<'a> = Box<dyn Iterator<Item = Result<Feature>> + 'a>;

/// Read access to one dataset.
///
/// Implementations must be cheap to query for metadata. `iterate_features`
/// may be called several times for the same layer; each call starts a fresh,
/// finite pass.
pub trait DataProvider: Send + Sync {
    fn target_path(&self) -> &Path;

    fn list_layers(&self) -> Result<Vec<LayerInfo>>;

    fn field_schema(&self, layer_id: &str) -> Result<Vec<FieldDef>>;

    fn iterate_features<'a>(&'a self, layer_id: &str) -> Result<FeatureIter<'a>>;

    /// Size of the backing file; zero for in-memory datasets.
    fn file_size_bytes(&self) -> u64 {
        0
    }

    /// Free-form dataset metadata (coordinate system, producer, ...).
    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn layer(&self, layer_id: &str) -> Result<Option<LayerInfo>> {
        Ok(self
            .list_layers()?
            .into_iter()
            .find(|layer| layer.id == layer_id))
    }

    /// Run context derived from the dataset metadata.
    fn describe(&self) -> Result<RunContext> {
        let layers = self.list_layers()?;
        let mut field_count = 0u64;
        for layer in &layers {
            field_count += self.field_schema(&layer.id)?.len() as u64;
        }
        Ok(RunContext {
            target_path: self.target_path().to_path_buf(),
            file_size_bytes: self.file_size_bytes(),
            feature_count: layers.iter().map(|layer| layer.feature_count).sum(),
            layer_count: u32::try_from(layers.len()).unwrap_or(u32::MAX),
            field_count,
            metadata: self.metadata(),
        })
    }
}
