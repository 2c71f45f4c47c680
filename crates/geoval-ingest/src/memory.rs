//! In-memory dataset, built programmatically or decoded from a dataset file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use geoval_model::{Feature, FieldDef, GeometryType, LayerInfo};

use crate::error::{ProviderError, Result};
use crate::provider::{DataProvider, FeatureIter};

#[derive(Debug, Clone)]
pub(crate) struct MemoryLayer {
    pub(crate) info: LayerInfo,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) features: Vec<Feature>,
}

/// Dataset held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    path: PathBuf,
    file_size_bytes: u64,
    metadata: BTreeMap<String, String>,
    layers: Vec<MemoryLayer>,
}

impl MemoryProvider {
    pub fn builder(path: impl Into<PathBuf>) -> MemoryProviderBuilder {
        MemoryProviderBuilder {
            provider: MemoryProvider {
                path: path.into(),
                file_size_bytes: 0,
                metadata: BTreeMap::new(),
                layers: Vec::new(),
            },
        }
    }

    fn find(&self, layer_id: &str) -> Result<&MemoryLayer> {
        self.layers
            .iter()
            .find(|layer| layer.info.id == layer_id)
            .ok_or_else(|| ProviderError::UnknownLayer {
                layer: layer_id.to_string(),
            })
    }

    pub(crate) fn set_file_size(&mut self, bytes: u64) {
        self.file_size_bytes = bytes;
    }
}

/// Builder for [`MemoryProvider`].
#[derive(Debug, Clone)]
pub struct MemoryProviderBuilder {
    provider: MemoryProvider,
}

impl MemoryProviderBuilder {
    /// Add a layer; the feature count is taken from `features`.
    #[must_use]
    pub fn layer(
        self,
        id: impl Into<String>,
        geometry_type: Option<GeometryType>,
        fields: Vec<FieldDef>,
        features: Vec<Feature>,
    ) -> Self {
        let id = id.into();
        let name = id.clone();
        self.named_layer(id, name, geometry_type, fields, features)
    }

    #[must_use]
    pub fn named_layer(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        geometry_type: Option<GeometryType>,
        fields: Vec<FieldDef>,
        features: Vec<Feature>,
    ) -> Self {
        self.provider.layers.push(MemoryLayer {
            info: LayerInfo {
                id: id.into(),
                name: name.into(),
                geometry_type,
                feature_count: features.len() as u64,
            },
            fields,
            features,
        });
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.provider.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> MemoryProvider {
        self.provider
    }
}

impl DataProvider for MemoryProvider {
    fn target_path(&self) -> &Path {
        &self.path
    }

    fn list_layers(&self) -> Result<Vec<LayerInfo>> {
        Ok(self.layers.iter().map(|layer| layer.info.clone()).collect())
    }

    fn field_schema(&self, layer_id: &str) -> Result<Vec<FieldDef>> {
        Ok(self.find(layer_id)?.fields.clone())
    }

    fn iterate_features<'a>(&'a self, layer_id: &str) -> Result<FeatureIter<'a>> {
        let layer = self.find(layer_id)?;
        Ok(Box::new(layer.features.iter().cloned().map(Ok)))
    }

    fn file_size_bytes(&self) -> u64 {
        self.file_size_bytes
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.clone()
    }
}
