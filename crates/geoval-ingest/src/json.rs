//! JSON dataset files.
//!
//! ```json
//! {
//!   "metadata": {"crs": "EPSG:5186"},
//!   "layers": [
//!     {
//!       "id": "building",
//!       "name": "Buildings",
//!       "geometry_type": "polygon",
//!       "fields": [{"name": "BLD_ID", "field_type": "text", "length": 10}],
//!       "features": [
//!         {"id": "1", "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]},
//!          "attributes": {"BLD_ID": "B1"}}
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use geoval_model::{Feature, FieldDef, GeometryType, LayerInfo};

use crate::error::{ProviderError, Result};
use crate::memory::MemoryProvider;
use crate::provider::{DataProvider, FeatureIter};

#[derive(Debug, Deserialize)]
struct DatasetFile {
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    layers: Vec<LayerRecord>,
}

#[derive(Debug, Deserialize)]
struct LayerRecord {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    geometry_type: Option<GeometryType>,
    #[serde(default)]
    fields: Vec<FieldDef>,
    #[serde(default)]
    features: Vec<Feature>,
}

/// Dataset decoded from a JSON file at open time.
#[derive(Debug, Clone)]
pub struct JsonDatasetProvider {
    inner: MemoryProvider,
}

impl JsonDatasetProvider {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ProviderError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path).map_err(|source| ProviderError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| ProviderError::FileRead {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let dataset: DatasetFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                ProviderError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        let inner = build(path.to_path_buf(), size, dataset)?;
        info!(path = %path.display(), bytes = size, "opened dataset");
        Ok(Self { inner })
    }
}

fn build(path: PathBuf, size: u64, dataset: DatasetFile) -> Result<MemoryProvider> {
    let mut seen = HashSet::new();
    let mut builder = MemoryProvider::builder(path.clone());
    for (key, value) in dataset.metadata {
        builder = builder.metadata(key, value);
    }
    for layer in dataset.layers {
        if !seen.insert(layer.id.clone()) {
            return Err(ProviderError::DuplicateLayer {
                layer: layer.id,
                path,
            });
        }
        debug!(layer = %layer.id, features = layer.features.len(), "decoded layer");
        let name = layer.name.unwrap_or_else(|| layer.id.clone());
        builder = builder.named_layer(
            layer.id,
            name,
            layer.geometry_type,
            layer.fields,
            layer.features,
        );
    }
    let mut provider = builder.build();
    provider.set_file_size(size);
    Ok(provider)
}

impl DataProvider for JsonDatasetProvider {
    fn target_path(&self) -> &Path {
        self.inner.target_path()
    }

    fn list_layers(&self) -> Result<Vec<LayerInfo>> {
        self.inner.list_layers()
    }

    fn field_schema(&self, layer_id: &str) -> Result<Vec<FieldDef>> {
        self.inner.field_schema(layer_id)
    }

    fn iterate_features<'a>(&'a self, layer_id: &str) -> Result<FeatureIter<'a>> {
        self.inner.iterate_features(layer_id)
    }

    fn file_size_bytes(&self) -> u64 {
        self.inner.file_size_bytes()
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.inner.metadata()
    }
}
