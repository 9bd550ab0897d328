use serde_json::{Map, Value};
use std::sync::Arc;

use crate::{
    config::IndexConfig,
    error::{Result, StoreError},
    paths,
    store::RemoteStore,
};

pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Newest `schemaVersion` a sidecar may declare. Untagged sidecars are accepted.
pub const METADATA_SCHEMA_VERSION: u64 = 1;

/// Free-form JSON sidecars next to projects, bidders and documents
///
/// Saves overwrite the whole sidecar; callers wanting a partial update load,
/// modify and save.
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn RemoteStore>,
    directory_meta_file: String,
}

impl MetadataStore {
    pub fn new(store: Arc<dyn RemoteStore>, config: &IndexConfig) -> Self {
        Self {
            store,
            directory_meta_file: config.directory_meta_file.clone(),
        }
    }

    /// `<path>.meta.json` for files, a fixed name inside directories
    pub fn sidecar_path(&self, path: &str) -> String {
        if path.ends_with('/') {
            paths::join(&paths::normalize(path, true), &self.directory_meta_file)
        } else if path.ends_with(SIDECAR_SUFFIX) {
            path.to_string()
        } else {
            format!("{}{}", path, SIDECAR_SUFFIX)
        }
    }

    pub async fn load(&self, path: &str) -> Result<Option<Map<String, Value>>> {
        let sidecar = self.sidecar_path(path);
        let Some(value) = self.store.read_json(&sidecar).await? else {
            return Ok(None);
        };

        let Value::Object(map) = value else {
            return Err(StoreError::protocol(format!(
                "metadata sidecar {} is not a JSON object",
                sidecar
            )));
        };

        if let Some(found) = map.get("schemaVersion").and_then(Value::as_u64) {
            if found > METADATA_SCHEMA_VERSION {
                return Err(StoreError::UnsupportedSchema {
                    path: sidecar,
                    found,
                    supported: METADATA_SCHEMA_VERSION,
                });
            }
        }
        Ok(Some(map))
    }

    /// Overwrite the sidecar with `meta` and echo it back
    pub async fn save(&self, path: &str, meta: Map<String, Value>) -> Result<Map<String, Value>> {
        let sidecar = self.sidecar_path(path);
        self.store
            .write_json(&sidecar, &Value::Object(meta.clone()))
            .await?;
        tracing::debug!("saved metadata sidecar {}", sidecar);
        Ok(meta)
    }
}
