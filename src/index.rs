//! Per-directory parser index (`.pdf2md_index.json`).
//!
//! The index lists, for every source document in a directory, the parsers
//! known to have produced output, the chosen default and a free-form status.
//! An external pipeline creates it; this module only reads it and rewrites
//! it whole.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::{
    config::{IndexConfig, UpdateStrategy},
    error::{Result, StoreError},
    paths,
    store::RemoteStore,
};

/// Newest index layout this build reads and writes. Documents without a
/// `schemaVersion` tag are version 0 and are upgraded in memory.
pub const INDEX_SCHEMA_VERSION: u64 = 1;

/// Timestamps below this are epoch seconds rather than milliseconds
const SECONDS_CUTOFF: i64 = 100_000_000_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserIndexFile {
    #[serde(rename = "schemaVersion", default)]
    pub schema_version: u64,
    #[serde(default, deserialize_with = "epoch")]
    pub timestamp: i64,
    #[serde(default)]
    pub files: Vec<FileIndexEntry>,
    /// Fields written by the pipeline that this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileIndexEntry {
    pub name: String,
    #[serde(default)]
    pub parsers: Parsers,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parsers {
    /// Parsers with known output for this file
    #[serde(default)]
    pub det: Vec<String>,
    /// Selected parser. Not required to be listed in `det`.
    ///
    /// The outer `Option` records whether the key was present at all, so an
    /// explicit `null` survives a rewrite.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub default: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub status: Option<Option<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Changes applied by [`IndexStore::patch`]
#[derive(Debug, Clone, Default)]
pub struct IndexPatch {
    /// Shallow-merged into the entry's `meta`
    pub meta: Option<Map<String, Value>>,
    /// Overwrites `parsers.default`
    pub default_parser: Option<String>,
}

impl IndexPatch {
    pub fn default_parser(parser: impl Into<String>) -> Self {
        Self {
            meta: None,
            default_parser: Some(parser.into()),
        }
    }

    pub fn meta(meta: Map<String, Value>) -> Self {
        Self {
            meta: Some(meta),
            default_parser: None,
        }
    }
}

fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn epoch<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        _ => 0,
    })
}

impl Parsers {
    pub fn default_parser(&self) -> Option<&str> {
        self.default.as_ref()?.as_deref()
    }

    pub fn set_default(&mut self, parser: impl Into<String>) {
        self.default = Some(Some(parser.into()));
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_ref()?.as_deref()
    }

    pub fn declares(&self, parser: &str) -> bool {
        self.det.iter().any(|p| p.eq_ignore_ascii_case(parser))
    }
}

impl ParserIndexFile {
    /// Index of a directory the pipeline has never processed
    pub fn empty() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            ..Self::default()
        }
    }

    /// Exact-name lookup
    pub fn lookup(&self, name: &str) -> Option<&FileIndexEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Decode a stored document, validating and upgrading its schema version
    pub fn from_value(path: &str, value: Value) -> Result<Self> {
        let mut index: ParserIndexFile = serde_json::from_value(value)?;
        if index.schema_version > INDEX_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                path: path.to_string(),
                found: index.schema_version,
                supported: INDEX_SCHEMA_VERSION,
            });
        }
        if index.schema_version < INDEX_SCHEMA_VERSION {
            tracing::debug!(
                "upgrading parser index {} from schema {} to {}",
                path,
                index.schema_version,
                INDEX_SCHEMA_VERSION
            );
            index.schema_version = INDEX_SCHEMA_VERSION;
        }
        for file in &mut index.files {
            let mut seen = Vec::with_capacity(file.parsers.det.len());
            file.parsers.det.retain(|p| {
                if seen.contains(p) {
                    false
                } else {
                    seen.push(p.clone());
                    true
                }
            });
        }
        Ok(index)
    }

    /// Apply a patch to the named entry. Returns false when there is no such
    /// entry; entries are never created here.
    fn apply(&mut self, name: &str, patch: &IndexPatch) -> bool {
        let Some(entry) = self.files.iter_mut().find(|f| f.name == name) else {
            return false;
        };
        if let Some(meta) = &patch.meta {
            for (key, value) in meta {
                entry.meta.insert(key.clone(), value.clone());
            }
        }
        if let Some(parser) = &patch.default_parser {
            entry.parsers.set_default(parser.clone());
        }
        true
    }

    /// Bump the document timestamp, keeping the unit the pipeline used
    fn touch(&mut self) {
        let now = chrono::Utc::now();
        self.timestamp = if self.timestamp > 0 && self.timestamp < SECONDS_CUTOFF {
            now.timestamp()
        } else {
            now.timestamp_millis()
        };
    }
}

/// Reads and rewrites parser indexes on the remote store
#[derive(Clone)]
pub struct IndexStore {
    store: Arc<dyn RemoteStore>,
    config: IndexConfig,
}

impl IndexStore {
    pub fn new(store: Arc<dyn RemoteStore>, config: IndexConfig) -> Self {
        Self { store, config }
    }

    pub fn index_path(&self, dir: &str) -> String {
        paths::join(&paths::normalize(dir, true), &self.config.index_file_name)
    }

    /// Load a directory's index; a directory without one yields an empty index
    pub async fn load(&self, dir: &str) -> Result<ParserIndexFile> {
        let path = self.index_path(dir);
        match self.store.read_json(&path).await? {
            Some(value) => ParserIndexFile::from_value(&path, value),
            None => {
                tracing::debug!("no parser index at {}", path);
                Ok(ParserIndexFile::empty())
            }
        }
    }

    /// Read-modify-write of one file entry
    ///
    /// A missing index or entry makes this a no-op and nothing is written.
    /// Under [`UpdateStrategy::LastWriteWins`] two concurrent patches of the
    /// same directory can both read the same base state, and the later write
    /// drops the earlier one's changes.
    pub async fn patch(&self, dir: &str, name: &str, patch: IndexPatch) -> Result<ParserIndexFile> {
        let path = self.index_path(dir);
        self.patch_document(&path, name, &patch)
            .await
            .map_err(|e| StoreError::IndexUpdateFailed {
                path: path.clone(),
                source: Box::new(e),
            })
    }

    async fn patch_document(
        &self,
        path: &str,
        name: &str,
        patch: &IndexPatch,
    ) -> Result<ParserIndexFile> {
        let (optimistic, max_attempts) = match self.config.update_strategy {
            UpdateStrategy::LastWriteWins => (false, 1),
            UpdateStrategy::Optimistic { max_attempts } => (true, max_attempts.max(1)),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let file = match self.store.fetch_file(path).await {
                Ok(file) => file,
                Err(StoreError::NotFound { .. }) => {
                    tracing::debug!("no parser index at {}; patch of {} skipped", path, name);
                    return Ok(ParserIndexFile::empty());
                }
                Err(e) => return Err(e),
            };
            let mut index =
                ParserIndexFile::from_value(path, serde_json::from_slice(&file.content)?)?;

            if !index.apply(name, patch) {
                tracing::debug!("{} has no entry for {}; patch skipped", path, name);
                return Ok(index);
            }
            index.touch();

            let if_match = if optimistic {
                if file.etag.is_none() {
                    tracing::warn!("store returned no ETag for {}; writing unconditionally", path);
                }
                file.etag.as_deref()
            } else {
                None
            };

            let body = Bytes::from(serde_json::to_vec_pretty(&index)?);
            match self.store.put_file(path, body, if_match).await {
                Ok(_) => {
                    tracing::info!("updated parser index {} for {}", path, name);
                    return Ok(index);
                }
                Err(StoreError::PreconditionFailed { .. }) if attempt < max_attempts => {
                    tracing::warn!(
                        "parser index {} changed concurrently, retrying ({}/{})",
                        path,
                        attempt,
                        max_attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::{DirectoryListing, FileContent};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> Value {
        json!({
            "version": "pdf2md 0.9",
            "timestamp": 1717400000.5,
            "files": [
                {
                    "name": "Spec.pdf",
                    "parsers": { "det": ["docling", "docling", "marker"], "default": "docling", "status": "done", "pages": 12 },
                    "meta": { "category": "technical" },
                    "sha": "abc"
                }
            ]
        })
    }

    #[test]
    fn test_legacy_document_is_upgraded() {
        let index = ParserIndexFile::from_value("/A/.pdf2md_index.json", sample()).unwrap();
        assert_eq!(index.schema_version, INDEX_SCHEMA_VERSION);
        assert_eq!(index.timestamp, 1717400000);

        let entry = index.lookup("Spec.pdf").unwrap();
        assert_eq!(entry.parsers.det, vec!["docling", "marker"]);
        assert_eq!(entry.parsers.extra.get("pages"), Some(&json!(12)));
        assert_eq!(entry.extra.get("sha"), Some(&json!("abc")));
        assert_eq!(index.extra.get("version"), Some(&json!("pdf2md 0.9")));
        assert!(index.lookup("spec.pdf").is_none());
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let result = ParserIndexFile::from_value(
            "/A/.pdf2md_index.json",
            json!({ "schemaVersion": 7, "files": [] }),
        );
        assert!(matches!(
            result,
            Err(StoreError::UnsupportedSchema { found: 7, .. })
        ));
    }

    #[test]
    fn test_touch_keeps_unit() {
        let mut seconds = ParserIndexFile {
            timestamp: 1_717_400_000,
            ..ParserIndexFile::default()
        };
        seconds.touch();
        assert!(seconds.timestamp < SECONDS_CUTOFF);

        let mut millis = ParserIndexFile::default();
        millis.touch();
        assert!(millis.timestamp > SECONDS_CUTOFF);
    }

    #[tokio::test]
    async fn test_load_missing_index_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let index = IndexStore::new(store, IndexConfig::default());

        let loaded = index.load("/A/").await.unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.schema_version, INDEX_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_patch_merges_meta_and_preserves_unknown_fields() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("/A/.pdf2md_index.json", serde_json::to_vec(&sample()).unwrap())
            .await;
        let index = IndexStore::new(store.clone(), IndexConfig::default());

        let mut meta = Map::new();
        meta.insert("display".to_string(), json!("Specification"));
        index
            .patch("/A", "Spec.pdf", IndexPatch::meta(meta))
            .await
            .unwrap();

        let reloaded = index.load("/A/").await.unwrap();
        let entry = reloaded.lookup("Spec.pdf").unwrap();
        assert_eq!(entry.meta.get("category"), Some(&json!("technical")));
        assert_eq!(entry.meta.get("display"), Some(&json!("Specification")));
        assert_eq!(entry.parsers.default_parser(), Some("docling"));
        assert_eq!(entry.parsers.extra.get("pages"), Some(&json!(12)));
        assert_eq!(reloaded.extra.get("version"), Some(&json!("pdf2md 0.9")));
    }

    #[tokio::test]
    async fn test_patch_unknown_entry_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let raw = serde_json::to_vec(&sample()).unwrap();
        store.insert("/A/.pdf2md_index.json", raw.clone()).await;
        let index = IndexStore::new(store.clone(), IndexConfig::default());

        index
            .patch("/A/", "Other.pdf", IndexPatch::default_parser("ocr"))
            .await
            .unwrap();

        assert_eq!(
            store.contents("/A/.pdf2md_index.json").await.unwrap(),
            Bytes::from(raw)
        );
    }

    #[tokio::test]
    async fn test_default_is_not_validated_against_det() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("/A/.pdf2md_index.json", serde_json::to_vec(&sample()).unwrap())
            .await;
        let index = IndexStore::new(store, IndexConfig::default());

        let updated = index
            .patch("/A/", "Spec.pdf", IndexPatch::default_parser("ocr"))
            .await
            .unwrap();
        let entry = updated.lookup("Spec.pdf").unwrap();
        assert_eq!(entry.parsers.default_parser(), Some("ocr"));
        assert!(!entry.parsers.declares("ocr"));
    }

    #[tokio::test]
    async fn test_patch_keeps_explicit_nulls() {
        let store = Arc::new(MemoryStore::new());
        let doc = json!({
            "timestamp": 1717400000000i64,
            "files": [
                { "name": "Spec.pdf", "parsers": { "det": ["docling"], "default": null, "status": null }, "meta": {} },
                { "name": "Price.xlsx", "parsers": { "det": [] }, "meta": {} }
            ]
        });
        store
            .insert("/A/.pdf2md_index.json", serde_json::to_vec(&doc).unwrap())
            .await;
        let index = IndexStore::new(store.clone(), IndexConfig::default());

        let mut meta = Map::new();
        meta.insert("display".to_string(), json!("Specification"));
        index
            .patch("/A/", "Spec.pdf", IndexPatch::meta(meta))
            .await
            .unwrap();

        let raw = store.contents("/A/.pdf2md_index.json").await.unwrap();
        let written: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(
            written["files"][0]["parsers"],
            json!({ "det": ["docling"], "default": null, "status": null })
        );
        assert_eq!(written["files"][1]["parsers"], json!({ "det": [] }));
    }

    #[tokio::test]
    async fn test_non_numeric_timestamp_is_rewritten_in_millis() {
        let store = Arc::new(MemoryStore::new());
        let mut doc = sample();
        doc["timestamp"] = json!("2024-06-03");
        store
            .insert("/A/.pdf2md_index.json", serde_json::to_vec(&doc).unwrap())
            .await;
        let index = IndexStore::new(store, IndexConfig::default());

        assert_eq!(index.load("/A/").await.unwrap().timestamp, 0);
        let updated = index
            .patch("/A/", "Spec.pdf", IndexPatch::default_parser("marker"))
            .await
            .unwrap();
        assert!(updated.timestamp > SECONDS_CUTOFF);
    }

    /// Store where every conditional write loses the race
    struct ContendedStore {
        inner: MemoryStore,
        conditional_puts: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for ContendedStore {
        async fn list(&self, path: &str) -> Result<DirectoryListing> {
            self.inner.list(path).await
        }

        async fn fetch_file(&self, path: &str) -> Result<FileContent> {
            self.inner.fetch_file(path).await
        }

        async fn put_file(
            &self,
            path: &str,
            content: Bytes,
            if_match: Option<&str>,
        ) -> Result<Option<String>> {
            if if_match.is_some() {
                self.conditional_puts.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::PreconditionFailed {
                    path: path.to_string(),
                });
            }
            self.inner.put_file(path, content, None).await
        }

        async fn mkdir(&self, path: &str) -> Result<()> {
            self.inner.mkdir(path).await
        }

        fn identifier(&self) -> String {
            "contended".to_string()
        }
    }

    #[tokio::test]
    async fn test_optimistic_patch_gives_up_after_max_attempts() {
        let inner = MemoryStore::new();
        inner
            .insert("/A/.pdf2md_index.json", serde_json::to_vec(&sample()).unwrap())
            .await;
        let store = Arc::new(ContendedStore {
            inner,
            conditional_puts: AtomicUsize::new(0),
        });
        let config = IndexConfig {
            update_strategy: UpdateStrategy::Optimistic { max_attempts: 3 },
            ..IndexConfig::default()
        };
        let index = IndexStore::new(store.clone(), config);

        let err = index
            .patch("/A/", "Spec.pdf", IndexPatch::default_parser("marker"))
            .await
            .unwrap_err();

        match err {
            StoreError::IndexUpdateFailed { source, .. } => {
                assert!(matches!(*source, StoreError::PreconditionFailed { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.conditional_puts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_patch_wraps_malformed_index() {
        let store = Arc::new(MemoryStore::new());
        store.insert("/A/.pdf2md_index.json", "{ not json").await;
        let index = IndexStore::new(store, IndexConfig::default());

        let result = index
            .patch("/A/", "Spec.pdf", IndexPatch::default_parser("ocr"))
            .await;
        assert!(matches!(result, Err(StoreError::IndexUpdateFailed { .. })));
    }
}
