use serde_json::{Map, Value};
use std::sync::Arc;

use crate::{
    config::{Config, IndexConfig},
    error::Result,
    index::IndexStore,
    metadata::MetadataStore,
    resolver::{ResolvedDocument, VariantResolver},
    store::RemoteStore,
    view::{self, IndexedEntry, PresentOptions},
    webdav::WebDavStore,
};

/// Everything a browsing UI needs from the document store
///
/// Built either from a resolved [`Config`] (the WebDAV client is created
/// here) or around a store the caller already has.
#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn RemoteStore>,
    config: IndexConfig,
    index: IndexStore,
    metadata: MetadataStore,
    resolver: VariantResolver,
}

impl DocumentService {
    pub fn new(store: Arc<dyn RemoteStore>, config: IndexConfig) -> Self {
        Self {
            index: IndexStore::new(store.clone(), config.clone()),
            metadata: MetadataStore::new(store.clone(), &config),
            resolver: VariantResolver::new(store.clone(), config.clone()),
            store,
            config,
        }
    }

    /// Validate the configuration and connect to its WebDAV endpoint
    pub fn connect(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = WebDavStore::new(&config.store)?;
        tracing::info!("using document store {}", store.identifier());
        Ok(Self::new(Arc::new(store), config.index.clone()))
    }

    /// Visible entries of a directory, decorated with parser index data
    pub async fn list_directory(&self, path: &str) -> Result<Vec<IndexedEntry>> {
        self.list_directory_with(path, &PresentOptions::from_config(&self.config, false))
            .await
    }

    pub async fn list_directory_with(
        &self,
        path: &str,
        options: &PresentOptions,
    ) -> Result<Vec<IndexedEntry>> {
        let listing = self.store.list(path).await?;
        let index = self.index.load(path).await?;
        let entries = view::present(listing.entries, path, options);
        Ok(view::decorate(entries, &index))
    }

    pub async fn resolve_document(
        &self,
        path: &str,
        previous_label: Option<&str>,
    ) -> Result<ResolvedDocument> {
        self.resolver.resolve(path, previous_label).await
    }

    pub async fn set_default_variant(&self, path: &str, label: &str) -> Result<()> {
        self.resolver.set_default(path, label).await?;
        Ok(())
    }

    pub async fn load_metadata(&self, path: &str) -> Result<Option<Map<String, Value>>> {
        self.metadata.load(path).await
    }

    pub async fn save_metadata(
        &self,
        path: &str,
        meta: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        self.metadata.save(path, meta).await
    }

    pub async fn create_directory(&self, path: &str) -> Result<()> {
        self.store.mkdir(path).await
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn index_store(&self) -> &IndexStore {
        &self.index
    }

    pub fn resolver(&self) -> &VariantResolver {
        &self.resolver
    }
}
