use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{
    error::{Result, StoreError},
    paths,
    store::RemoteStore,
    types::{DirectoryEntry, DirectoryListing, FileContent},
};

#[derive(Default)]
struct Tree {
    files: BTreeMap<String, Bytes>,
    dirs: BTreeSet<String>,
}

impl Tree {
    fn dir_exists(&self, dir: &str) -> bool {
        dir == "/"
            || self.dirs.contains(dir)
            || self.files.keys().any(|f| f.starts_with(dir))
            || self.dirs.iter().any(|d| d.starts_with(dir))
    }
}

/// In-process store
///
/// Listings report the collection itself first, the way a depth-1 PROPFIND
/// does. ETags are content hashes, so conditional writes behave like a real
/// WebDAV server's.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tree: Arc<RwLock<Tree>>,
}

fn file_key(path: &str) -> String {
    paths::normalize(&paths::decode(path), false)
}

fn etag_of(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("\"{:x}\"", hasher.finalize())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file, creating parent collections implicitly
    pub async fn insert(&self, path: &str, content: impl Into<Bytes>) {
        let mut tree = self.tree.write().await;
        tree.files.insert(file_key(path), content.into());
    }

    pub async fn remove(&self, path: &str) -> bool {
        let mut tree = self.tree.write().await;
        tree.files.remove(&file_key(path)).is_some()
    }

    /// Current content of a file, bypassing the store interface
    pub async fn contents(&self, path: &str) -> Option<Bytes> {
        let tree = self.tree.read().await;
        tree.files.get(&file_key(path)).cloned()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, path: &str) -> Result<DirectoryListing> {
        let dir = paths::dir_key(path);
        let tree = self.tree.read().await;

        if !tree.dir_exists(&dir) {
            return Err(StoreError::not_found(path));
        }

        let mut entries = vec![DirectoryEntry::directory(paths::file_name(&dir), dir.clone())];
        let mut child_dirs = BTreeSet::new();

        let candidates = tree
            .files
            .keys()
            .map(|k| (k.as_str(), false))
            .chain(tree.dirs.iter().map(|d| (d.as_str(), true)));

        for (key, is_dir) in candidates {
            let Some(rest) = key.strip_prefix(dir.as_str()) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((child, _)) => {
                    child_dirs.insert(child.to_string());
                }
                None if !is_dir => {
                    let size = tree.files.get(key).map(|c| c.len() as u64);
                    entries.push(DirectoryEntry::file(rest, key, size));
                }
                None => {}
            }
        }

        for child in child_dirs {
            let child_path = format!("{}{}/", dir, child);
            entries.push(DirectoryEntry::directory(child, child_path));
        }

        Ok(DirectoryListing {
            path: path.to_string(),
            entries,
        })
    }

    async fn fetch_file(&self, path: &str) -> Result<FileContent> {
        let tree = self.tree.read().await;
        let content = tree
            .files
            .get(&file_key(path))
            .cloned()
            .ok_or_else(|| StoreError::not_found(path))?;

        Ok(FileContent {
            etag: Some(etag_of(&content)),
            content,
            source_path: format!("memory:{}", file_key(path)),
        })
    }

    async fn put_file(
        &self,
        path: &str,
        content: Bytes,
        if_match: Option<&str>,
    ) -> Result<Option<String>> {
        let key = file_key(path);
        let mut tree = self.tree.write().await;

        if let Some(expected) = if_match {
            let current = tree.files.get(&key).map(|c| etag_of(c));
            if current.as_deref() != Some(expected) {
                return Err(StoreError::PreconditionFailed {
                    path: path.to_string(),
                });
            }
        }

        let etag = etag_of(&content);
        tree.files.insert(key, content);
        Ok(Some(etag))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let mut tree = self.tree.write().await;
        tree.dirs.insert(paths::dir_key(path));
        Ok(())
    }

    fn identifier(&self) -> String {
        "memory://".to_string()
    }
}
