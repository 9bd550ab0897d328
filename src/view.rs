//! Directory listings as the browsing UI sees them.

use serde::Serialize;

use crate::{
    config::IndexConfig,
    index::{FileIndexEntry, ParserIndexFile},
    paths,
    types::{DirectoryEntry, EntryKind},
};

#[derive(Debug, Clone)]
pub struct PresentOptions {
    pub show_hidden: bool,
    /// Exact, case-sensitive names to drop
    pub exclude_names: Vec<String>,
    /// Names starting with this are hidden. Empty disables hiding.
    pub hidden_prefix: String,
}

impl Default for PresentOptions {
    fn default() -> Self {
        Self {
            show_hidden: false,
            exclude_names: Vec::new(),
            hidden_prefix: ".".to_string(),
        }
    }
}

impl PresentOptions {
    pub fn from_config(config: &IndexConfig, show_hidden: bool) -> Self {
        Self {
            show_hidden,
            exclude_names: config.listing_excludes(),
            hidden_prefix: config.hidden_prefix.clone(),
        }
    }

    fn is_hidden(&self, name: &str) -> bool {
        !self.hidden_prefix.is_empty() && name.starts_with(&self.hidden_prefix)
    }
}

/// Filter and normalize one raw listing
///
/// Hidden and excluded names are dropped, paths are put in canonical form
/// (directories end in '/') and the entry for `self_path` itself is removed,
/// whether it is the listed collection or a file listed on its own.
/// Input order is kept.
pub fn present(
    entries: Vec<DirectoryEntry>,
    self_path: &str,
    options: &PresentOptions,
) -> Vec<DirectoryEntry> {
    let self_key = paths::entry_key(self_path);

    entries
        .into_iter()
        .filter(|e| options.show_hidden || !options.is_hidden(&e.name))
        .filter(|e| !options.exclude_names.iter().any(|n| *n == e.name))
        .map(|mut e| {
            e.path = paths::normalize(&e.path, e.kind == EntryKind::Directory);
            e
        })
        .filter(|e| paths::entry_key(&e.path) != self_key)
        .collect()
}

/// A listed entry together with what the parser index knows about it
#[derive(Debug, Clone, Serialize)]
pub struct IndexedEntry {
    #[serde(flatten)]
    pub entry: DirectoryEntry,
    pub index: Option<FileIndexEntry>,
}

impl IndexedEntry {
    pub fn parsers(&self) -> &[String] {
        self.index
            .as_ref()
            .map(|i| i.parsers.det.as_slice())
            .unwrap_or_default()
    }

    pub fn default_parser(&self) -> Option<&str> {
        self.index.as_ref()?.parsers.default_parser()
    }

    pub fn status(&self) -> Option<&str> {
        self.index.as_ref()?.parsers.status()
    }

    pub fn is_parsed(&self) -> bool {
        !self.parsers().is_empty()
    }
}

/// Attach index entries to files; directories are never indexed
pub fn decorate(entries: Vec<DirectoryEntry>, index: &ParserIndexFile) -> Vec<IndexedEntry> {
    entries
        .into_iter()
        .map(|entry| {
            let index = match entry.kind {
                EntryKind::File => index.lookup(&entry.name).cloned(),
                EntryKind::Directory => None,
            };
            IndexedEntry { entry, index }
        })
        .collect()
}
