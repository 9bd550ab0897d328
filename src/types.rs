use serde::{Deserialize, Serialize};

/// Represents a file's content and metadata
#[derive(Debug, Clone)]
pub struct FileContent {
    /// The raw bytes of the file
    pub content: bytes::Bytes,
    /// The path where this file was found
    pub source_path: String,
    /// ETag reported by the store, used for conditional writes
    pub etag: Option<String>,
}

/// One node of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Last path segment, URL-decoded
    pub name: String,
    /// Store-relative path, in the encoding the remote returned it
    pub path: String,
    /// Type of entry
    pub kind: EntryKind,
    /// Byte count, files only
    pub size: Option<u64>,
    /// Remote-supplied, format depends on the backend
    pub last_modified: Option<String>,
    pub created_at: Option<String>,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>, path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: EntryKind::File,
            size,
            last_modified: None,
            created_at: None,
        }
    }

    /// Directories never carry a size
    pub fn directory(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: EntryKind::Directory,
            size: None,
            last_modified: None,
            created_at: None,
        }
    }

    pub fn with_timestamps(
        mut self,
        last_modified: Option<String>,
        created_at: Option<String>,
    ) -> Self {
        self.last_modified = last_modified;
        self.created_at = created_at;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Type of directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Result of listing a directory
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    /// The path that was listed
    pub path: String,
    /// Entries found in the directory, the directory itself included when the
    /// backend reports it
    pub entries: Vec<DirectoryEntry>,
}
