use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StoreError};

pub const ENV_URL: &str = "DOCIDX_WEBDAV_URL";
pub const ENV_USER: &str = "DOCIDX_WEBDAV_USER";
pub const ENV_PASSWORD: &str = "DOCIDX_WEBDAV_PASSWORD";

/// Complete runtime configuration, resolved once and handed to the service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub index: IndexConfig,
}

/// Connection settings for the WebDAV endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Collection URL every store path is resolved against
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            username: None,
            password: None,
            timeout_secs: 30,
            user_agent: concat!("doc-variant-resolver/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// On-disk conventions of the parser pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Name of the per-directory parser index
    pub index_file_name: String,
    /// Other names the pipeline has used for index files; never listed
    pub reserved_index_names: Vec<String>,
    /// Directory, next to the sources, holding rendered output
    pub rendered_dir: String,
    pub marker_suffix: String,
    /// Parser assumed when the index has no entry for a document
    pub fallback_parser: String,
    pub hidden_prefix: String,
    pub exclude_names: Vec<String>,
    /// Sidecar name used for directory-level metadata
    pub directory_meta_file: String,
    pub update_strategy: UpdateStrategy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_file_name: ".pdf2md_index.json".to_string(),
            reserved_index_names: Vec::new(),
            rendered_dir: "rendered".to_string(),
            marker_suffix: ".marker.md".to_string(),
            fallback_parser: "md".to_string(),
            hidden_prefix: ".".to_string(),
            exclude_names: Vec::new(),
            directory_meta_file: "projekt.meta.json".to_string(),
            update_strategy: UpdateStrategy::default(),
        }
    }
}

impl IndexConfig {
    /// Names hidden from directory listings regardless of the hidden prefix
    pub fn listing_excludes(&self) -> Vec<String> {
        let mut names = self.exclude_names.clone();
        names.push(self.index_file_name.clone());
        names.extend(self.reserved_index_names.iter().cloned());
        names
    }
}

/// How the parser index is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Plain read-modify-write. Concurrent patches of one directory can lose
    /// updates.
    #[default]
    LastWriteWins,
    /// Write with `If-Match` on the ETag that was read, retrying the whole
    /// read-modify-write when another writer got there first
    Optimistic { max_attempts: u32 },
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StoreError::InvalidConfig {
            message: e.to_string(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Override connection settings from `DOCIDX_WEBDAV_*` variables
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_URL) {
            self.store.base_url = url;
        }
        if let Ok(user) = std::env::var(ENV_USER) {
            self.store.username = Some(user);
        }
        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            self.store.password = Some(password);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(StoreError::InvalidConfig {
                message: message.to_string(),
            })
        };

        let url = reqwest::Url::parse(&self.store.base_url).map_err(|e| {
            StoreError::InvalidConfig {
                message: format!("base_url {:?}: {}", self.store.base_url, e),
            }
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return invalid("base_url must be http or https");
        }
        if self.store.password.is_some() && self.store.username.is_none() {
            return invalid("password given without username");
        }

        let index = &self.index;
        if index.index_file_name.is_empty() || index.index_file_name.contains('/') {
            return invalid("index_file_name must be a plain file name");
        }
        if index.rendered_dir.trim_matches('/').is_empty() {
            return invalid("rendered_dir must not be empty");
        }
        if index.fallback_parser.is_empty() {
            return invalid("fallback_parser must not be empty");
        }
        if !index.marker_suffix.ends_with(".md") {
            return invalid("marker_suffix must end in .md");
        }
        if let UpdateStrategy::Optimistic { max_attempts: 0 } = index.update_strategy {
            return invalid("optimistic update needs at least one attempt");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.index.index_file_name, ".pdf2md_index.json");
        assert_eq!(config.index.update_strategy, UpdateStrategy::LastWriteWins);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [store]
            base_url = "https://dav.example.org/remote.php/dav/files/audit/"
            username = "audit"

            [index]
            fallback_parser = "docling"
            update_strategy = { mode = "optimistic", max_attempts = 3 }
            "#,
        )
        .unwrap();

        assert_eq!(config.store.username.as_deref(), Some("audit"));
        assert_eq!(config.store.timeout_secs, 30);
        assert_eq!(config.index.fallback_parser, "docling");
        assert_eq!(config.index.rendered_dir, "rendered");
        assert_eq!(
            config.index.update_strategy,
            UpdateStrategy::Optimistic { max_attempts: 3 }
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[index]\nexclude_names = [\"rendered\"]").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        let excludes = config.index.listing_excludes();
        assert!(excludes.contains(&"rendered".to_string()));
        assert!(excludes.contains(&".pdf2md_index.json".to_string()));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.store.base_url = "ftp://files".to_string();
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig { .. })
        ));

        let mut config = Config::default();
        config.index.update_strategy = UpdateStrategy::Optimistic { max_attempts: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            Config::from_toml_str("[store\nbase_url ="),
            Err(StoreError::InvalidConfig { .. })
        ));
    }
}
