use thiserror::Error;

/// Errors that can occur while talking to the document store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Resource not found: {path}")]
    NotFound { path: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Remote store unavailable ({status}): {message}")]
    RemoteUnavailable { status: u16, message: String },

    #[error("Unexpected remote response: {message}")]
    Protocol { message: String },

    #[error("Remote copy of {path} changed since it was read")]
    PreconditionFailed { path: String },

    #[error("No renderable variant for {document}; tried: {}", .attempted.join(", "))]
    NoRenderableVariant {
        document: String,
        attempted: Vec<String>,
    },

    #[error("Failed to update parser index {path}: {source}")]
    IndexUpdateFailed {
        path: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Unsupported schema version {found} in {path} (newest supported: {supported})")]
    UnsupportedSchema {
        path: String,
        found: u64,
        supported: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for transport and auth failures, i.e. the remote could not be asked at all
    pub fn is_remote_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_) | StoreError::RemoteUnavailable { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub(crate) fn not_found(path: &str) -> Self {
        StoreError::NotFound {
            path: path.to_string(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        StoreError::Protocol {
            message: message.into(),
        }
    }
}

impl From<quick_xml::Error> for StoreError {
    fn from(err: quick_xml::Error) -> Self {
        StoreError::protocol(format!("malformed multistatus body: {}", err))
    }
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
