pub mod config;
pub mod error;
pub mod index;
pub mod memory;
pub mod metadata;
pub mod paths;
pub mod resolver;
pub mod service;
pub mod store;
pub mod types;
pub mod variants;
pub mod view;
pub mod webdav;

pub use config::{Config, IndexConfig, StoreConfig, UpdateStrategy};
pub use error::{Result, StoreError};
pub use index::{FileIndexEntry, IndexPatch, IndexStore, ParserIndexFile, Parsers};
pub use memory::MemoryStore;
pub use metadata::MetadataStore;
pub use resolver::{ResolvedDocument, VariantResolver};
pub use service::DocumentService;
pub use store::RemoteStore;
pub use types::{DirectoryEntry, DirectoryListing, EntryKind, FileContent};
pub use variants::{CandidateOrigin, VariantCandidate, VariantPlan};
pub use view::{IndexedEntry, PresentOptions};
pub use webdav::WebDavStore;
