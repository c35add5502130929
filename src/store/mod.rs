//! Document persistence.
//!
//! [`DocumentStore`] abstracts where documents and their operation history
//! live. Implementations compose by wrapping:
//!
//! ```text
//! ┌─────────────┐   reads/writes   ┌─────────────┐   periodic flush   ┌────────────┐
//! │ Session /   │ ───────────────► │ CachedStore │ ─────────────────► │ RocksStore │
//! │ Hub         │                  │ (overlay)   │    (write-behind)  │ (durable)  │
//! └─────────────┘                  └─────────────┘                    └────────────┘
//! ```
//!
//! `MemoryStore` also stands alone as the non-durable backend.

mod cached;
mod memory;
mod rocks;

pub use cached::CachedStore;
pub use memory::MemoryStore;
pub use rocks::RocksStore;

use std::time::SystemTime;

use thiserror::Error;

use crate::ot::Operation;

/// Document metadata and current content.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub id: String,
    pub content: String,
    pub version: usize,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {0:?} already exists")]
    AlreadyExists(String),

    #[error("document {0:?} not found")]
    NotFound(String),

    #[error("invalid version {version} (history length {history_len})")]
    InvalidVersion { version: usize, history_len: usize },

    #[error("storage backend: {0}")]
    Backend(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Abstract document persistence.
///
/// Implementations must not reorder history, and `get_operations` must
/// observe every prior `append_operation` by the same caller.
pub trait DocumentStore: Send + Sync {
    /// Initialize a document at version 0.
    fn create(&self, id: &str, content: &str) -> Result<(), StoreError>;

    /// Fetch a document's metadata and content.
    fn get(&self, id: &str) -> Result<DocumentInfo, StoreError>;

    /// All known documents, in unspecified order.
    fn list(&self) -> Result<Vec<DocumentInfo>, StoreError>;

    /// Overwrite the current content and version.
    fn update_content(&self, id: &str, content: &str, version: usize) -> Result<(), StoreError>;

    /// Append an operation to the history and set the metadata version.
    fn append_operation(&self, id: &str, op: &Operation, version: usize) -> Result<(), StoreError>;

    /// Return `history[from_version..]` in order.
    fn get_operations(&self, id: &str, from_version: usize) -> Result<Vec<Operation>, StoreError>;
}
