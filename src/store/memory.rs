//! In-memory document store.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use crate::ot::Operation;

use super::{DocumentInfo, DocumentStore, StoreError};

#[derive(Debug, Clone)]
struct DocRecord {
    info: DocumentInfo,
    history: Vec<Operation>,
}

/// A `DocumentStore` backed by a map. The default backend, and the overlay
/// tier inside [`super::CachedStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, DocRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DocRecord>> {
        self.docs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DocRecord>> {
        self.docs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current history length, if the document is present. Used by the
    /// cache tier to track flushed-operation counts.
    pub(crate) fn history_len(&self, id: &str) -> Option<usize> {
        self.read().get(id).map(|rec| rec.history.len())
    }

    /// Install a document loaded from a backing store. Keeps an existing
    /// record if one raced in first.
    pub(crate) fn install(&self, info: DocumentInfo, history: Vec<Operation>) {
        self.write()
            .entry(info.id.clone())
            .or_insert(DocRecord { info, history });
    }

    /// Consistent snapshot for the flusher: metadata, total history length,
    /// and the history tail starting at `from`.
    pub(crate) fn snapshot_from(
        &self,
        id: &str,
        from: usize,
    ) -> Option<(DocumentInfo, usize, Vec<Operation>)> {
        let docs = self.read();
        let rec = docs.get(id)?;
        let total = rec.history.len();
        let tail = rec.history.get(from..).unwrap_or_default().to_vec();
        Some((rec.info.clone(), total, tail))
    }
}

impl DocumentStore for MemoryStore {
    fn create(&self, id: &str, content: &str) -> Result<(), StoreError> {
        let mut docs = self.write();
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        let now = SystemTime::now();
        docs.insert(
            id.to_string(),
            DocRecord {
                info: DocumentInfo {
                    id: id.to_string(),
                    content: content.to_string(),
                    version: 0,
                    created_at: now,
                    updated_at: now,
                },
                history: Vec::new(),
            },
        );
        Ok(())
    }

    fn get(&self, id: &str) -> Result<DocumentInfo, StoreError> {
        self.read()
            .get(id)
            .map(|rec| rec.info.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<DocumentInfo>, StoreError> {
        Ok(self.read().values().map(|rec| rec.info.clone()).collect())
    }

    fn update_content(&self, id: &str, content: &str, version: usize) -> Result<(), StoreError> {
        let mut docs = self.write();
        let rec = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        rec.info.content = content.to_string();
        rec.info.version = version;
        rec.info.updated_at = SystemTime::now();
        Ok(())
    }

    fn append_operation(&self, id: &str, op: &Operation, version: usize) -> Result<(), StoreError> {
        let mut docs = self.write();
        let rec = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        rec.history.push(op.clone());
        rec.info.version = version;
        rec.info.updated_at = SystemTime::now();
        Ok(())
    }

    fn get_operations(&self, id: &str, from_version: usize) -> Result<Vec<Operation>, StoreError> {
        let docs = self.read();
        let rec = docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if from_version > rec.history.len() {
            return Err(StoreError::InvalidVersion {
                version: from_version,
                history_len: rec.history.len(),
            });
        }
        Ok(rec.history[from_version..].to_vec())
    }
}
