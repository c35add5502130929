//! RocksDB-backed durable document store.
//!
//! Column families:
//! - `documents`  — one JSON record per document:
//!   `{"content", "version", "createdAt", "updatedAt"}`, keyed by id.
//! - `operations` — one JSON record per history entry:
//!   `{"ops": [...], "version": n}`, keyed by
//!   `<doc id>/<10-digit zero-padded 0-based index>` so that
//!   `get_operations(from_version)` is a forward range scan starting at the
//!   padded key.
//!
//! Document ids must not contain `/` (it is the operation-key separator).

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rocksdb::{
    ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, Options, SingleThreaded,
    WriteBatch,
};
use serde::{Deserialize, Serialize};

use crate::ot::{Component, Operation};

use super::{DocumentInfo, DocumentStore, StoreError};

const CF_DOCUMENTS: &str = "documents";
const CF_OPERATIONS: &str = "operations";

/// Persisted document record.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocRecord {
    content: String,
    version: usize,
    /// Seconds since the Unix epoch.
    created_at: u64,
    updated_at: u64,
}

impl DocRecord {
    fn into_info(self, id: &str) -> DocumentInfo {
        DocumentInfo {
            id: id.to_string(),
            content: self.content,
            version: self.version,
            created_at: SystemTime::UNIX_EPOCH + Duration::from_secs(self.created_at),
            updated_at: SystemTime::UNIX_EPOCH + Duration::from_secs(self.updated_at),
        }
    }
}

/// Persisted history entry.
#[derive(Debug, Serialize, Deserialize)]
struct OpRecord {
    ops: Vec<Component>,
    version: usize,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Operation key: `<id>/<0-based index, zero-padded to 10 digits>`.
/// Padded keys sort lexicographically in version order.
fn op_key(id: &str, index: usize) -> Vec<u8> {
    format!("{id}/{index:010}").into_bytes()
}

/// Durable `DocumentStore` on RocksDB. Usually wrapped in a
/// [`super::CachedStore`] so the hot path never waits on disk.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    path: PathBuf,
}

impl RocksStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_DOCUMENTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_OPERATIONS, Options::default()),
        ];

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &path,
            cf_descriptors,
        )?;

        Ok(RocksStore { db, path })
    }

    /// Filesystem path this store was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {name:?}")))
    }

    fn load_record(&self, id: &str) -> Result<DocRecord, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn put_record(&self, id: &str, record: &DocRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        self.db
            .put_cf(cf, id.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }
}

impl DocumentStore for RocksStore {
    fn create(&self, id: &str, content: &str) -> Result<(), StoreError> {
        if self.load_record(id).is_ok() {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        let now = unix_now();
        self.put_record(
            id,
            &DocRecord {
                content: content.to_string(),
                version: 0,
                created_at: now,
                updated_at: now,
            },
        )
    }

    fn get(&self, id: &str) -> Result<DocumentInfo, StoreError> {
        Ok(self.load_record(id)?.into_info(id))
    }

    fn list(&self) -> Result<Vec<DocumentInfo>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut result = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let id = String::from_utf8_lossy(&key).into_owned();
            let record: DocRecord = serde_json::from_slice(&value)?;
            result.push(record.into_info(&id));
        }
        Ok(result)
    }

    fn update_content(&self, id: &str, content: &str, version: usize) -> Result<(), StoreError> {
        let mut record = self.load_record(id)?;
        record.content = content.to_string();
        record.version = version;
        record.updated_at = unix_now();
        self.put_record(id, &record)
    }

    fn append_operation(&self, id: &str, op: &Operation, version: usize) -> Result<(), StoreError> {
        let mut record = self.load_record(id)?;
        record.version = version;
        record.updated_at = unix_now();

        let op_record = OpRecord {
            ops: op.ops.clone(),
            version,
        };

        // Version 1 lands at index 0, matching history-slice addressing.
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_OPERATIONS)?,
            op_key(id, version.saturating_sub(1)),
            serde_json::to_vec(&op_record)?,
        );
        batch.put_cf(
            self.cf(CF_DOCUMENTS)?,
            id.as_bytes(),
            serde_json::to_vec(&record)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    fn get_operations(&self, id: &str, from_version: usize) -> Result<Vec<Operation>, StoreError> {
        let record = self.load_record(id)?;
        if from_version > record.version {
            return Err(StoreError::InvalidVersion {
                version: from_version,
                history_len: record.version,
            });
        }

        let cf = self.cf(CF_OPERATIONS)?;
        let prefix = format!("{id}/").into_bytes();
        let start = op_key(id, from_version);

        let mut ops = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let op_record: OpRecord = serde_json::from_slice(&value)?;
            ops.push(Operation { ops: op_record.ops });
        }
        Ok(ops)
    }
}
