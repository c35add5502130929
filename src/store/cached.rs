//! Write-behind caching store.
//!
//! Wraps a durable backing store with an in-memory overlay. All reads and
//! writes hit the overlay; a background flusher propagates dirty documents
//! to the backing store on a fixed interval and once more on close.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 CachedStore                   │
//! │                                               │
//! │  overlay (MemoryStore)    dirty map           │
//! │  ┌──────────────────┐     ┌────────────────┐  │
//! │  │ content, version │     │ content_dirty  │  │
//! │  │ history          │     │ flushed_ops    │  │
//! │  └──────────────────┘     │ created        │  │
//! │                           └────────────────┘  │
//! │            │ flusher task (interval + close)  │
//! └────────────┼──────────────────────────────────┘
//!              ▼
//!       backing DocumentStore
//! ```
//!
//! Per-document flush order is `create` → operations in version order →
//! content update, so a crash between steps leaves a backing state that
//! history replay can repair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::ot::Operation;

use super::{DocumentInfo, DocumentStore, MemoryStore, StoreError};

/// What needs flushing for a single document.
#[derive(Debug, Clone, Copy, Default)]
struct DirtyState {
    /// Content/version needs writing to the backing store.
    content_dirty: bool,
    /// Count of history entries already persisted to the backing store.
    flushed_ops: usize,
    /// Document was created in the overlay but not yet in the backing store.
    created: bool,
}

/// Read-through / write-behind overlay over a backing [`DocumentStore`].
///
/// Must be created inside a tokio runtime; the flusher runs as a background
/// task until [`CachedStore::close`] is awaited.
pub struct CachedStore {
    overlay: MemoryStore,
    backing: Arc<dyn DocumentStore>,
    dirty: Mutex<HashMap<String, DirtyState>>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl CachedStore {
    /// Create a cached store flushing to `backing` every `flush_interval`.
    pub fn new(backing: Arc<dyn DocumentStore>, flush_interval: Duration) -> Arc<Self> {
        let store = Arc::new(CachedStore {
            overlay: MemoryStore::new(),
            backing,
            dirty: Mutex::new(HashMap::new()),
            stop: Mutex::new(None),
            flusher: Mutex::new(None),
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(flush_loop(store.clone(), flush_interval, stop_rx));
        *lock(&store.stop) = Some(stop_tx);
        *lock(&store.flusher) = Some(handle);
        store
    }

    /// Signal the flusher to perform one final flush and wait for it.
    pub async fn close(&self) {
        if let Some(tx) = lock(&self.stop).take() {
            let _ = tx.send(());
        }
        let handle = lock(&self.flusher).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Load a document and its operations from the backing store into the
    /// overlay, seeding `flushed_ops` so persisted history is never
    /// re-flushed.
    fn load_from_backing(&self, id: &str) -> Result<(), StoreError> {
        let info = self.backing.get(id)?;
        let ops = self.backing.get_operations(id, 0)?;
        let flushed = ops.len();
        self.overlay.install(info, ops);

        lock(&self.dirty)
            .entry(id.to_string())
            .or_insert(DirtyState {
                flushed_ops: flushed,
                ..DirtyState::default()
            });
        Ok(())
    }

    /// Write all dirty documents to the backing store. Failures are logged
    /// and retried on the next cycle.
    fn flush(&self) {
        // Work on a copy so overlay writes keep flowing during backing I/O.
        let snapshot: Vec<(String, DirtyState)> = lock(&self.dirty)
            .iter()
            .map(|(id, ds)| (id.clone(), *ds))
            .collect();

        for (id, mut ds) in snapshot {
            let Some((info, total_ops, new_ops)) = self.overlay.snapshot_from(&id, ds.flushed_ops)
            else {
                continue;
            };

            if ds.created {
                if let Err(e) = self.backing.create(&id, "") {
                    log::warn!("cached store: create {id:?} in backing store failed: {e}");
                    continue;
                }
                ds.created = false;
            }

            // Ops go before content so crash recovery can replay history.
            let mut append_failed = false;
            for op in &new_ops {
                let version = ds.flushed_ops + 1;
                if let Err(e) = self.backing.append_operation(&id, op, version) {
                    log::warn!("cached store: flush of op {version} for {id:?} failed: {e}");
                    append_failed = true;
                    break;
                }
                ds.flushed_ops += 1;
            }

            if ds.content_dirty && !append_failed {
                match self.backing.update_content(&id, &info.content, info.version) {
                    Ok(()) => ds.content_dirty = false,
                    Err(e) => {
                        log::warn!("cached store: flush of content for {id:?} failed: {e}")
                    }
                }
            }

            // Merge results into the authoritative dirty map; keep the entry
            // if new writes arrived while we were flushing.
            let mut dirty = lock(&self.dirty);
            let mut clean = false;
            if let Some(cur) = dirty.get_mut(&id) {
                cur.flushed_ops = ds.flushed_ops;
                cur.created = ds.created;
                if !ds.content_dirty {
                    cur.content_dirty = false;
                }
                if !cur.content_dirty && !cur.created && cur.flushed_ops >= total_ops {
                    let current_len = self.overlay.history_len(&id).unwrap_or(0);
                    clean = cur.flushed_ops >= current_len;
                }
            }
            if clean {
                dirty.remove(&id);
            }
        }
    }

    /// Make sure the document is present in the overlay.
    fn ensure_cached(&self, id: &str) -> Result<(), StoreError> {
        self.get(id).map(|_| ())
    }
}

impl DocumentStore for CachedStore {
    fn create(&self, id: &str, content: &str) -> Result<(), StoreError> {
        self.overlay.create(id, content)?;
        lock(&self.dirty).insert(
            id.to_string(),
            DirtyState {
                content_dirty: true,
                flushed_ops: 0,
                created: true,
            },
        );
        Ok(())
    }

    fn get(&self, id: &str) -> Result<DocumentInfo, StoreError> {
        match self.overlay.get(id) {
            Ok(info) => Ok(info),
            Err(StoreError::NotFound(_)) => {
                self.load_from_backing(id)?;
                self.overlay.get(id)
            }
            Err(e) => Err(e),
        }
    }

    /// Not cached: the overlay only ever holds the documents it has seen.
    fn list(&self) -> Result<Vec<DocumentInfo>, StoreError> {
        self.backing.list()
    }

    fn update_content(&self, id: &str, content: &str, version: usize) -> Result<(), StoreError> {
        self.ensure_cached(id)?;
        self.overlay.update_content(id, content, version)?;

        let mut dirty = lock(&self.dirty);
        let ds = dirty.entry(id.to_string()).or_insert_with(|| DirtyState {
            // Content became dirty without new ops: everything currently in
            // the overlay history is already persisted.
            flushed_ops: self.overlay.history_len(id).unwrap_or(0),
            ..DirtyState::default()
        });
        ds.content_dirty = true;
        Ok(())
    }

    fn append_operation(&self, id: &str, op: &Operation, version: usize) -> Result<(), StoreError> {
        self.ensure_cached(id)?;

        // Snapshot the history length before appending: if this document was
        // clean, exactly that many ops are already in the backing store.
        let prev_len = self.overlay.history_len(id).unwrap_or(0);
        self.overlay.append_operation(id, op, version)?;

        lock(&self.dirty)
            .entry(id.to_string())
            .or_insert(DirtyState {
                flushed_ops: prev_len,
                ..DirtyState::default()
            });
        Ok(())
    }

    fn get_operations(&self, id: &str, from_version: usize) -> Result<Vec<Operation>, StoreError> {
        self.ensure_cached(id)?;
        self.overlay.get_operations(id, from_version)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn flush_loop(
    store: Arc<CachedStore>,
    flush_interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => store.flush(),
            _ = &mut stop => {
                store.flush();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::Operation;

    fn backing() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_read_through() {
        let backing = backing();
        backing.create("doc1", "hello").unwrap();
        let op = Operation::new_insert(5, " world", 5);
        backing.append_operation("doc1", &op, 1).unwrap();

        // Long interval: no automatic flush during the test.
        let cache = CachedStore::new(backing.clone(), Duration::from_secs(3600));

        let info = cache.get("doc1").unwrap();
        assert_eq!(info.content, "hello");
        assert_eq!(info.version, 1);

        let ops = cache.get_operations("doc1", 0).unwrap();
        assert_eq!(ops, vec![op]);

        cache.close().await;
    }

    #[tokio::test]
    async fn test_write_behind() {
        let backing = backing();
        let cache = CachedStore::new(backing.clone(), Duration::from_millis(50));

        cache.create("doc1", "hello").unwrap();

        // Not yet in the backing store.
        assert!(matches!(backing.get("doc1"), Err(StoreError::NotFound(_))));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(backing.get("doc1").unwrap().id, "doc1");
        cache.close().await;
    }

    // One create plus one append reaches the backing store exactly once.
    #[tokio::test]
    async fn test_flush_tracking_across_cycles() {
        let backing = backing();
        let cache = CachedStore::new(backing.clone(), Duration::from_millis(50));

        cache.create("doc1", "hello").unwrap();
        for i in 1..=3usize {
            let op = Operation::new_insert(0, "x", 4 + i);
            cache.append_operation("doc1", &op, i).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(backing.get_operations("doc1", 0).unwrap().len(), 3);

        for i in 4..=5usize {
            let op = Operation::new_insert(0, "y", 4 + i);
            cache.append_operation("doc1", &op, i).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(backing.get_operations("doc1", 0).unwrap().len(), 5);

        cache.close().await;
    }

    // close() flushes everything; backing matches the overlay.
    #[tokio::test]
    async fn test_close_flushes() {
        let backing = backing();
        let cache = CachedStore::new(backing.clone(), Duration::from_secs(3600));

        cache.create("doc1", "hello").unwrap();
        let op = Operation::new_insert(5, " world", 5);
        cache.append_operation("doc1", &op, 1).unwrap();
        cache.update_content("doc1", "hello world", 1).unwrap();

        cache.close().await;

        let info = backing.get("doc1").unwrap();
        assert_eq!(info.content, "hello world");
        assert_eq!(info.version, 1);
        assert_eq!(backing.get_operations("doc1", 0).unwrap(), vec![op]);
    }

    // Reloading a persisted doc and flushing again never
    // duplicates ops.
    #[tokio::test]
    async fn test_preloaded_doc_no_duplicates() {
        let backing = backing();
        backing.create("doc1", "ab").unwrap();
        backing
            .append_operation("doc1", &Operation::new_insert(2, "c", 2), 1)
            .unwrap();
        backing
            .append_operation("doc1", &Operation::new_insert(3, "d", 3), 2)
            .unwrap();

        let cache = CachedStore::new(backing.clone(), Duration::from_secs(3600));
        cache.get("doc1").unwrap();

        let op3 = Operation::new_insert(4, "e", 4);
        cache.append_operation("doc1", &op3, 3).unwrap();
        cache.close().await;

        let ops = backing.get_operations("doc1", 0).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[2], op3);
    }

    #[tokio::test]
    async fn test_reload_then_immediate_flush_is_clean() {
        let backing = backing();
        backing.create("doc1", "ab").unwrap();
        backing
            .append_operation("doc1", &Operation::new_insert(2, "c", 2), 1)
            .unwrap();

        let cache = CachedStore::new(backing.clone(), Duration::from_secs(3600));
        cache.get("doc1").unwrap();
        cache.flush();
        cache.close().await;

        assert_eq!(backing.get_operations("doc1", 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_content_on_clean_doc() {
        let backing = backing();
        backing.create("doc1", "ab").unwrap();
        backing
            .append_operation("doc1", &Operation::new_insert(2, "c", 2), 1)
            .unwrap();

        let cache = CachedStore::new(backing.clone(), Duration::from_secs(3600));
        cache.update_content("doc1", "abc", 1).unwrap();
        cache.close().await;

        let info = backing.get("doc1").unwrap();
        assert_eq!(info.content, "abc");
        // The pre-existing op was not re-flushed.
        assert_eq!(backing.get_operations("doc1", 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_delegates_to_backing() {
        let backing = backing();
        backing.create("a", "").unwrap();
        backing.create("b", "").unwrap();

        let cache = CachedStore::new(backing.clone(), Duration::from_secs(3600));
        cache.create("c", "").unwrap(); // not flushed yet

        assert_eq!(cache.list().unwrap().len(), 2);
        cache.close().await;
        assert_eq!(cache.list().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_get_missing_everywhere() {
        let cache = CachedStore::new(backing(), Duration::from_secs(3600));
        assert!(matches!(cache.get("nope"), Err(StoreError::NotFound(_))));
        cache.close().await;
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let cache = CachedStore::new(backing(), Duration::from_secs(3600));
        cache.close().await;
        cache.close().await;
    }
}
