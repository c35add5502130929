//! The hub: routes participants to per-document sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::ot::{Engine, Operation};
use crate::store::{DocumentStore, StoreError};

use super::participant::Participant;
use super::session::{Session, SessionHandle};

const JOIN_QUEUE: usize = 64;

struct JoinRequest {
    participant: Arc<Participant>,
    doc_id: String,
}

/// Registry mapping document ids to live sessions. Sessions are created
/// lazily on first join and live until the process exits.
///
/// The session map is mutated only by the hub task; lookups by other tasks
/// take the read lock.
pub struct Hub {
    store: Arc<dyn DocumentStore>,
    engine: Arc<dyn Engine>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    join_tx: mpsc::Sender<JoinRequest>,
    join_rx: Mutex<Option<mpsc::Receiver<JoinRequest>>>,
}

impl Hub {
    pub fn new(store: Arc<dyn DocumentStore>, engine: Arc<dyn Engine>) -> Arc<Self> {
        let (join_tx, join_rx) = mpsc::channel(JOIN_QUEUE);
        Arc::new(Hub {
            store,
            engine,
            sessions: RwLock::new(HashMap::new()),
            join_tx,
            join_rx: Mutex::new(Some(join_rx)),
        })
    }

    /// Create a hub and spawn its dispatch loop.
    pub fn spawn(store: Arc<dyn DocumentStore>, engine: Arc<dyn Engine>) -> Arc<Self> {
        let hub = Hub::new(store, engine);
        tokio::spawn(hub.clone().run());
        hub
    }

    /// The hub's dispatch loop. Consumes join requests until every sender
    /// (including the hub's own) is gone.
    pub async fn run(self: Arc<Self>) {
        let rx = self.join_rx.lock().await.take();
        let Some(mut rx) = rx else {
            log::warn!("hub: dispatch loop already running");
            return;
        };
        while let Some(req) = rx.recv().await {
            self.handle_join_doc(req).await;
        }
    }

    /// Route a participant to the session for `doc_id`, creating the
    /// session (and, if needed, the document) first.
    pub async fn join_doc(&self, participant: Arc<Participant>, doc_id: impl Into<String>) {
        let req = JoinRequest {
            participant,
            doc_id: doc_id.into(),
        };
        if self.join_tx.send(req).await.is_err() {
            log::error!("hub: dispatch loop is gone");
        }
    }

    /// Handle of the live session for a document, if any.
    pub async fn session(&self, doc_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(doc_id).cloned()
    }

    async fn handle_join_doc(&self, req: JoinRequest) {
        let mut sessions = self.sessions.write().await;

        let handle = match sessions.get(&req.doc_id) {
            Some(handle) => handle.clone(),
            None => {
                let (content, version, history) = match self.load_or_create(&req.doc_id) {
                    Ok(seed) => seed,
                    Err(e) => {
                        log::error!("hub: loading document {:?} failed: {e}", req.doc_id);
                        req.participant.send_error("failed to load document");
                        return;
                    }
                };
                let session = Session::new(
                    req.doc_id.clone(),
                    content,
                    version,
                    history,
                    self.engine.clone(),
                    self.store.clone(),
                );
                let handle = session.spawn();
                sessions.insert(req.doc_id.clone(), handle.clone());
                handle
            }
        };
        drop(sessions);

        handle.join(req.participant).await;
    }

    /// Seed state for a new session: load the document, creating it empty
    /// when it does not exist yet.
    fn load_or_create(&self, doc_id: &str) -> Result<(String, usize, Vec<Operation>), StoreError> {
        match self.store.get(doc_id) {
            Ok(info) => {
                let history = self.store.get_operations(doc_id, 0)?;
                Ok((info.content, info.version, history))
            }
            Err(StoreError::NotFound(_)) => {
                self.store.create(doc_id, "")?;
                Ok((String::new(), 0, Vec::new()))
            }
            Err(e) => Err(e),
        }
    }
}
