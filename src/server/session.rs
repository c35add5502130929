//! Per-document collaboration sessions.
//!
//! A session owns the authoritative [`Document`] for one document id and the
//! set of joined participants. It runs as a single-consumer loop over four
//! inbound channels (`join`, `leave`, `incoming`, `stop`); every document
//! mutation happens inside that loop, which is the serialization discipline
//! that keeps the transform algebra correct.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ot::{Document, Engine, Operation};
use crate::store::DocumentStore;

use super::message::ServerMessage;
use super::participant::Participant;

const INCOMING_QUEUE: usize = 64;
const MEMBERSHIP_QUEUE: usize = 16;

/// An operation submitted by a participant, tagged with the revision the
/// client formed it against.
#[derive(Debug)]
pub struct OpSubmission {
    pub participant_id: Uuid,
    pub revision: usize,
    pub op: Operation,
}

/// Cloneable handle for feeding events into a running session.
#[derive(Clone)]
pub struct SessionHandle {
    join_tx: mpsc::Sender<Arc<Participant>>,
    leave_tx: mpsc::Sender<Uuid>,
    incoming_tx: mpsc::Sender<OpSubmission>,
    stop_tx: mpsc::Sender<()>,
}

impl SessionHandle {
    /// Add a participant to the session.
    pub async fn join(&self, participant: Arc<Participant>) {
        let _ = self.join_tx.send(participant).await;
    }

    /// Remove a participant from the session.
    pub async fn leave(&self, participant_id: Uuid) {
        let _ = self.leave_tx.send(participant_id).await;
    }

    /// Submit an operation for transformation and application.
    pub async fn submit(&self, submission: OpSubmission) {
        let _ = self.incoming_tx.send(submission).await;
    }

    /// Ask the session loop to exit.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(()).await;
    }
}

/// The per-document serialization point.
pub struct Session {
    doc_id: String,
    doc: Document,
    engine: Arc<dyn Engine>,
    store: Arc<dyn DocumentStore>,
    participants: HashMap<Uuid, Arc<Participant>>,

    handle: SessionHandle,
    join_rx: mpsc::Receiver<Arc<Participant>>,
    leave_rx: mpsc::Receiver<Uuid>,
    incoming_rx: mpsc::Receiver<OpSubmission>,
    stop_rx: mpsc::Receiver<()>,
}

impl Session {
    /// Build a session seeded from persisted document state.
    pub fn new(
        doc_id: impl Into<String>,
        content: impl Into<String>,
        version: usize,
        history: Vec<Operation>,
        engine: Arc<dyn Engine>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let (join_tx, join_rx) = mpsc::channel(MEMBERSHIP_QUEUE);
        let (leave_tx, leave_rx) = mpsc::channel(MEMBERSHIP_QUEUE);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_QUEUE);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        Session {
            doc_id: doc_id.into(),
            doc: Document::with_history(content, version, history),
            engine,
            store,
            participants: HashMap::new(),
            handle: SessionHandle {
                join_tx,
                leave_tx,
                incoming_tx,
                stop_tx,
            },
            join_rx,
            leave_rx,
            incoming_rx,
            stop_rx,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Spawn the session loop onto the runtime, returning its handle.
    pub fn spawn(self) -> SessionHandle {
        let handle = self.handle();
        tokio::spawn(self.run());
        handle
    }

    /// The session's main loop; drains one event at a time.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(participant) = self.join_rx.recv() => self.handle_join(participant),
                Some(id) = self.leave_rx.recv() => self.handle_leave(id),
                Some(submission) = self.incoming_rx.recv() => self.handle_op(submission),
                _ = self.stop_rx.recv() => break,
                else => break,
            }
        }
        log::debug!("session {}: stopped", self.doc_id);
    }

    fn handle_join(&mut self, participant: Arc<Participant>) {
        participant.attach_session(self.handle.clone());
        self.participants
            .insert(participant.id(), participant.clone());

        // Current state to the joining participant, including itself in the
        // participant list.
        let clients = self.participants.values().map(|p| p.info()).collect();
        participant.send(ServerMessage::Doc {
            doc_id: self.doc_id.clone(),
            content: self.doc.content.clone(),
            revision: self.doc.version,
            clients,
        });

        let info = participant.info();
        self.broadcast_except(
            participant.id(),
            ServerMessage::Join {
                client_id: info.id,
                name: info.name,
                color: info.color,
            },
        );
        log::info!(
            "session {}: {} ({}) joined",
            self.doc_id,
            participant.name(),
            participant.id()
        );
    }

    fn handle_leave(&mut self, participant_id: Uuid) {
        let Some(participant) = self.participants.remove(&participant_id) else {
            return;
        };
        participant.detach_session();
        participant.close_outbound();

        self.broadcast_except(
            participant_id,
            ServerMessage::Leave {
                client_id: participant_id,
            },
        );
        log::info!("session {}: {} left", self.doc_id, participant_id);
    }

    fn handle_op(&mut self, submission: OpSubmission) {
        let Some(originator) = self.participants.get(&submission.participant_id).cloned() else {
            log::debug!(
                "session {}: op from unknown participant {}",
                self.doc_id,
                submission.participant_id
            );
            return;
        };

        let transformed = match self.engine.transform_incoming(
            submission.op,
            submission.revision,
            &self.doc.history,
        ) {
            Ok(op) => op,
            Err(e) => {
                log::warn!("session {}: transform error: {e}", self.doc_id);
                originator.send_error(format!("transform error: {e}"));
                return;
            }
        };

        // An op whose effect was already covered by history (e.g. the same
        // bytes deleted concurrently) needs an ack but no new revision.
        if transformed.is_noop() {
            originator.send(ServerMessage::Ack {
                revision: self.doc.version,
            });
            return;
        }

        if let Err(e) = self.doc.apply(transformed.clone()) {
            log::warn!("session {}: apply error: {e}", self.doc_id);
            originator.send_error(format!("apply error: {e}"));
            return;
        }

        // Best effort: the in-memory document stays authoritative even when
        // persistence fails (durability becomes eventual).
        if let Err(e) = self
            .store
            .update_content(&self.doc_id, &self.doc.content, self.doc.version)
        {
            log::error!("session {}: content persist failed: {e}", self.doc_id);
        }
        if let Err(e) = self
            .store
            .append_operation(&self.doc_id, &transformed, self.doc.version)
        {
            log::error!("session {}: op persist failed: {e}", self.doc_id);
        }

        // Ack first, then fan out; one loop means one total order.
        originator.send(ServerMessage::Ack {
            revision: self.doc.version,
        });
        self.broadcast_except(
            submission.participant_id,
            ServerMessage::Op {
                doc_id: self.doc_id.clone(),
                revision: self.doc.version,
                op: transformed,
                client_id: submission.participant_id,
            },
        );
    }

    fn broadcast_except(&self, skip: Uuid, msg: ServerMessage) {
        for (id, participant) in &self.participants {
            if *id != skip {
                participant.send(msg.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::JupiterEngine;
    use crate::store::{DocumentStore, MemoryStore};
    use tokio::sync::mpsc::Receiver;
    use tokio::time::{timeout, Duration};

    fn start_session(content: &str, store: Arc<MemoryStore>) -> SessionHandle {
        store.create("doc1", content).unwrap();
        Session::new(
            "doc1",
            content,
            0,
            Vec::new(),
            Arc::new(JupiterEngine),
            store,
        )
        .spawn()
    }

    async fn recv(rx: &mut Receiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("queue closed")
    }

    fn test_participant(name: &str) -> (Arc<Participant>, Receiver<ServerMessage>) {
        Participant::with_identity(Uuid::new_v4(), name, "#000000")
    }

    #[tokio::test]
    async fn test_join_receives_doc_snapshot() {
        let handle = start_session("hello", Arc::new(MemoryStore::new()));
        let (p, mut rx) = test_participant("c1");
        handle.join(p.clone()).await;

        match recv(&mut rx).await {
            ServerMessage::Doc {
                doc_id,
                content,
                revision,
                clients,
            } => {
                assert_eq!(doc_id, "doc1");
                assert_eq!(content, "hello");
                assert_eq!(revision, 0);
                assert_eq!(clients.len(), 1);
                assert_eq!(clients[0].id, p.id());
            }
            other => panic!("expected doc snapshot, got {other:?}"),
        }
        assert!(p.session().is_some());
    }

    #[tokio::test]
    async fn test_join_notifies_existing_participants() {
        let handle = start_session("", Arc::new(MemoryStore::new()));
        let (p1, mut rx1) = test_participant("c1");
        let (p2, mut rx2) = test_participant("c2");

        handle.join(p1.clone()).await;
        recv(&mut rx1).await; // doc snapshot

        handle.join(p2.clone()).await;
        recv(&mut rx2).await; // doc snapshot

        match recv(&mut rx1).await {
            ServerMessage::Join { client_id, .. } => assert_eq!(client_id, p2.id()),
            other => panic!("expected join notification, got {other:?}"),
        }
    }

    // A single insert is applied, persisted and acked.
    #[tokio::test]
    async fn test_single_insert_acked_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let handle = start_session("hello", store.clone());
        let (p, mut rx) = test_participant("c1");
        handle.join(p.clone()).await;
        recv(&mut rx).await;

        handle
            .submit(OpSubmission {
                participant_id: p.id(),
                revision: 0,
                op: Operation::new_insert(5, " world", 5),
            })
            .await;

        assert_eq!(recv(&mut rx).await, ServerMessage::Ack { revision: 1 });

        let info = store.get("doc1").unwrap();
        assert_eq!(info.content, "hello world");
        assert_eq!(info.version, 1);
        assert_eq!(store.get_operations("doc1", 0).unwrap().len(), 1);
    }

    // Concurrent inserts from two participants; both acked, both see
    // the other's transformed op, content converges.
    #[tokio::test]
    async fn test_concurrent_inserts_converge() {
        let store = Arc::new(MemoryStore::new());
        let handle = start_session("abc", store.clone());
        let (p1, mut rx1) = test_participant("c1");
        let (p2, mut rx2) = test_participant("c2");
        handle.join(p1.clone()).await;
        recv(&mut rx1).await;
        handle.join(p2.clone()).await;
        recv(&mut rx2).await;
        recv(&mut rx1).await; // join notification for p2

        // Both formed against revision 0.
        handle
            .submit(OpSubmission {
                participant_id: p1.id(),
                revision: 0,
                op: Operation::new_insert(0, "X", 3),
            })
            .await;
        handle
            .submit(OpSubmission {
                participant_id: p2.id(),
                revision: 0,
                op: Operation::new_insert(3, "Y", 3),
            })
            .await;

        assert_eq!(recv(&mut rx1).await, ServerMessage::Ack { revision: 1 });

        // p2 sees p1's op before its own ack.
        match recv(&mut rx2).await {
            ServerMessage::Op {
                revision,
                client_id,
                ..
            } => {
                assert_eq!(revision, 1);
                assert_eq!(client_id, p1.id());
            }
            other => panic!("expected op broadcast, got {other:?}"),
        }
        assert_eq!(recv(&mut rx2).await, ServerMessage::Ack { revision: 2 });

        // p1 receives p2's transformed op.
        match recv(&mut rx1).await {
            ServerMessage::Op { revision, op, .. } => {
                assert_eq!(revision, 2);
                assert_eq!(op.apply("Xabc").unwrap(), "XabcY");
            }
            other => panic!("expected op broadcast, got {other:?}"),
        }

        let info = store.get("doc1").unwrap();
        assert_eq!(info.content, "XabcY");
        assert_eq!(info.version, 2);
    }

    // Overlapping concurrent deletes stay idempotent; the second
    // submission transforms to a smaller delete.
    #[tokio::test]
    async fn test_overlapping_deletes() {
        let store = Arc::new(MemoryStore::new());
        let handle = start_session("abcdef", store.clone());
        let (p1, mut rx1) = test_participant("c1");
        let (p2, mut rx2) = test_participant("c2");
        handle.join(p1.clone()).await;
        recv(&mut rx1).await;
        handle.join(p2.clone()).await;
        recv(&mut rx2).await;
        recv(&mut rx1).await;

        handle
            .submit(OpSubmission {
                participant_id: p1.id(),
                revision: 0,
                op: Operation::new_delete(1, 3, 6),
            })
            .await;
        handle
            .submit(OpSubmission {
                participant_id: p2.id(),
                revision: 0,
                op: Operation::new_delete(2, 3, 6),
            })
            .await;

        assert_eq!(recv(&mut rx1).await, ServerMessage::Ack { revision: 1 });
        recv(&mut rx2).await; // p1's op
        assert_eq!(recv(&mut rx2).await, ServerMessage::Ack { revision: 2 });

        assert_eq!(store.get("doc1").unwrap().content, "af");
    }

    // The history replayed in order reproduces the final content.
    #[tokio::test]
    async fn test_session_linearization() {
        let store = Arc::new(MemoryStore::new());
        let handle = start_session("base", store.clone());
        let (p, mut rx) = test_participant("c1");
        handle.join(p.clone()).await;
        recv(&mut rx).await;

        // All submitted at revision 0; the session transforms each against
        // the history the client has not seen.
        for text in ["-one", "-two", "-three"] {
            handle
                .submit(OpSubmission {
                    participant_id: p.id(),
                    revision: 0,
                    op: Operation::new_insert(4, text, 4),
                })
                .await;
        }
        for expected in 1..=3usize {
            assert_eq!(
                recv(&mut rx).await,
                ServerMessage::Ack { revision: expected }
            );
        }

        let info = store.get("doc1").unwrap();
        let history = store.get_operations("doc1", 0).unwrap();
        assert_eq!(info.version, history.len());

        let mut replayed = String::from("base");
        for op in &history {
            replayed = op.apply(&replayed).unwrap();
        }
        assert_eq!(replayed, info.content);
    }

    #[tokio::test]
    async fn test_invalid_revision_reports_error() {
        let handle = start_session("abc", Arc::new(MemoryStore::new()));
        let (p, mut rx) = test_participant("c1");
        handle.join(p.clone()).await;
        recv(&mut rx).await;

        handle
            .submit(OpSubmission {
                participant_id: p.id(),
                revision: 9,
                op: Operation::new_insert(0, "x", 3),
            })
            .await;

        match recv(&mut rx).await {
            ServerMessage::Error { message } => assert!(message.contains("transform error")),
            other => panic!("expected error, got {other:?}"),
        }

        // Document untouched; a valid op still works.
        handle
            .submit(OpSubmission {
                participant_id: p.id(),
                revision: 0,
                op: Operation::new_insert(0, "x", 3),
            })
            .await;
        assert_eq!(recv(&mut rx).await, ServerMessage::Ack { revision: 1 });
    }

    #[tokio::test]
    async fn test_noop_op_acked_without_revision_bump() {
        let store = Arc::new(MemoryStore::new());
        let handle = start_session("abc", store.clone());
        let (p, mut rx) = test_participant("c1");
        handle.join(p.clone()).await;
        recv(&mut rx).await;

        handle
            .submit(OpSubmission {
                participant_id: p.id(),
                revision: 0,
                op: Operation {
                    ops: vec![crate::ot::Component::Retain(3)],
                },
            })
            .await;

        assert_eq!(recv(&mut rx).await, ServerMessage::Ack { revision: 0 });
        assert_eq!(store.get("doc1").unwrap().version, 0);
        assert!(store.get_operations("doc1", 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leave_closes_queue_and_notifies() {
        let handle = start_session("", Arc::new(MemoryStore::new()));
        let (p1, mut rx1) = test_participant("c1");
        let (p2, mut rx2) = test_participant("c2");
        handle.join(p1.clone()).await;
        recv(&mut rx1).await;
        handle.join(p2.clone()).await;
        recv(&mut rx2).await;
        recv(&mut rx1).await;

        handle.leave(p2.id()).await;

        match recv(&mut rx1).await {
            ServerMessage::Leave { client_id } => assert_eq!(client_id, p2.id()),
            other => panic!("expected leave notification, got {other:?}"),
        }
        // p2's queue is closed.
        assert_eq!(
            timeout(Duration::from_secs(2), rx2.recv()).await.unwrap(),
            None
        );
        assert!(p2.session().is_none());
    }

    #[tokio::test]
    async fn test_leave_unknown_participant_ignored() {
        let handle = start_session("", Arc::new(MemoryStore::new()));
        handle.leave(Uuid::new_v4()).await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_store_failure_keeps_session_alive() {
        // Store without the document: persists fail, edits still apply.
        let store = Arc::new(MemoryStore::new());
        let handle = Session::new(
            "ghost",
            "abc",
            0,
            Vec::new(),
            Arc::new(JupiterEngine),
            store.clone() as Arc<dyn DocumentStore>,
        )
        .spawn();

        let (p, mut rx) = test_participant("c1");
        handle.join(p.clone()).await;
        recv(&mut rx).await;

        handle
            .submit(OpSubmission {
                participant_id: p.id(),
                revision: 0,
                op: Operation::new_insert(3, "!", 3),
            })
            .await;

        // Acked despite the store knowing nothing about the document.
        assert_eq!(recv(&mut rx).await, ServerMessage::Ack { revision: 1 });
    }
}
