//! JSON wire protocol, one message per WebSocket text frame.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ot::Operation;

/// A connected user, as seen by other participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Subscribe to a document.
    Join {
        #[serde(rename = "docId")]
        doc_id: String,
    },
    /// Submit an edit formed at `revision`.
    Op {
        #[serde(rename = "docId")]
        doc_id: String,
        revision: usize,
        op: Operation,
    },
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Initial snapshot after a join.
    Doc {
        #[serde(rename = "docId")]
        doc_id: String,
        content: String,
        revision: usize,
        clients: Vec<ParticipantInfo>,
    },
    /// The sender's previous op was applied; the new server revision.
    Ack { revision: usize },
    /// An operation from another participant at the given new revision.
    Op {
        #[serde(rename = "docId")]
        doc_id: String,
        revision: usize,
        op: Operation,
        #[serde(rename = "clientId")]
        client_id: Uuid,
    },
    /// A new participant joined the document.
    Join {
        #[serde(rename = "clientId")]
        client_id: Uuid,
        name: String,
        color: String,
    },
    /// A participant left the document.
    Leave {
        #[serde(rename = "clientId")]
        client_id: Uuid,
    },
    /// Soft failure attributable to the last request.
    Error { message: String },
}
