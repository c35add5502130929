//! # coedit — real-time collaborative text editing server
//!
//! Multiple clients edit a shared plain-text document over WebSockets; the
//! server reconciles concurrent edits with operational transformation so
//! every participant converges to the same content, and records both the
//! current content and the full operation history.
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                      ┌──────────────┐
//!             ├── ws ── Hub ─────── │ Session (doc)│ ── one loop,
//! Client B ──┘          join_doc    │  Document    │    one linearization
//!                                   │  history     │
//!                                   └──────┬───────┘
//!                                          │ best-effort persist
//!                                   ┌──────▼───────┐
//!                                   │ CachedStore  │ ── write-behind flush
//!                                   └──────┬───────┘
//!                                   ┌──────▼───────┐
//!                                   │ RocksStore   │
//!                                   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`ot`] — operation algebra: apply, transform, tie-breaks, history
//! - [`store`] — document persistence: memory, write-behind cache, RocksDB
//! - [`server`] — session actors, hub routing, JSON wire protocol, WebSocket edge

pub mod ot;
pub mod server;
pub mod store;

pub use ot::{Component, Document, Engine, JupiterEngine, Operation, OtError};
pub use server::{ClientMessage, Hub, Participant, ServerMessage, Session, SessionHandle};
pub use store::{CachedStore, DocumentInfo, DocumentStore, MemoryStore, RocksStore, StoreError};
