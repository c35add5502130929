//! Operational transformation core.
//!
//! Documents are plain UTF-8 strings; edits are [`Operation`]s — ordered
//! sequences of retain/insert/delete [`Component`]s applied left-to-right
//! with a moving cursor. Concurrent operations formed against the same
//! document state are reconciled with [`transform`], which rewrites them so
//! they commute:
//!
//! ```text
//!            doc
//!           /   \
//!          a     b
//!         /       \
//!     doc+a       doc+b
//!         \       /
//!          b'   a'
//!           \   /
//!         converged
//! ```
//!
//! Positions and lengths are **byte offsets** into the document string.
//! Clients must count in the same unit; an operation whose offsets split a
//! multibyte UTF-8 sequence fails with [`OtError::SplitCodepoint`] rather
//! than producing a torn document.
//!
//! Reference: Nichols et al. — High-latency, low-bandwidth windowing in
//! the Jupiter collaboration system (UIST '95).

mod document;
mod engine;
mod operation;
mod transform;

pub use document::Document;
pub use engine::{Engine, JupiterEngine};
pub use operation::{compact, Component, Operation};
pub use transform::transform;

use thiserror::Error;

/// Errors from applying or transforming operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtError {
    /// The operation was built against a document of a different length.
    #[error("document length {doc_len} does not match operation base length {base_len}")]
    LengthMismatch { doc_len: usize, base_len: usize },

    /// Two operations handed to `transform` do not share a base length.
    #[error("base lengths differ: a={a}, b={b}")]
    BaseLenMismatch { a: usize, b: usize },

    /// One side of a transform ran out of components while the other still
    /// had input to consume. Indicates an invariant violation upstream.
    #[error("transform ran out of components")]
    Desync,

    /// A client submitted an operation at a revision outside the history.
    #[error("invalid revision {revision} (history length {history_len})")]
    InvalidRevision { revision: usize, history_len: usize },

    /// A byte offset landed inside a multibyte UTF-8 sequence.
    #[error("operation splits a multibyte character at byte {pos}")]
    SplitCodepoint { pos: usize },
}
