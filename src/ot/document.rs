//! A collaborative document with its operation history.

use super::operation::Operation;
use super::OtError;

/// Document content plus the full linear history of applied operations.
///
/// Invariants: `version == history.len()`, and replaying `history` over the
/// initial content yields `content`. No-op operations are never appended.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub content: String,
    pub version: usize,
    pub history: Vec<Operation>,
}

impl Document {
    /// New document at version 0 with the given content.
    pub fn new(content: impl Into<String>) -> Self {
        Document {
            content: content.into(),
            version: 0,
            history: Vec::new(),
        }
    }

    /// Rebuild a document from persisted state.
    pub fn with_history(content: impl Into<String>, version: usize, history: Vec<Operation>) -> Self {
        Document {
            content: content.into(),
            version,
            history,
        }
    }

    /// Apply an operation, appending it to the history. No-ops leave the
    /// document and version untouched.
    pub fn apply(&mut self, op: Operation) -> Result<(), OtError> {
        if op.is_noop() {
            return Ok(());
        }
        self.content = op.apply(&self.content)?;
        self.version += 1;
        self.history.push(op);
        Ok(())
    }
}
