//! Operations and their components.

use serde::{Deserialize, Serialize};

use super::OtError;

/// A single step in an operation.
///
/// Serialized with one JSON key per variant: `{"retain":n}`, `{"insert":"s"}`
/// or `{"delete":n}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Keep `n` bytes unchanged, advancing the cursor.
    Retain(usize),
    /// Insert text at the cursor.
    Insert(String),
    /// Remove `n` bytes at the cursor.
    Delete(usize),
}

impl Component {
    /// Number of units this component covers: retained/deleted bytes of the
    /// input, or the byte length of the inserted text.
    pub fn len(&self) -> usize {
        match self {
            Component::Retain(n) | Component::Delete(n) => *n,
            Component::Insert(s) => s.len(),
        }
    }

    /// A component that covers nothing. Dropped by [`compact`].
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A sequence of components that transforms a document in one step.
///
/// Components are applied left-to-right, advancing a cursor through the
/// input document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub ops: Vec<Component>,
}

impl Operation {
    /// An operation that inserts `text` at byte `pos` in a document of
    /// `doc_len` bytes.
    pub fn new_insert(pos: usize, text: impl Into<String>, doc_len: usize) -> Self {
        let text = text.into();
        let mut ops = Vec::with_capacity(3);
        ops.push(Component::Retain(pos));
        ops.push(Component::Insert(text));
        ops.push(Component::Retain(doc_len.saturating_sub(pos)));
        Operation { ops: compact(ops) }
    }

    /// An operation that deletes `count` bytes at byte `pos` in a document
    /// of `doc_len` bytes.
    pub fn new_delete(pos: usize, count: usize, doc_len: usize) -> Self {
        let mut ops = Vec::with_capacity(3);
        ops.push(Component::Retain(pos));
        ops.push(Component::Delete(count));
        ops.push(Component::Retain(doc_len.saturating_sub(pos + count)));
        Operation { ops: compact(ops) }
    }

    /// Expected input document length in bytes.
    pub fn base_len(&self) -> usize {
        self.ops
            .iter()
            .map(|c| match c {
                Component::Retain(n) | Component::Delete(n) => *n,
                Component::Insert(_) => 0,
            })
            .sum()
    }

    /// Document length in bytes after the operation is applied.
    pub fn target_len(&self) -> usize {
        self.ops
            .iter()
            .map(|c| match c {
                Component::Retain(n) => *n,
                Component::Insert(s) => s.len(),
                Component::Delete(_) => 0,
            })
            .sum()
    }

    /// True if the operation makes no changes.
    pub fn is_noop(&self) -> bool {
        self.ops
            .iter()
            .all(|c| matches!(c, Component::Retain(_)) || c.is_empty())
    }

    /// Apply the operation to a document string.
    pub fn apply(&self, doc: &str) -> Result<String, OtError> {
        let base_len = self.base_len();
        if doc.len() != base_len {
            return Err(OtError::LengthMismatch {
                doc_len: doc.len(),
                base_len,
            });
        }

        let mut out = String::with_capacity(self.target_len());
        let mut pos = 0;
        for c in &self.ops {
            match c {
                Component::Retain(n) => {
                    let end = pos + n;
                    let chunk = doc
                        .get(pos..end)
                        .ok_or(OtError::SplitCodepoint { pos: end })?;
                    out.push_str(chunk);
                    pos = end;
                }
                Component::Insert(s) => out.push_str(s),
                Component::Delete(n) => pos += n,
            }
        }
        Ok(out)
    }
}

/// Merge adjacent components of the same kind and drop empty ones.
///
/// Idempotent; the output never holds two neighbouring components of the
/// same variant.
pub fn compact(ops: Vec<Component>) -> Vec<Component> {
    let mut result: Vec<Component> = Vec::with_capacity(ops.len());
    for c in ops {
        if c.is_empty() {
            continue;
        }
        match (result.last_mut(), c) {
            (Some(Component::Retain(last)), Component::Retain(n)) => *last += n,
            (Some(Component::Delete(last)), Component::Delete(n)) => *last += n,
            (Some(Component::Insert(last)), Component::Insert(s)) => last.push_str(&s),
            (_, c) => result.push(c),
        }
    }
    result
}
