//! Pairwise transformation of concurrent operations.

use super::operation::{compact, Component, Operation};
use super::OtError;

/// Transform two concurrent operations `a` and `b`, both formed against the
/// same document state, into `(a', b')` such that
///
/// ```text
/// apply(apply(doc, a), b') == apply(apply(doc, b), a')
/// ```
///
/// for every document `d` both operations are valid against. Fails with
/// [`OtError::BaseLenMismatch`] when the operations disagree about the base
/// document length, and [`OtError::Desync`] when one side exhausts while the
/// other still has input to consume.
pub fn transform(a: &Operation, b: &Operation) -> Result<(Operation, Operation), OtError> {
    if a.base_len() != b.base_len() {
        return Err(OtError::BaseLenMismatch {
            a: a.base_len(),
            b: b.base_len(),
        });
    }

    let mut ap = Vec::new();
    let mut bp = Vec::new();
    let mut ca = Cursor::new(&a.ops);
    let mut cb = Cursor::new(&b.ops);

    loop {
        match (ca.peek_kind(), cb.peek_kind()) {
            (None, None) => break,

            // Inserts consume no input and go first; when both sides insert
            // at the same spot, a wins the tie-break. Both replicas must use
            // the same rule or convergence breaks.
            (Some(Kind::Insert), _) => {
                let Some(s) = ca.take_insert() else {
                    return Err(OtError::Desync);
                };
                bp.push(Component::Retain(s.len()));
                ap.push(Component::Insert(s));
            }
            (_, Some(Kind::Insert)) => {
                let Some(s) = cb.take_insert() else {
                    return Err(OtError::Desync);
                };
                ap.push(Component::Retain(s.len()));
                bp.push(Component::Insert(s));
            }

            // Both sides consume input; advance by the shorter chunk.
            (Some(ka), Some(kb)) => {
                let n = ca.remaining().min(cb.remaining());
                ca.advance(n);
                cb.advance(n);
                match (ka, kb) {
                    (Kind::Retain, Kind::Retain) => {
                        ap.push(Component::Retain(n));
                        bp.push(Component::Retain(n));
                    }
                    (Kind::Delete, Kind::Retain) => ap.push(Component::Delete(n)),
                    (Kind::Retain, Kind::Delete) => bp.push(Component::Delete(n)),
                    // Both deleted the same bytes; nothing left to adjust.
                    (Kind::Delete, Kind::Delete) => {}
                    _ => return Err(OtError::Desync),
                }
            }

            (Some(_), None) | (None, Some(_)) => return Err(OtError::Desync),
        }
    }

    Ok((
        Operation { ops: compact(ap) },
        Operation { ops: compact(bp) },
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Retain,
    Insert,
    Delete,
}

/// Walks a component list allowing partial consumption of retain/delete
/// runs. Inserts are always taken whole.
struct Cursor<'a> {
    ops: &'a [Component],
    index: usize,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(ops: &'a [Component]) -> Self {
        Cursor {
            ops,
            index: 0,
            offset: 0,
        }
    }

    fn peek_kind(&self) -> Option<Kind> {
        self.ops.get(self.index).map(|c| match c {
            Component::Retain(_) => Kind::Retain,
            Component::Insert(_) => Kind::Insert,
            Component::Delete(_) => Kind::Delete,
        })
    }

    /// Unconsumed units of the current component.
    fn remaining(&self) -> usize {
        self.ops
            .get(self.index)
            .map_or(0, |c| c.len() - self.offset)
    }

    /// Consume `n` units of the current retain/delete component
    /// (`n <= remaining()`).
    fn advance(&mut self, n: usize) {
        if n >= self.remaining() {
            self.index += 1;
            self.offset = 0;
        } else {
            self.offset += n;
        }
    }

    /// Consume the rest of the current insert component.
    fn take_insert(&mut self) -> Option<String> {
        match self.ops.get(self.index) {
            Some(Component::Insert(s)) => {
                let out = s[self.offset..].to_string();
                self.index += 1;
                self.offset = 0;
                Some(out)
            }
            _ => None,
        }
    }
}
