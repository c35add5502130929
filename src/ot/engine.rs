//! The transform strategy seam.

use super::operation::Operation;
use super::transform::transform;
use super::OtError;

/// Abstracts the collaboration algorithm so the session loop stays
/// algorithm-agnostic. Alternative strategies (e.g. Wave-style composition
/// before broadcast) slot in behind this trait.
pub trait Engine: Send + Sync {
    /// Transform a client operation created at `revision` against every
    /// history entry the client has not seen, returning an operation that
    /// applies cleanly at the current server state.
    fn transform_incoming(
        &self,
        op: Operation,
        revision: usize,
        history: &[Operation],
    ) -> Result<Operation, OtError>;
}

/// Jupiter-style one-sided transform: the incoming operation is transformed
/// sequentially against `history[revision..]`, keeping only the left-hand
/// side of each pairwise transform. The right-hand side is never needed
/// because the history is already applied to the server document.
#[derive(Debug, Default)]
pub struct JupiterEngine;

impl Engine for JupiterEngine {
    fn transform_incoming(
        &self,
        op: Operation,
        revision: usize,
        history: &[Operation],
    ) -> Result<Operation, OtError> {
        if revision > history.len() {
            return Err(OtError::InvalidRevision {
                revision,
                history_len: history.len(),
            });
        }

        let mut transformed = op;
        for other in &history[revision..] {
            transformed = transform(&transformed, other)?.0;
        }
        Ok(transformed)
    }
}
