use nodestore::{NodeId, StoreError};
use thiserror::Error;

/// Everything that can go wrong while coordinating a single move.
///
/// Validation-stage errors (`ProtectedNode`, `UnresolvedNode`, `OutOfRange`,
/// `Cancelled`) are resolved locally and never reach the backend. Call-stage
/// errors are always followed by an invalidate-and-resync cycle, regardless
/// of classification, because the backend state is no longer known.
#[derive(Debug, Clone, Error)]
pub enum MoveError {
    #[error("\"{title}\" is a protected node and cannot be moved")]
    ProtectedNode { title: String },

    #[error("visual index {visual_index} could not be resolved to a node id")]
    UnresolvedNode { visual_index: usize },

    #[error("computed index {index} is out of range for {len} siblings")]
    OutOfRange { index: usize, len: usize },

    #[error("backend refused to move {id}: {reason}")]
    BackendRejected { id: NodeId, reason: String },

    #[error("backend is unavailable")]
    BackendUnavailable,

    #[error("backend call timed out")]
    Timeout,

    #[error("move was cancelled before the backend call")]
    Cancelled,
}

impl MoveError {
    /// Stable kind string reported to the rendering layer in
    /// [`MoveOutcome`](crate::MoveOutcome). Never changes for a given
    /// variant; the rendering layer keys user-facing messages off it.
    pub fn kind(&self) -> &'static str {
        match self {
            MoveError::ProtectedNode { .. } => "ProtectedNodeError",
            MoveError::UnresolvedNode { .. } => "UnresolvedNodeError",
            MoveError::OutOfRange { .. } => "OutOfRangeError",
            MoveError::BackendRejected { .. } => "BackendRejectedError",
            MoveError::BackendUnavailable => "BackendUnavailableError",
            MoveError::Timeout => "TimeoutError",
            MoveError::Cancelled => "Cancelled",
        }
    }

    /// Whether the failure leaves the backend state unknown. An inconclusive
    /// failure must invalidate cached state before it is reported.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, MoveError::BackendUnavailable | MoveError::Timeout)
    }

    /// Classifies a backend error raised while serving the move that was
    /// resolving `visual_index`.
    pub(crate) fn from_store(error: StoreError, visual_index: usize) -> Self {
        match error {
            // The id existed when the mapping was built but not when the
            // call landed: the mapping was stale.
            StoreError::NotFound { id } => {
                log::warn!("backend reported {id} missing; mapping was stale");
                MoveError::UnresolvedNode { visual_index }
            }
            StoreError::Rejected { id, reason } => MoveError::BackendRejected { id, reason },
            StoreError::Unavailable => MoveError::BackendUnavailable,
            StoreError::Timeout => MoveError::Timeout,
        }
    }
}

/// Errors raised while constructing a [`ReorderSession`](crate::ReorderSession).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store {
        #[from]
        source: StoreError,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn call_stage_not_found_classifies_against_the_resolving_slot() {
        let error = MoveError::from_store(
            StoreError::NotFound {
                id: NodeId::new("9"),
            },
            4,
        );

        assert!(matches!(
            error,
            MoveError::UnresolvedNode { visual_index: 4 }
        ));
    }

    #[test]
    fn only_unavailable_and_timeout_are_inconclusive() {
        assert!(MoveError::BackendUnavailable.is_inconclusive());
        assert!(MoveError::Timeout.is_inconclusive());
        assert!(!MoveError::Cancelled.is_inconclusive());
        assert!(!MoveError::OutOfRange { index: 3, len: 2 }.is_inconclusive());
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(
            MoveError::ProtectedNode { title: "x".into() }.kind(),
            "ProtectedNodeError"
        );
        assert_eq!(MoveError::BackendUnavailable.kind(), "BackendUnavailableError");
        assert_eq!(MoveError::Timeout.kind(), "TimeoutError");
        assert_eq!(MoveError::Cancelled.kind(), "Cancelled");
    }
}
