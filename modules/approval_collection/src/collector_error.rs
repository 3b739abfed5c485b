//! Error types for assignment collector operations.

use crate::approval_collector::ApprovalCollectorError;
use sealing_common::{ChunkIndex, Identifier};

/// Errors returned by [`AssignmentCollector`](crate::assignment_collector::AssignmentCollector)
/// and [`State`](crate::state::State) operations.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// Input refers to a different execution result than the collector's.
    #[error("result mismatch: expected {expected}, got {got}")]
    ResultMismatch { expected: Identifier, got: Identifier },

    /// The assigner failed for the first incorporating block.
    #[error("could not compute chunk assignment for result {result_id} at block {block_id}: {source}")]
    ChunkAssignment {
        result_id: Identifier,
        block_id: Identifier,
        source: anyhow::Error,
    },

    /// Authorized verifiers of the sealing candidate could not be determined.
    #[error("could not get authorized verifiers at block {block_id}: {source}")]
    AuthorizedVerifiers {
        block_id: Identifier,
        source: anyhow::Error,
    },

    /// No incorporated result has been processed yet, so approvers are unknown.
    #[error("approvers of result {result_id} are not known yet")]
    ApproversUnknown { result_id: Identifier },

    /// The approver is not an authorized verifier of the result.
    #[error("{approver_id} is not an authorized verifier for result {result_id}")]
    UnauthorizedApprover {
        approver_id: Identifier,
        result_id: Identifier,
    },

    /// The signature does not match the approval body and approver's key.
    #[error("invalid signature from {approver_id} on chunk {chunk_index} of result {result_id}")]
    InvalidSignature {
        approver_id: Identifier,
        result_id: Identifier,
        chunk_index: ChunkIndex,
    },

    /// The signature verifier itself failed.
    #[error("could not verify signature from {approver_id}: {source}")]
    SignatureVerification {
        approver_id: Identifier,
        source: anyhow::Error,
    },

    /// Height of an incorporating block already known locally could not be found.
    #[error("unknown height for incorporating block {block_id}: {source}")]
    UnknownBlockHeight {
        block_id: Identifier,
        source: anyhow::Error,
    },

    /// An approval collector rejected an approval.
    #[error("collector for block {block_id} rejected approval: {source}")]
    Collector {
        block_id: Identifier,
        source: ApprovalCollectorError,
    },
}

impl CollectorError {
    /// Bad input from the outside - reported, but the engine state is unchanged
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::ResultMismatch { .. }
                | Self::ChunkAssignment { .. }
                | Self::AuthorizedVerifiers { .. }
                | Self::ApproversUnknown { .. }
                | Self::UnauthorizedApprover { .. }
                | Self::InvalidSignature { .. }
                | Self::SignatureVerification { .. }
        )
    }

    /// Local indexes are inconsistent and processing cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownBlockHeight { .. })
    }
}
