//! Definition of sealing node messages

use crate::types::*;
use crate::Identifier;

// Caryatid core messages
use caryatid_module_clock::messages::ClockTickMessage;

/// Block header message - a block the node now knows about
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockHeaderMessage {
    /// Block info
    pub block: BlockInfo,
}

/// Verifier identities authorized for an epoch
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct EpochVerifiersMessage {
    /// Epoch number
    pub epoch: Epoch,

    /// Verifier nodes
    pub verifiers: Vec<Identity>,
}

/// An execution result incorporated into a block
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct IncorporatedResultMessage {
    /// The incorporating block
    pub block: BlockInfo,

    /// Result as incorporated in that block
    pub incorporated_result: IncorporatedResult,
}

/// A signed chunk approval received from a verifier
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApprovalMessage {
    pub approval: ResultApproval,
}

/// A block has been finalized
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockFinalizedMessage {
    /// Finalized block ID
    pub block_id: Identifier,

    /// Its height
    pub height: u64,
}

/// Request for missing approvals, addressed to specific verifiers
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApprovalRequestMessage {
    pub request: ApprovalRequest,

    /// Verifier nodes expected to answer
    pub recipients: Vec<Identifier>,
}

/// A result which has gathered enough approvals to be sealed
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct SealCandidateMessage {
    pub candidate: SealCandidate,
}

/// Sealing messages
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum SealingMessage {
    BlockHeader(BlockHeaderMessage),               // Block known to the node
    EpochVerifiers(EpochVerifiersMessage),         // Verifier set for an epoch
    IncorporatedResult(IncorporatedResultMessage), // Result incorporated in a block
    Approval(ApprovalMessage),                     // Chunk approval from a verifier
    BlockFinalized(BlockFinalizedMessage),         // Block finalized
    ApprovalRequest(ApprovalRequestMessage),       // Outgoing request for approvals
    SealCandidate(SealCandidateMessage),           // Result ready to seal
}

// === Global message enum ===
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Message {
    None(()), // Just so we have a simple default

    // Caryatid standard messages
    Clock(ClockTickMessage), // Clock tick

    // Sealing messages
    Sealing(SealingMessage),
}

impl Default for Message {
    fn default() -> Self {
        Self::None(())
    }
}

// Casts from specific messages
impl From<ClockTickMessage> for Message {
    fn from(msg: ClockTickMessage) -> Self {
        Message::Clock(msg)
    }
}

impl From<SealingMessage> for Message {
    fn from(msg: SealingMessage) -> Self {
        Message::Sealing(msg)
    }
}
