//! Core type definitions for the sealing node

use crate::crypto::{PublicKey, Signature};
use crate::hash::{hash_of, Identifier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Index of a chunk within an execution result
pub type ChunkIndex = u64;

/// Epoch number
pub type Epoch = u64;

/// Block info, shared across multiple messages
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block ID
    pub id: Identifier,

    /// Parent block ID
    pub parent_id: Identifier,

    /// Block height
    pub height: u64,

    /// Epoch the block belongs to
    pub epoch: Epoch,
}

/// Identity of a staked node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Node ID
    pub node_id: Identifier,

    /// Staking key, used to sign approvals
    pub staking_key: PublicKey,

    /// Stake weight
    pub weight: u64,
}

/// Verifiers authorized to approve results for a sealing candidate, by node ID
pub type AuthorizedApprovers = HashMap<Identifier, Identity>;

/// A sub-unit of an execution result, approved independently
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position within the result
    pub index: ChunkIndex,

    /// Commitment to the state before the chunk
    pub start_state: Identifier,

    /// Commitment to the state after the chunk
    pub end_state: Identifier,
}

/// A block's claimed execution outcome, partitioned into chunks
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Result this one builds on
    pub previous_result_id: Identifier,

    /// Executed block, i.e. the sealing candidate
    pub block_id: Identifier,

    /// Chunks, in index order
    pub chunks: Vec<Chunk>,
}

impl ExecutionResult {
    /// Result ID, the hash of the canonical encoding
    pub fn id(&self) -> Identifier {
        let mut data = Vec::with_capacity(64 + self.chunks.len() * 72);
        data.extend_from_slice(self.previous_result_id.as_ref());
        data.extend_from_slice(self.block_id.as_ref());
        for chunk in &self.chunks {
            data.extend_from_slice(&chunk.index.to_be_bytes());
            data.extend_from_slice(chunk.start_state.as_ref());
            data.extend_from_slice(chunk.end_state.as_ref());
        }
        hash_of(&data)
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunks.len() as u64
    }
}

/// An execution result as it appears in a specific block of a specific fork
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncorporatedResult {
    /// Block which incorporates the result
    pub incorporated_block_id: Identifier,

    /// The result itself
    pub result: ExecutionResult,
}

impl IncorporatedResult {
    pub fn new(incorporated_block_id: Identifier, result: ExecutionResult) -> Self {
        Self {
            incorporated_block_id,
            result,
        }
    }

    pub fn result_id(&self) -> Identifier {
        self.result.id()
    }
}

/// The signed part of a result approval
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalBody {
    /// Sealing candidate block
    pub block_id: Identifier,

    /// Approved result
    pub execution_result_id: Identifier,

    /// Approved chunk
    pub chunk_index: ChunkIndex,

    /// Verifier node which checked the chunk
    pub approver_id: Identifier,
}

impl ApprovalBody {
    /// Body ID - this is the message the verifier signs
    pub fn id(&self) -> Identifier {
        let mut data = Vec::with_capacity(104);
        data.extend_from_slice(self.block_id.as_ref());
        data.extend_from_slice(self.execution_result_id.as_ref());
        data.extend_from_slice(&self.chunk_index.to_be_bytes());
        data.extend_from_slice(self.approver_id.as_ref());
        hash_of(&data)
    }
}

/// A verifier's signed statement that a chunk of a result is correct
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultApproval {
    pub body: ApprovalBody,

    /// Signature over the body ID with the approver's staking key
    pub verifier_signature: Signature,
}

impl ResultApproval {
    /// Approval ID, covering both the body and its signature
    pub fn id(&self) -> Identifier {
        let mut data = Vec::with_capacity(96);
        data.extend_from_slice(self.body.id().as_ref());
        data.extend_from_slice(self.verifier_signature.as_ref());
        hash_of(&data)
    }

    pub fn result_id(&self) -> Identifier {
        self.body.execution_result_id
    }

    pub fn approver_id(&self) -> Identifier {
        self.body.approver_id
    }

    pub fn chunk_index(&self) -> ChunkIndex {
        self.body.chunk_index
    }
}

/// Request to verifiers for a missing chunk approval
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Random nonce, so repeated requests are distinct messages
    pub nonce: u64,

    pub result_id: Identifier,

    pub chunk_index: ChunkIndex,
}

/// Verifiers responsible for approving each chunk of a result
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAssignment {
    verifiers: BTreeMap<ChunkIndex, BTreeSet<Identifier>>,
}

impl ChunkAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign verifiers to a chunk, in addition to any already assigned
    pub fn add<I>(&mut self, chunk_index: ChunkIndex, verifiers: I)
    where
        I: IntoIterator<Item = Identifier>,
    {
        self.verifiers.entry(chunk_index).or_default().extend(verifiers);
    }

    /// Verifiers assigned to a chunk, if any
    pub fn verifiers(&self, chunk_index: ChunkIndex) -> Option<&BTreeSet<Identifier>> {
        self.verifiers.get(&chunk_index)
    }

    pub fn is_assigned(&self, chunk_index: ChunkIndex, verifier: &Identifier) -> bool {
        self.verifiers.get(&chunk_index).is_some_and(|v| v.contains(verifier))
    }

    /// Number of chunks with an assignment
    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

/// Approvals gathered for one chunk of a seal candidate
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedChunkApprovals {
    pub chunk_index: ChunkIndex,

    pub verifier_ids: Vec<Identifier>,

    pub signatures: Vec<Signature>,
}

/// An incorporated result with enough approvals to construct a seal
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealCandidate {
    pub incorporated_result: IncorporatedResult,

    /// Per-chunk approvals, in chunk order
    pub aggregated_approvals: Vec<AggregatedChunkApprovals>,
}
