//! Fixtures for sealing node tests: identifiers, results, blocks and
//! verifiers able to sign approvals

use sealing_common::{
    hash_of, ApprovalBody, BlockInfo, Chunk, ChunkIndex, Epoch, ExecutionResult, Identifier,
    Identity, KeyPair, ResultApproval,
};

/// Identifier with every byte set to `n`
pub fn identifier(n: u8) -> Identifier {
    Identifier::new([n; 32])
}

/// Execution result for candidate block `identifier(seed)` with `chunks` chunks
pub fn execution_result(seed: u8, chunks: u64) -> ExecutionResult {
    ExecutionResult {
        previous_result_id: hash_of(&[seed]),
        block_id: identifier(seed),
        chunks: (0..chunks)
            .map(|index| Chunk {
                index,
                start_state: hash_of(&[seed, index as u8, 0]),
                end_state: hash_of(&[seed, index as u8, 1]),
            })
            .collect(),
    }
}

/// Block `identifier(id)` at a height and epoch; its parent is `identifier(id - 1)`
pub fn block_info(id: u8, height: u64, epoch: Epoch) -> BlockInfo {
    BlockInfo {
        id: identifier(id),
        parent_id: identifier(id.wrapping_sub(1)),
        height,
        epoch,
    }
}

/// A verifier node with a staking key derived from `n`
#[derive(Debug, Clone)]
pub struct TestVerifier {
    keys: KeyPair,
    node_id: Identifier,
}

impl TestVerifier {
    pub fn new(n: u8) -> Self {
        let keys = KeyPair::from_seed(&[n; 32]);
        let node_id = hash_of(keys.public_key().as_ref());
        Self { keys, node_id }
    }

    pub fn node_id(&self) -> Identifier {
        self.node_id
    }

    pub fn identity(&self) -> Identity {
        Identity {
            node_id: self.node_id,
            staking_key: self.keys.public_key(),
            weight: 100,
        }
    }

    /// Signed approval of a chunk of `result`
    pub fn approve(&self, result: &ExecutionResult, chunk_index: ChunkIndex) -> ResultApproval {
        let body = ApprovalBody {
            block_id: result.block_id,
            execution_result_id: result.id(),
            chunk_index,
            approver_id: self.node_id,
        };
        let verifier_signature = self.keys.sign(body.id());
        ResultApproval {
            body,
            verifier_signature,
        }
    }
}
