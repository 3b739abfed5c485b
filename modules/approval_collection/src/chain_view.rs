//! In-memory view of the blocks and verifier sets the node has seen
use crate::collaborators::{HeightLookup, VerifierLookup};
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use sealing_common::{AuthorizedApprovers, BlockInfo, Epoch, Identifier, Identity};

/// Chain view, fed from bus messages and shared by the engine's collaborators
// TODO prune blocks below the finalized height once sealed results are retired
// from the registry - the request sweep still looks up canonical blocks
#[derive(Debug, Default)]
pub struct ChainView {
    blocks: DashMap<Identifier, BlockInfo>,
    verifiers: DashMap<Epoch, Vec<Identity>>,
}

impl ChainView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_block(&self, block: BlockInfo) {
        self.blocks.insert(block.id, block);
    }

    /// Record the verifier set of an epoch, replacing any previous one
    pub fn record_epoch_verifiers(&self, epoch: Epoch, verifiers: Vec<Identity>) {
        self.verifiers.insert(epoch, verifiers);
    }
}

impl HeightLookup for ChainView {
    fn block_height(&self, block_id: &Identifier) -> Result<u64> {
        self.blocks
            .get(block_id)
            .map(|block| block.height)
            .ok_or_else(|| anyhow!("Block {block_id} not found"))
    }
}

impl VerifierLookup for ChainView {
    fn authorized_verifiers_at_block(&self, block_id: &Identifier) -> Result<AuthorizedApprovers> {
        let epoch = self
            .blocks
            .get(block_id)
            .map(|block| block.epoch)
            .ok_or_else(|| anyhow!("Block {block_id} not found"))?;
        let verifiers = self
            .verifiers
            .get(&epoch)
            .ok_or_else(|| anyhow!("Verifiers for epoch {epoch} not found"))?;
        Ok(verifiers.iter().map(|identity| (identity.node_id, identity.clone())).collect())
    }
}
