//! Default chunk assignment.
//!
//! The verifiers authorized at the incorporating block are shuffled with a
//! seed derived from the result and the block, then handed out `alpha` at a
//! time round the permutation. Anyone with the same chain state computes the
//! same assignment.
use crate::collaborators::{Assigner, VerifierLookup};
use anyhow::{bail, Result};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use sealing_common::{hash_of_parts, ChunkAssignment, ExecutionResult, Identifier};
use std::sync::Arc;
use tracing::debug;

/// Public, deterministic assigner
pub struct PublicChunkAssigner {
    verifiers: Arc<dyn VerifierLookup>,
    alpha: usize,
}

impl PublicChunkAssigner {
    pub fn new(verifiers: Arc<dyn VerifierLookup>, alpha: usize) -> Self {
        Self {
            verifiers,
            alpha: alpha.max(1),
        }
    }
}

impl Assigner for PublicChunkAssigner {
    fn assign(
        &self,
        result: &ExecutionResult,
        incorporating_block_id: &Identifier,
    ) -> Result<ChunkAssignment> {
        let authorized = self.verifiers.authorized_verifiers_at_block(incorporating_block_id)?;
        if authorized.is_empty() {
            bail!("No verifiers authorized at block {incorporating_block_id}");
        }

        let mut verifiers: Vec<Identifier> = authorized.into_keys().collect();
        verifiers.sort_unstable();

        let result_id = result.id();
        let seed = hash_of_parts(&[result_id.as_ref(), incorporating_block_id.as_ref()]);
        let mut rng = StdRng::from_seed(seed.into_inner());
        verifiers.shuffle(&mut rng);

        let count = verifiers.len();
        let alpha = self.alpha.min(count);
        let mut assignment = ChunkAssignment::new();
        for chunk_index in 0..result.chunk_count() {
            let start = (chunk_index as usize).wrapping_mul(alpha) % count;
            assignment.add(chunk_index, (0..alpha).map(|offset| verifiers[(start + offset) % count]));
        }

        debug!(
            "Assigned {} chunks of result {result_id} to {count} verifiers, {alpha} each",
            assignment.len()
        );
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_view::ChainView;
    use sealing_test_utils::{block_info, execution_result, identifier, TestVerifier};

    fn view(verifier_count: u8) -> Arc<ChainView> {
        let view = ChainView::new();
        view.record_block(block_info(1, 10, 0));
        view.record_block(block_info(2, 10, 0));
        view.record_block(block_info(3, 10, 1));
        view.record_epoch_verifiers(
            0,
            (1..=verifier_count).map(|n| TestVerifier::new(n).identity()).collect(),
        );
        view.record_epoch_verifiers(1, vec![]);
        Arc::new(view)
    }

    #[test]
    fn assignment_is_deterministic() {
        let assigner = PublicChunkAssigner::new(view(5), 2);
        let result = execution_result(9, 4);

        let first = assigner.assign(&result, &identifier(1)).unwrap();
        let second = assigner.assign(&result, &identifier(1)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn every_chunk_gets_alpha_distinct_verifiers() {
        let assigner = PublicChunkAssigner::new(view(5), 3);
        let assignment = assigner.assign(&execution_result(9, 7), &identifier(1)).unwrap();

        assert_eq!(assignment.len(), 7);
        for chunk_index in 0..7 {
            assert_eq!(assignment.verifiers(chunk_index).map(|v| v.len()), Some(3));
        }
    }

    #[test]
    fn alpha_is_capped_at_verifier_count() {
        let assigner = PublicChunkAssigner::new(view(2), 3);
        let assignment = assigner.assign(&execution_result(9, 2), &identifier(1)).unwrap();
        assert_eq!(assignment.verifiers(0).map(|v| v.len()), Some(2));
    }

    #[test]
    fn no_verifiers_is_an_error() {
        let assigner = PublicChunkAssigner::new(view(2), 3);
        assert!(assigner.assign(&execution_result(9, 2), &identifier(3)).is_err());
        assert!(assigner.assign(&execution_result(9, 2), &identifier(4)).is_err());
    }
}
