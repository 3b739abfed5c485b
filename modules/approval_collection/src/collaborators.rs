//! Collaborators consumed by the assignment collector.
//! Each is a trait object so that tests and other deployments can substitute them.
use crate::approval_collector::ApprovalCollectorFactory;
use anyhow::Result;
use async_trait::async_trait;
use sealing_common::{
    ApprovalRequest, AuthorizedApprovers, ChunkAssignment, ExecutionResult, Identifier, PublicKey,
    Signature,
};
use std::sync::Arc;

/// Computes which verifiers check which chunks
pub trait Assigner: Send + Sync {
    /// Assignment for a result, using the chain state at the incorporating block
    fn assign(
        &self,
        result: &ExecutionResult,
        incorporating_block_id: &Identifier,
    ) -> Result<ChunkAssignment>;
}

/// Resolves block heights
pub trait HeightLookup: Send + Sync {
    fn block_height(&self, block_id: &Identifier) -> Result<u64>;
}

/// Resolves the verifiers authorized to approve results at a block
pub trait VerifierLookup: Send + Sync {
    fn authorized_verifiers_at_block(&self, block_id: &Identifier) -> Result<AuthorizedApprovers>;
}

/// Verifies approval signatures
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &Signature, key: &PublicKey) -> Result<bool>;
}

/// Sends approval requests out to verifiers
#[async_trait]
pub trait RequestConduit: Send + Sync {
    async fn publish(&self, request: &ApprovalRequest, recipients: &[Identifier]) -> Result<()>;
}

/// Bundle of collaborators shared by every assignment collector
#[derive(Clone)]
pub struct Collaborators {
    pub assigner: Arc<dyn Assigner>,
    pub heights: Arc<dyn HeightLookup>,
    pub verifiers: Arc<dyn VerifierLookup>,
    pub signature_verifier: Arc<dyn SignatureVerifier>,
    pub collector_factory: Arc<dyn ApprovalCollectorFactory>,
    pub conduit: Arc<dyn RequestConduit>,
}
