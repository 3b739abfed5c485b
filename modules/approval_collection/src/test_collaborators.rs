//! Mock collaborators counting their calls, for engine tests
use crate::approval_collector::{ApprovalCollector, ApprovalCollectorError, ApprovalCollectorFactory};
use crate::collaborators::{
    Assigner, Collaborators, HeightLookup, RequestConduit, SignatureVerifier, VerifierLookup,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sealing_common::{
    ApprovalRequest, AuthorizedApprovers, ChunkAssignment, ChunkIndex, ExecutionResult,
    Identifier, IncorporatedResult, PublicKey, ResultApproval, Signature,
};
use sealing_test_utils::TestVerifier;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Assigns every chunk to every verifier
pub struct MockAssigner {
    verifiers: Vec<Identifier>,
    chunk_count: u64,
    calls: Mutex<Vec<Identifier>>,
    failing: AtomicBool,
}

impl MockAssigner {
    pub fn calls(&self) -> Vec<Identifier> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl Assigner for MockAssigner {
    fn assign(
        &self,
        _result: &ExecutionResult,
        incorporating_block_id: &Identifier,
    ) -> Result<ChunkAssignment> {
        self.calls.lock().unwrap().push(*incorporating_block_id);
        if self.failing.load(Ordering::SeqCst) {
            bail!("assigner failure");
        }
        let mut assignment = ChunkAssignment::new();
        for chunk_index in 0..self.chunk_count {
            assignment.add(chunk_index, self.verifiers.iter().copied());
        }
        Ok(assignment)
    }
}

#[derive(Default)]
pub struct MockHeights {
    heights: Mutex<HashMap<Identifier, u64>>,
}

impl MockHeights {
    pub fn set(&self, block_id: Identifier, height: u64) {
        self.heights.lock().unwrap().insert(block_id, height);
    }

    pub fn forget(&self, block_id: &Identifier) {
        self.heights.lock().unwrap().remove(block_id);
    }
}

impl HeightLookup for MockHeights {
    fn block_height(&self, block_id: &Identifier) -> Result<u64> {
        self.heights
            .lock()
            .unwrap()
            .get(block_id)
            .copied()
            .ok_or_else(|| anyhow!("block {block_id} not found"))
    }
}

pub struct MockVerifierLookup {
    approvers: AuthorizedApprovers,
    calls: Mutex<Vec<Identifier>>,
    failing: AtomicBool,
}

impl MockVerifierLookup {
    pub fn calls(&self) -> Vec<Identifier> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl VerifierLookup for MockVerifierLookup {
    fn authorized_verifiers_at_block(&self, block_id: &Identifier) -> Result<AuthorizedApprovers> {
        self.calls.lock().unwrap().push(*block_id);
        if self.failing.load(Ordering::SeqCst) {
            bail!("verifier lookup failure");
        }
        Ok(self.approvers.clone())
    }
}

/// Real ed25519 verification, counted
#[derive(Default)]
pub struct CountingSignatureVerifier {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingSignatureVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl SignatureVerifier for CountingSignatureVerifier {
    fn verify(&self, message: &[u8], signature: &Signature, key: &PublicKey) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("signature verifier failure");
        }
        Ok(key.verify(message, signature))
    }
}

/// Collector recording the approvals it receives
pub struct MockCollector {
    pub block_id: Identifier,
    pub assignment: Arc<ChunkAssignment>,
    received: Mutex<Vec<Identifier>>,
    rejecting: AtomicBool,
    missing: Mutex<BTreeMap<ChunkIndex, Vec<Identifier>>>,
}

impl MockCollector {
    /// IDs of distinct approvals received, in order
    pub fn received(&self) -> Vec<Identifier> {
        self.received.lock().unwrap().clone()
    }

    pub fn reject(&self) {
        self.rejecting.store(true, Ordering::SeqCst);
    }

    pub fn set_missing(&self, missing: Vec<(ChunkIndex, Vec<Identifier>)>) {
        *self.missing.lock().unwrap() = missing.into_iter().collect();
    }
}

#[async_trait]
impl ApprovalCollector for MockCollector {
    fn incorporated_block_id(&self) -> Identifier {
        self.block_id
    }

    async fn process_approval(&self, approval: &ResultApproval) -> Result<(), ApprovalCollectorError> {
        let id = approval.id();
        {
            let mut received = self.received.lock().unwrap();
            if !received.contains(&id) {
                received.push(id);
            }
        }
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(ApprovalCollectorError::NotAssigned {
                approver_id: approval.approver_id(),
                chunk_index: approval.chunk_index(),
            });
        }
        Ok(())
    }

    async fn collect_missing_verifiers(&self) -> BTreeMap<ChunkIndex, Vec<Identifier>> {
        self.missing.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct MockCollectorFactory {
    collectors: Mutex<Vec<Arc<MockCollector>>>,
}

impl MockCollectorFactory {
    pub fn created(&self) -> usize {
        self.collectors.lock().unwrap().len()
    }

    /// Collectors in creation order
    pub fn collectors(&self) -> Vec<Arc<MockCollector>> {
        self.collectors.lock().unwrap().clone()
    }

    pub fn collector_for(&self, block_id: &Identifier) -> Option<Arc<MockCollector>> {
        self.collectors().into_iter().find(|collector| collector.block_id == *block_id)
    }
}

impl ApprovalCollectorFactory for MockCollectorFactory {
    fn new_collector(
        &self,
        incorporated_result: &IncorporatedResult,
        assignment: Arc<ChunkAssignment>,
    ) -> Arc<dyn ApprovalCollector> {
        let collector = Arc::new(MockCollector {
            block_id: incorporated_result.incorporated_block_id,
            assignment,
            received: Mutex::new(Vec::new()),
            rejecting: AtomicBool::new(false),
            missing: Mutex::new(BTreeMap::new()),
        });
        self.collectors.lock().unwrap().push(collector.clone());
        collector
    }
}

#[derive(Default)]
pub struct MockConduit {
    sent: Mutex<Vec<(ApprovalRequest, Vec<Identifier>)>>,
    failing: AtomicBool,
}

impl MockConduit {
    pub fn sent(&self) -> Vec<(ApprovalRequest, Vec<Identifier>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RequestConduit for MockConduit {
    async fn publish(&self, request: &ApprovalRequest, recipients: &[Identifier]) -> Result<()> {
        self.sent.lock().unwrap().push((request.clone(), recipients.to_vec()));
        if self.failing.load(Ordering::SeqCst) {
            bail!("conduit failure");
        }
        Ok(())
    }
}

/// The full set of mocks, kept so tests can inspect them
pub struct Mocks {
    pub assigner: Arc<MockAssigner>,
    pub heights: Arc<MockHeights>,
    pub verifier_lookup: Arc<MockVerifierLookup>,
    pub signatures: Arc<CountingSignatureVerifier>,
    pub factory: Arc<MockCollectorFactory>,
    pub conduit: Arc<MockConduit>,
}

impl Mocks {
    /// Mocks authorizing `verifiers`, each assigned to all `chunk_count` chunks
    pub fn new(verifiers: &[TestVerifier], chunk_count: u64) -> Self {
        Self {
            assigner: Arc::new(MockAssigner {
                verifiers: verifiers.iter().map(|v| v.node_id()).collect(),
                chunk_count,
                calls: Mutex::new(Vec::new()),
                failing: AtomicBool::new(false),
            }),
            heights: Arc::new(MockHeights::default()),
            verifier_lookup: Arc::new(MockVerifierLookup {
                approvers: verifiers.iter().map(|v| (v.node_id(), v.identity())).collect(),
                calls: Mutex::new(Vec::new()),
                failing: AtomicBool::new(false),
            }),
            signatures: Arc::new(CountingSignatureVerifier::default()),
            factory: Arc::new(MockCollectorFactory::default()),
            conduit: Arc::new(MockConduit::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            assigner: self.assigner.clone(),
            heights: self.heights.clone(),
            verifiers: self.verifier_lookup.clone(),
            signature_verifier: self.signatures.clone(),
            collector_factory: self.factory.clone(),
            conduit: self.conduit.clone(),
        }
    }
}
