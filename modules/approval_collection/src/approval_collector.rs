//! Per-fork accumulation of chunk approvals.
//!
//! The assignment collector keeps one [`ApprovalCollector`] per incorporating
//! block and treats it as a black box. [`ChunkApprovalCollector`] is the
//! default: it counts approvals per chunk and reports a [`SealCandidate`] once
//! every chunk has enough of them.

use async_trait::async_trait;
use sealing_common::{
    AggregatedChunkApprovals, ChunkAssignment, ChunkIndex, Identifier, IncorporatedResult,
    ResultApproval, SealCandidate, Signature,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Errors returned by approval collectors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalCollectorError {
    /// The approval is for another execution result.
    #[error("approval for result {got}, collector tracks {expected}")]
    WrongResult { expected: Identifier, got: Identifier },

    /// The chunk index is outside the result.
    #[error("chunk {chunk_index} out of range, result has {chunk_count} chunks")]
    UnknownChunk {
        chunk_index: ChunkIndex,
        chunk_count: u64,
    },

    /// The approver is not assigned to the chunk.
    #[error("verifier {approver_id} is not assigned to chunk {chunk_index}")]
    NotAssigned {
        approver_id: Identifier,
        chunk_index: ChunkIndex,
    },
}

/// Accumulator of approvals for one incorporated result.
/// Implementations must be idempotent: the same approval may be delivered more
/// than once, by fan-out and by cache replay.
#[async_trait]
pub trait ApprovalCollector: Send + Sync {
    /// The block this collector's result is incorporated in
    fn incorporated_block_id(&self) -> Identifier;

    /// Take a validated approval into account
    async fn process_approval(&self, approval: &ResultApproval) -> Result<(), ApprovalCollectorError>;

    /// Chunks still short of approvals, with the assigned verifiers who have not approved
    async fn collect_missing_verifiers(&self) -> BTreeMap<ChunkIndex, Vec<Identifier>>;
}

/// Creates an approval collector per incorporated result
pub trait ApprovalCollectorFactory: Send + Sync {
    fn new_collector(
        &self,
        incorporated_result: &IncorporatedResult,
        assignment: Arc<ChunkAssignment>,
    ) -> Arc<dyn ApprovalCollector>;
}

/// Receiver for seal candidates
/// Note this is called with no internal lock held, but must not block - use a
/// channel to hand off any async work
pub trait SealObserver: Send + Sync {
    fn seal_candidate(&self, candidate: SealCandidate);
}

/// Approvals gathered so far
#[derive(Default)]
struct Approvals {
    by_chunk: BTreeMap<ChunkIndex, BTreeMap<Identifier, Signature>>,
    sealed: bool,
}

/// Default collector counting approvals per chunk
pub struct ChunkApprovalCollector {
    incorporated_result: IncorporatedResult,
    result_id: Identifier,
    assignment: Arc<ChunkAssignment>,
    required_approvals: usize,
    observer: Arc<dyn SealObserver>,
    approvals: Mutex<Approvals>,
}

impl ChunkApprovalCollector {
    pub fn new(
        incorporated_result: IncorporatedResult,
        assignment: Arc<ChunkAssignment>,
        required_approvals: usize,
        observer: Arc<dyn SealObserver>,
    ) -> Self {
        let result_id = incorporated_result.result_id();
        Self {
            incorporated_result,
            result_id,
            assignment,
            required_approvals: required_approvals.max(1),
            observer,
            approvals: Mutex::new(Approvals::default()),
        }
    }

    /// Approvals a chunk needs - never more than it has verifiers for, and at
    /// least one, so a chunk nobody is assigned to can never complete
    fn threshold(&self, chunk_index: ChunkIndex) -> usize {
        let assigned = self.assignment.verifiers(chunk_index).map(|v| v.len()).unwrap_or(0);
        self.required_approvals.min(assigned).max(1)
    }

    fn chunk_count(&self) -> u64 {
        self.incorporated_result.result.chunk_count()
    }

    fn is_complete(&self, approvals: &Approvals) -> bool {
        (0..self.chunk_count()).all(|chunk_index| {
            let have = approvals.by_chunk.get(&chunk_index).map(|a| a.len()).unwrap_or(0);
            have >= self.threshold(chunk_index)
        })
    }

    fn seal_candidate(&self, approvals: &Approvals) -> SealCandidate {
        SealCandidate {
            incorporated_result: self.incorporated_result.clone(),
            aggregated_approvals: approvals
                .by_chunk
                .iter()
                .map(|(chunk_index, signatures)| AggregatedChunkApprovals {
                    chunk_index: *chunk_index,
                    verifier_ids: signatures.keys().copied().collect(),
                    signatures: signatures.values().copied().collect(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ApprovalCollector for ChunkApprovalCollector {
    fn incorporated_block_id(&self) -> Identifier {
        self.incorporated_result.incorporated_block_id
    }

    async fn process_approval(&self, approval: &ResultApproval) -> Result<(), ApprovalCollectorError> {
        let got = approval.result_id();
        if got != self.result_id {
            return Err(ApprovalCollectorError::WrongResult {
                expected: self.result_id,
                got,
            });
        }

        let chunk_index = approval.chunk_index();
        let chunk_count = self.chunk_count();
        if chunk_index >= chunk_count {
            return Err(ApprovalCollectorError::UnknownChunk {
                chunk_index,
                chunk_count,
            });
        }

        let approver_id = approval.approver_id();
        if !self.assignment.is_assigned(chunk_index, &approver_id) {
            return Err(ApprovalCollectorError::NotAssigned {
                approver_id,
                chunk_index,
            });
        }

        let candidate = {
            let mut approvals = self.approvals.lock().await;
            let chunk = approvals.by_chunk.entry(chunk_index).or_default();
            if chunk.contains_key(&approver_id) {
                return Ok(());
            }
            chunk.insert(approver_id, approval.verifier_signature);

            if approvals.sealed || !self.is_complete(&approvals) {
                return Ok(());
            }
            approvals.sealed = true;
            self.seal_candidate(&approvals)
        };

        info!(
            "Result {} incorporated in {} has enough approvals to seal",
            self.result_id,
            self.incorporated_block_id()
        );
        self.observer.seal_candidate(candidate);
        Ok(())
    }

    async fn collect_missing_verifiers(&self) -> BTreeMap<ChunkIndex, Vec<Identifier>> {
        let approvals = self.approvals.lock().await;
        let mut missing = BTreeMap::new();
        for chunk_index in 0..self.chunk_count() {
            let Some(assigned) = self.assignment.verifiers(chunk_index) else {
                continue;
            };
            let approved = approvals.by_chunk.get(&chunk_index);
            if approved.map(|a| a.len()).unwrap_or(0) >= self.threshold(chunk_index) {
                continue;
            }

            let verifiers: Vec<Identifier> = assigned
                .iter()
                .filter(|verifier| !approved.is_some_and(|a| a.contains_key(*verifier)))
                .copied()
                .collect();
            if !verifiers.is_empty() {
                missing.insert(chunk_index, verifiers);
            }
        }
        debug!(
            "Block {}: {} chunks missing approvals",
            self.incorporated_block_id(),
            missing.len()
        );
        missing
    }
}

/// Factory for [`ChunkApprovalCollector`]s sharing one seal observer
pub struct ChunkApprovalCollectorFactory {
    required_approvals: usize,
    observer: Arc<dyn SealObserver>,
}

impl ChunkApprovalCollectorFactory {
    pub fn new(required_approvals: usize, observer: Arc<dyn SealObserver>) -> Self {
        Self {
            required_approvals,
            observer,
        }
    }
}

impl ApprovalCollectorFactory for ChunkApprovalCollectorFactory {
    fn new_collector(
        &self,
        incorporated_result: &IncorporatedResult,
        assignment: Arc<ChunkAssignment>,
    ) -> Arc<dyn ApprovalCollector> {
        Arc::new(ChunkApprovalCollector::new(
            incorporated_result.clone(),
            assignment,
            self.required_approvals,
            self.observer.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealing_test_utils::{execution_result, identifier, TestVerifier};

    #[derive(Default)]
    struct RecordingObserver {
        candidates: std::sync::Mutex<Vec<SealCandidate>>,
    }

    impl SealObserver for RecordingObserver {
        fn seal_candidate(&self, candidate: SealCandidate) {
            self.candidates.lock().unwrap().push(candidate);
        }
    }

    struct Fixture {
        collector: ChunkApprovalCollector,
        observer: Arc<RecordingObserver>,
        incorporated: IncorporatedResult,
        verifiers: Vec<TestVerifier>,
    }

    // Two chunks: chunk 0 assigned to verifiers 0 and 1, chunk 1 to verifier 2
    fn fixture(required_approvals: usize) -> Fixture {
        let verifiers: Vec<TestVerifier> = (1..=3).map(TestVerifier::new).collect();
        let incorporated = IncorporatedResult::new(identifier(50), execution_result(40, 2));

        let mut assignment = ChunkAssignment::new();
        assignment.add(0, [verifiers[0].node_id(), verifiers[1].node_id()]);
        assignment.add(1, [verifiers[2].node_id()]);

        let observer = Arc::new(RecordingObserver::default());
        let collector = ChunkApprovalCollector::new(
            incorporated.clone(),
            Arc::new(assignment),
            required_approvals,
            observer.clone(),
        );
        Fixture {
            collector,
            observer,
            incorporated,
            verifiers,
        }
    }

    #[tokio::test]
    async fn rejects_approval_for_other_result() {
        let f = fixture(1);
        let other = execution_result(41, 2);
        let approval = f.verifiers[0].approve(&other, 0);
        assert!(matches!(
            f.collector.process_approval(&approval).await,
            Err(ApprovalCollectorError::WrongResult { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_chunk() {
        let f = fixture(1);
        let approval = f.verifiers[0].approve(&f.incorporated.result, 2);
        assert_eq!(
            f.collector.process_approval(&approval).await,
            Err(ApprovalCollectorError::UnknownChunk {
                chunk_index: 2,
                chunk_count: 2
            })
        );
    }

    #[tokio::test]
    async fn rejects_unassigned_verifier() {
        let f = fixture(1);
        let approval = f.verifiers[2].approve(&f.incorporated.result, 0);
        assert!(matches!(
            f.collector.process_approval(&approval).await,
            Err(ApprovalCollectorError::NotAssigned { chunk_index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn emits_one_seal_candidate_when_every_chunk_is_approved() {
        let f = fixture(1);
        let result = &f.incorporated.result;

        f.collector.process_approval(&f.verifiers[0].approve(result, 0)).await.unwrap();
        assert!(f.observer.candidates.lock().unwrap().is_empty());

        f.collector.process_approval(&f.verifiers[2].approve(result, 1)).await.unwrap();
        f.collector.process_approval(&f.verifiers[1].approve(result, 0)).await.unwrap();
        f.collector.process_approval(&f.verifiers[2].approve(result, 1)).await.unwrap();

        let candidates = f.observer.candidates.lock().unwrap();
        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.incorporated_result, f.incorporated);
        assert_eq!(candidate.aggregated_approvals.len(), 2);
        assert_eq!(candidate.aggregated_approvals[0].verifier_ids, vec![f.verifiers[0].node_id()]);
        assert_eq!(candidate.aggregated_approvals[1].verifier_ids, vec![f.verifiers[2].node_id()]);
    }

    #[tokio::test]
    async fn required_approvals_is_capped_by_assigned_verifiers() {
        let f = fixture(5);
        let result = &f.incorporated.result;

        f.collector.process_approval(&f.verifiers[0].approve(result, 0)).await.unwrap();
        f.collector.process_approval(&f.verifiers[2].approve(result, 1)).await.unwrap();
        assert!(f.observer.candidates.lock().unwrap().is_empty());

        f.collector.process_approval(&f.verifiers[1].approve(result, 0)).await.unwrap();
        assert_eq!(f.observer.candidates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chunk_without_assigned_verifiers_blocks_sealing() {
        let verifier = TestVerifier::new(1);
        let incorporated = IncorporatedResult::new(identifier(50), execution_result(40, 2));
        let mut assignment = ChunkAssignment::new();
        assignment.add(0, [verifier.node_id()]);
        assignment.add(1, []);

        let observer = Arc::new(RecordingObserver::default());
        let collector =
            ChunkApprovalCollector::new(incorporated.clone(), Arc::new(assignment), 1, observer.clone());

        collector.process_approval(&verifier.approve(&incorporated.result, 0)).await.unwrap();

        assert!(observer.candidates.lock().unwrap().is_empty());
        assert!(collector.collect_missing_verifiers().await.is_empty());
    }

    #[tokio::test]
    async fn missing_verifiers_shrink_as_approvals_arrive() {
        let f = fixture(2);
        let result = &f.incorporated.result;

        let missing = f.collector.collect_missing_verifiers().await;
        let mut chunk0 = vec![f.verifiers[0].node_id(), f.verifiers[1].node_id()];
        chunk0.sort();
        assert_eq!(missing.get(&0), Some(&chunk0));
        assert_eq!(missing.get(&1), Some(&vec![f.verifiers[2].node_id()]));

        f.collector.process_approval(&f.verifiers[0].approve(result, 0)).await.unwrap();
        f.collector.process_approval(&f.verifiers[2].approve(result, 1)).await.unwrap();

        let missing = f.collector.collect_missing_verifiers().await;
        assert_eq!(missing.len(), 1);
        assert_eq!(missing.get(&0), Some(&vec![f.verifiers[1].node_id()]));
    }

    #[tokio::test]
    async fn factory_builds_collector_for_incorporating_block() {
        let observer = Arc::new(RecordingObserver::default());
        let factory = ChunkApprovalCollectorFactory::new(1, observer);
        let incorporated = IncorporatedResult::new(identifier(77), execution_result(40, 1));
        let collector = factory.new_collector(&incorporated, Arc::new(ChunkAssignment::new()));
        assert_eq!(collector.incorporated_block_id(), identifier(77));
    }
}
