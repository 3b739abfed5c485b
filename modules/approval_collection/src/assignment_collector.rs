//! Assignment collector - all approval state for one execution result.
//!
//! The same result can be incorporated in several competing blocks. Each
//! incorporating block gets its own [`ApprovalCollector`], while the chunk
//! assignment, the authorized approvers and the verified approvals are shared
//! across all of them. Approvals are validated once, cached, and fanned out to
//! every collector; collectors created later get the cache replayed into them.

use crate::approval_cache::ApprovalCache;
use crate::approval_collector::ApprovalCollector;
use crate::collaborators::Collaborators;
use crate::collector_error::CollectorError;
use crate::configuration::ApprovalCollectionConfig;
use crate::height_index::HeightIndex;
use crate::request_tracker::RequestTracker;
use sealing_common::{
    ApprovalRequest, AuthorizedApprovers, ChunkAssignment, Identifier, IncorporatedResult,
    ResultApproval,
};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

/// Request count from which repeated requests are worth a log line
const MANY_REQUESTS: u32 = 10;

/// Assignment and approvers, computed together from the first incorporation
#[derive(Debug)]
struct ResultSnapshot {
    assignment: Arc<ChunkAssignment>,
    authorized_approvers: Arc<AuthorizedApprovers>,
}

/// Collects approvals for one execution result across all its incorporating blocks
pub struct AssignmentCollector {
    result_id: Identifier,

    collaborators: Collaborators,

    /// Written once, under the collectors write lock
    snapshot: OnceLock<Arc<ResultSnapshot>>,

    /// Collectors by incorporating block
    collectors: RwLock<HashMap<Identifier, Arc<dyn ApprovalCollector>>>,

    /// Incorporating blocks by height.  If both this and `collectors` are
    /// held, `collectors` is taken first
    incorporated_at_height: Mutex<HeightIndex>,

    /// Approvals which passed validation, keyed by approval ID
    verified_approvals: Mutex<ApprovalCache>,

    request_tracker: Mutex<RequestTracker>,
}

impl AssignmentCollector {
    pub fn new(
        result_id: Identifier,
        collaborators: Collaborators,
        config: &ApprovalCollectionConfig,
    ) -> Self {
        Self {
            result_id,
            collaborators,
            snapshot: OnceLock::new(),
            collectors: RwLock::new(HashMap::new()),
            incorporated_at_height: Mutex::new(HeightIndex::new()),
            verified_approvals: Mutex::new(ApprovalCache::new(config.verified_approvals_cache_size)),
            request_tracker: Mutex::new(RequestTracker::new(
                config.request_blackout_min,
                config.request_blackout_max,
            )),
        }
    }

    pub fn result_id(&self) -> Identifier {
        self.result_id
    }

    /// Chunk assignment, once the first incorporated result has been processed
    pub fn assignment(&self) -> Option<Arc<ChunkAssignment>> {
        self.snapshot.get().map(|snapshot| snapshot.assignment.clone())
    }

    /// Authorized approvers, once the first incorporated result has been processed
    pub fn authorized_approvers(&self) -> Option<Arc<AuthorizedApprovers>> {
        self.snapshot.get().map(|snapshot| snapshot.authorized_approvers.clone())
    }

    pub async fn collector_count(&self) -> usize {
        self.collectors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.collectors.read().await.is_empty()
    }

    pub async fn collector_by_block_id(
        &self,
        block_id: &Identifier,
    ) -> Option<Arc<dyn ApprovalCollector>> {
        self.collectors.read().await.get(block_id).cloned()
    }

    pub async fn all_collectors(&self) -> Vec<Arc<dyn ApprovalCollector>> {
        self.collectors.read().await.values().cloned().collect()
    }

    /// Start collecting approvals for the result as incorporated in a new block.
    /// A block already being collected for is a no-op.
    pub async fn process_incorporated_result(
        &self,
        incorporated: &IncorporatedResult,
    ) -> Result<(), CollectorError> {
        let got = incorporated.result_id();
        if got != self.result_id {
            return Err(CollectorError::ResultMismatch {
                expected: self.result_id,
                got,
            });
        }

        let block_id = incorporated.incorporated_block_id;
        if self.collector_by_block_id(&block_id).await.is_some() {
            return Ok(());
        }

        let collector = {
            let mut collectors = self.collectors.write().await;
            if collectors.contains_key(&block_id) {
                return Ok(());
            }

            // Only the first incorporation computes the snapshot, later forks reuse it
            let (snapshot, computed) = match self.snapshot.get() {
                Some(snapshot) => (snapshot.clone(), false),
                None => (Arc::new(self.compute_snapshot(incorporated)?), true),
            };

            let height = self.collaborators.heights.block_height(&block_id).map_err(|source| {
                CollectorError::UnknownBlockHeight { block_id, source }
            })?;

            if computed && self.snapshot.set(snapshot.clone()).is_err() {
                warn!("Snapshot for result {} was already set", self.result_id);
            }

            let collector = self
                .collaborators
                .collector_factory
                .new_collector(incorporated, snapshot.assignment.clone());
            collectors.insert(block_id, collector.clone());
            self.incorporated_at_height.lock().await.insert(height, block_id);
            collector
        };

        debug!(
            "Collecting approvals for result {} incorporated in block {block_id}",
            self.result_id
        );

        self.replay_verified_approvals(collector.as_ref()).await;
        Ok(())
    }

    fn compute_snapshot(
        &self,
        incorporated: &IncorporatedResult,
    ) -> Result<ResultSnapshot, CollectorError> {
        let block_id = incorporated.incorporated_block_id;
        let assignment = self
            .collaborators
            .assigner
            .assign(&incorporated.result, &block_id)
            .map_err(|source| CollectorError::ChunkAssignment {
                result_id: self.result_id,
                block_id,
                source,
            })?;

        // Authorization is decided by the block being sealed, not the incorporating one
        let candidate_block_id = incorporated.result.block_id;
        let authorized_approvers = self
            .collaborators
            .verifiers
            .authorized_verifiers_at_block(&candidate_block_id)
            .map_err(|source| CollectorError::AuthorizedVerifiers {
                block_id: candidate_block_id,
                source,
            })?;

        Ok(ResultSnapshot {
            assignment: Arc::new(assignment),
            authorized_approvers: Arc::new(authorized_approvers),
        })
    }

    /// Feed every cached approval into a new collector
    async fn replay_verified_approvals(&self, collector: &dyn ApprovalCollector) {
        let approvals: Vec<ResultApproval> = {
            let cache = self.verified_approvals.lock().await;
            cache.ids().iter().filter_map(|id| cache.peek(id).cloned()).collect()
        };

        for approval in &approvals {
            if let Err(e) = collector.process_approval(approval).await {
                debug!(
                    "Replaying approval {} into block {}: {e}",
                    approval.id(),
                    collector.incorporated_block_id()
                );
            }
        }
    }

    /// Validate an approval (once per approval ID), cache it, and deliver it to
    /// every collector.  All collectors get it even if some fail; the first
    /// failure is returned.
    pub async fn process_approval(&self, approval: &ResultApproval) -> Result<(), CollectorError> {
        let got = approval.result_id();
        if got != self.result_id {
            return Err(CollectorError::ResultMismatch {
                expected: self.result_id,
                got,
            });
        }

        {
            let mut cache = self.verified_approvals.lock().await;
            if !cache.contains(&approval.id()) {
                self.validate_approval(approval)?;
                cache.put(approval.clone());
            }
        }

        let mut first_error = None;
        for collector in self.all_collectors().await {
            if let Err(source) = collector.process_approval(approval).await {
                let error = CollectorError::Collector {
                    block_id: collector.incorporated_block_id(),
                    source,
                };
                match first_error {
                    None => first_error = Some(error),
                    Some(_) => warn!("Approval {}: {error}", approval.id()),
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn validate_approval(&self, approval: &ResultApproval) -> Result<(), CollectorError> {
        let snapshot = self.snapshot.get().ok_or(CollectorError::ApproversUnknown {
            result_id: self.result_id,
        })?;

        let approver_id = approval.approver_id();
        let identity = snapshot.authorized_approvers.get(&approver_id).ok_or(
            CollectorError::UnauthorizedApprover {
                approver_id,
                result_id: self.result_id,
            },
        )?;

        let message = approval.body.id();
        let valid = self
            .collaborators
            .signature_verifier
            .verify(message.as_ref(), &approval.verifier_signature, &identity.staking_key)
            .map_err(|source| CollectorError::SignatureVerification {
                approver_id,
                source,
            })?;

        if !valid {
            return Err(CollectorError::InvalidSignature {
                approver_id,
                result_id: self.result_id,
                chunk_index: approval.chunk_index(),
            });
        }
        Ok(())
    }

    /// Drop collectors incorporated at `height` in any block other than the
    /// finalized one, returning the orphaned block IDs
    pub async fn on_block_finalized_at_height(
        &self,
        block_id: &Identifier,
        height: u64,
    ) -> Vec<Identifier> {
        let orphans: Vec<Identifier> = self
            .incorporated_at_height
            .lock()
            .await
            .take(height)
            .into_iter()
            .filter(|incorporated_block_id| incorporated_block_id != block_id)
            .collect();
        if orphans.is_empty() {
            return orphans;
        }

        {
            let mut collectors = self.collectors.write().await;
            for orphan in &orphans {
                collectors.remove(orphan);
            }
        }

        let mut tracker = self.request_tracker.lock().await;
        for orphan in &orphans {
            tracker.remove_incorporated_block(orphan);
        }

        debug!(
            "Result {}: pruned {} orphaned collectors at height {height}",
            self.result_id,
            orphans.len()
        );
        orphans
    }

    /// Request missing approvals for collectors incorporated at or below
    /// `max_height_for_requesting`, subject to backoff.  Returns the number of
    /// requests sent.
    pub async fn request_missing_approvals(
        &self,
        max_height_for_requesting: u64,
    ) -> Result<usize, CollectorError> {
        let mut requests = Vec::new();
        {
            let collectors = self.collectors.read().await;

            // Heights are resolved first, so a failed lookup leaves the tracker untouched
            let mut eligible = Vec::new();
            for (block_id, collector) in collectors.iter() {
                let height = self.collaborators.heights.block_height(block_id).map_err(|source| {
                    CollectorError::UnknownBlockHeight {
                        block_id: *block_id,
                        source,
                    }
                })?;
                if height <= max_height_for_requesting {
                    eligible.push((block_id, collector));
                }
            }

            for (block_id, collector) in eligible {
                let missing = collector.collect_missing_verifiers().await;
                if missing.is_empty() {
                    continue;
                }

                let mut tracker = self.request_tracker.lock().await;
                for (chunk_index, verifiers) in missing {
                    let item = tracker.get(&self.result_id, block_id, chunk_index);
                    if item.is_blackout() {
                        continue;
                    }
                    item.update();
                    if item.request_count() >= MANY_REQUESTS {
                        debug!(
                            "Requested approvals for chunk {chunk_index} of result {} in block {block_id} {} times",
                            self.result_id,
                            item.request_count()
                        );
                    }

                    let request = ApprovalRequest {
                        nonce: rand::random(),
                        result_id: self.result_id,
                        chunk_index,
                    };
                    requests.push((request, verifiers));
                }
            }
        }

        // Locks are released before anything goes out on the network
        let count = requests.len();
        for (request, recipients) in requests {
            if let Err(e) = self.collaborators.conduit.publish(&request, &recipients).await {
                error!(
                    "Failed to request approvals for chunk {} of result {}: {e}",
                    request.chunk_index, request.result_id
                );
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_collaborators::*;
    use sealing_test_utils::{execution_result, identifier, TestVerifier};
    use std::time::Duration;

    fn config() -> ApprovalCollectionConfig {
        ApprovalCollectionConfig {
            request_blackout_min: Duration::from_secs(60),
            request_blackout_max: Duration::from_secs(600),
            ..ApprovalCollectionConfig::default()
        }
    }

    struct Fixture {
        mocks: Mocks,
        collector: AssignmentCollector,
        verifiers: Vec<TestVerifier>,
        result: sealing_common::ExecutionResult,
    }

    // Result with two chunks, both assigned to all three verifiers
    fn fixture() -> Fixture {
        let verifiers: Vec<TestVerifier> = (1..=3).map(TestVerifier::new).collect();
        let result = execution_result(30, 2);
        let mocks = Mocks::new(&verifiers, 2);
        let collector = AssignmentCollector::new(result.id(), mocks.collaborators(), &config());
        Fixture {
            mocks,
            collector,
            verifiers,
            result,
        }
    }

    impl Fixture {
        fn incorporated(&self, block: u8, height: u64) -> IncorporatedResult {
            self.mocks.heights.set(identifier(block), height);
            IncorporatedResult::new(identifier(block), self.result.clone())
        }
    }

    #[tokio::test]
    async fn single_collector_per_incorporating_block() {
        let f = fixture();
        let incorporated = f.incorporated(1, 10);

        f.collector.process_incorporated_result(&incorporated).await.unwrap();
        f.collector.process_incorporated_result(&incorporated).await.unwrap();

        assert_eq!(f.collector.collector_count().await, 1);
        assert_eq!(f.mocks.factory.created(), 1);
        assert!(f.collector.collector_by_block_id(&identifier(1)).await.is_some());
    }

    #[tokio::test]
    async fn assignment_is_computed_once_from_first_block() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(2, 10)).await.unwrap();
        let assignment = f.collector.assignment().unwrap();
        let approvers = f.collector.authorized_approvers().unwrap();

        f.collector.process_incorporated_result(&f.incorporated(1, 11)).await.unwrap();
        f.collector.process_incorporated_result(&f.incorporated(3, 12)).await.unwrap();

        assert_eq!(f.mocks.assigner.calls(), vec![identifier(2)]);
        assert_eq!(f.mocks.verifier_lookup.calls(), vec![f.result.block_id]);
        assert!(Arc::ptr_eq(&assignment, &f.collector.assignment().unwrap()));
        assert!(Arc::ptr_eq(&approvers, &f.collector.authorized_approvers().unwrap()));
        for created in f.mocks.factory.collectors() {
            assert!(Arc::ptr_eq(&assignment, &created.assignment));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_incorporations_compute_assignment_once() {
        let f = Arc::new(fixture());
        let incorporated: Vec<IncorporatedResult> =
            (1..=8).map(|block| f.incorporated(block, 10 + block as u64)).collect();

        let tasks: Vec<_> = incorporated
            .into_iter()
            .map(|incorporated| {
                let f = f.clone();
                tokio::spawn(async move { f.collector.process_incorporated_result(&incorporated).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(f.mocks.assigner.calls().len(), 1);
        assert_eq!(f.mocks.verifier_lookup.calls().len(), 1);
        assert_eq!(f.collector.collector_count().await, 8);
        let assignment = f.collector.assignment().unwrap();
        let created = f.mocks.factory.collectors();
        assert_eq!(created.len(), 8);
        for collector in created {
            assert!(Arc::ptr_eq(&assignment, &collector.assignment));
        }
    }

    #[tokio::test]
    async fn result_mismatch_is_invalid_input() {
        let f = fixture();
        let other = IncorporatedResult::new(identifier(1), execution_result(31, 2));
        let error = f.collector.process_incorporated_result(&other).await.unwrap_err();
        assert!(matches!(error, CollectorError::ResultMismatch { .. }));
        assert!(error.is_invalid_input());

        let approval = f.verifiers[0].approve(&other.result, 0);
        let error = f.collector.process_approval(&approval).await.unwrap_err();
        assert!(matches!(error, CollectorError::ResultMismatch { .. }));
    }

    #[tokio::test]
    async fn assigner_failure_is_invalid_input_and_leaves_no_state() {
        let f = fixture();
        f.mocks.assigner.fail();
        let error = f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap_err();

        assert!(matches!(error, CollectorError::ChunkAssignment { .. }));
        assert!(error.is_invalid_input());
        assert!(f.collector.is_empty().await);
        assert!(f.collector.assignment().is_none());
    }

    #[tokio::test]
    async fn verifier_lookup_failure_is_invalid_input() {
        let f = fixture();
        f.mocks.verifier_lookup.fail();
        let error = f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap_err();
        assert!(matches!(error, CollectorError::AuthorizedVerifiers { .. }));
        assert!(error.is_invalid_input());
    }

    #[tokio::test]
    async fn unknown_height_is_fatal() {
        let f = fixture();
        let incorporated = IncorporatedResult::new(identifier(9), f.result.clone());
        let error = f.collector.process_incorporated_result(&incorporated).await.unwrap_err();

        assert!(error.is_fatal());
        assert!(matches!(error, CollectorError::UnknownBlockHeight { block_id, .. } if block_id == identifier(9)));
        assert!(f.collector.is_empty().await);
        assert!(f.collector.assignment().is_none());
    }

    #[tokio::test]
    async fn approval_before_any_incorporation_is_rejected() {
        let f = fixture();
        let approval = f.verifiers[0].approve(&f.result, 0);
        let error = f.collector.process_approval(&approval).await.unwrap_err();
        assert!(matches!(error, CollectorError::ApproversUnknown { .. }));
        assert!(error.is_invalid_input());
    }

    #[tokio::test]
    async fn unauthorized_and_badly_signed_approvals_are_rejected() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();

        let stranger = TestVerifier::new(99);
        let error = f.collector.process_approval(&stranger.approve(&f.result, 0)).await.unwrap_err();
        assert!(matches!(error, CollectorError::UnauthorizedApprover { .. }));

        let mut forged = f.verifiers[0].approve(&f.result, 0);
        forged.verifier_signature = f.verifiers[1].approve(&f.result, 0).verifier_signature;
        let error = f.collector.process_approval(&forged).await.unwrap_err();
        assert!(matches!(error, CollectorError::InvalidSignature { .. }));
        assert!(error.is_invalid_input());

        let created = f.mocks.factory.collectors();
        assert!(created[0].received().is_empty());
    }

    #[tokio::test]
    async fn signature_verifier_failure_is_invalid_input() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        f.mocks.signatures.fail();

        let error = f
            .collector
            .process_approval(&f.verifiers[0].approve(&f.result, 0))
            .await
            .unwrap_err();
        assert!(matches!(error, CollectorError::SignatureVerification { .. }));
        assert!(error.is_invalid_input());
    }

    #[tokio::test]
    async fn approval_is_validated_once() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        let approval = f.verifiers[0].approve(&f.result, 0);

        f.collector.process_approval(&approval).await.unwrap();
        f.collector.process_approval(&approval).await.unwrap();
        f.collector.process_incorporated_result(&f.incorporated(2, 10)).await.unwrap();

        assert_eq!(f.mocks.signatures.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_deliveries_validate_once() {
        let f = Arc::new(fixture());
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        let approval = f.verifiers[0].approve(&f.result, 0);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let f = f.clone();
                let approval = approval.clone();
                tokio::spawn(async move { f.collector.process_approval(&approval).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(f.mocks.signatures.calls(), 1);
    }

    #[tokio::test]
    async fn approvals_fan_out_and_replay_into_new_collectors() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        f.collector.process_incorporated_result(&f.incorporated(2, 10)).await.unwrap();

        let approval = f.verifiers[0].approve(&f.result, 0);
        f.collector.process_approval(&approval).await.unwrap();

        f.collector.process_incorporated_result(&f.incorporated(3, 11)).await.unwrap();

        let created = f.mocks.factory.collectors();
        assert_eq!(created.len(), 3);
        for collector in created {
            assert_eq!(collector.received(), vec![approval.id()]);
        }
    }

    #[tokio::test]
    async fn fan_out_continues_past_failing_collector() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        f.collector.process_incorporated_result(&f.incorporated(2, 10)).await.unwrap();
        f.collector.process_incorporated_result(&f.incorporated(3, 10)).await.unwrap();
        for created in f.mocks.factory.collectors() {
            if created.block_id != identifier(3) {
                created.reject();
            }
        }

        let approval = f.verifiers[0].approve(&f.result, 1);
        let error = f.collector.process_approval(&approval).await.unwrap_err();

        assert!(matches!(error, CollectorError::Collector { .. }));
        assert!(!error.is_fatal());
        for created in f.mocks.factory.collectors() {
            assert_eq!(created.received(), vec![approval.id()]);
        }
    }

    #[tokio::test]
    async fn finalization_prunes_orphans_at_height() {
        let f = fixture();
        for block in [1, 2, 3] {
            f.collector.process_incorporated_result(&f.incorporated(block, 10)).await.unwrap();
        }
        f.collector.process_incorporated_result(&f.incorporated(4, 11)).await.unwrap();

        let orphans = f.collector.on_block_finalized_at_height(&identifier(2), 10).await;

        assert_eq!(orphans, vec![identifier(1), identifier(3)]);
        assert_eq!(f.collector.collector_count().await, 2);
        assert!(f.collector.collector_by_block_id(&identifier(2)).await.is_some());
        assert!(f.collector.collector_by_block_id(&identifier(4)).await.is_some());
        assert_eq!(f.collector.incorporated_at_height.lock().await.heights(), vec![11]);

        // Bucket is gone, so finalizing the height again prunes nothing
        assert!(f.collector.on_block_finalized_at_height(&identifier(2), 10).await.is_empty());
    }

    #[tokio::test]
    async fn surviving_fork_keeps_its_approvals() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        f.collector.process_incorporated_result(&f.incorporated(2, 10)).await.unwrap();
        let approval = f.verifiers[0].approve(&f.result, 0);
        f.collector.process_approval(&approval).await.unwrap();

        f.collector.on_block_finalized_at_height(&identifier(1), 10).await;

        assert!(f.collector.collector_by_block_id(&identifier(2)).await.is_none());
        let survivor = f.mocks.factory.collector_for(&identifier(1)).unwrap();
        assert_eq!(survivor.received(), vec![approval.id()]);
    }

    #[tokio::test]
    async fn requests_respect_height_bound_and_blackout() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        f.collector.process_incorporated_result(&f.incorporated(2, 20)).await.unwrap();
        for created in f.mocks.factory.collectors() {
            created.set_missing(vec![
                (0, vec![f.verifiers[0].node_id()]),
                (1, vec![f.verifiers[1].node_id(), f.verifiers[2].node_id()]),
            ]);
        }

        assert_eq!(f.collector.request_missing_approvals(9).await.unwrap(), 0);

        assert_eq!(f.collector.request_missing_approvals(15).await.unwrap(), 2);
        let sent = f.mocks.conduit.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(request, _)| request.result_id == f.result.id()));
        assert_eq!(sent[1].1, vec![f.verifiers[1].node_id(), f.verifiers[2].node_id()]);
        let chunks: Vec<u64> = sent.iter().map(|(request, _)| request.chunk_index).collect();
        assert_eq!(chunks, vec![0, 1]);

        // Still in blackout
        assert_eq!(f.collector.request_missing_approvals(15).await.unwrap(), 0);

        // Higher bound picks up the other fork, which has its own backoff
        assert_eq!(f.collector.request_missing_approvals(20).await.unwrap(), 2);
        assert_eq!(f.collector.request_tracker.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn requests_resume_after_blackout() {
        let verifiers: Vec<TestVerifier> = (1..=3).map(TestVerifier::new).collect();
        let result = execution_result(30, 1);
        let mocks = Mocks::new(&verifiers, 1);
        let config = ApprovalCollectionConfig {
            request_blackout_min: Duration::from_millis(1),
            request_blackout_max: Duration::from_millis(1),
            ..ApprovalCollectionConfig::default()
        };
        let collector = AssignmentCollector::new(result.id(), mocks.collaborators(), &config);
        mocks.heights.set(identifier(1), 5);
        collector
            .process_incorporated_result(&IncorporatedResult::new(identifier(1), result.clone()))
            .await
            .unwrap();
        mocks.factory.collectors()[0].set_missing(vec![(0, vec![verifiers[0].node_id()])]);

        assert_eq!(collector.request_missing_approvals(5).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(collector.request_missing_approvals(5).await.unwrap(), 1);

        let mut tracker = collector.request_tracker.lock().await;
        assert_eq!(tracker.get(&result.id(), &identifier(1), 0).request_count(), 2);
    }

    #[tokio::test]
    async fn publish_failures_are_not_surfaced() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        f.mocks.factory.collectors()[0].set_missing(vec![(0, vec![f.verifiers[0].node_id()])]);
        f.mocks.conduit.fail();

        assert_eq!(f.collector.request_missing_approvals(10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_height_during_requests_is_fatal() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        f.mocks.heights.forget(&identifier(1));

        let error = f.collector.request_missing_approvals(100).await.unwrap_err();
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn failed_height_lookup_leaves_backoff_untouched() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        f.collector.process_incorporated_result(&f.incorporated(2, 10)).await.unwrap();
        for created in f.mocks.factory.collectors() {
            created.set_missing(vec![(0, vec![f.verifiers[0].node_id()])]);
        }
        f.mocks.heights.forget(&identifier(2));

        let error = f.collector.request_missing_approvals(10).await.unwrap_err();
        assert!(error.is_fatal());
        assert!(f.mocks.conduit.sent().is_empty());
        assert!(f.collector.request_tracker.lock().await.is_empty());

        // Once the height is known again both forks are requested straight away
        f.mocks.heights.set(identifier(2), 10);
        assert_eq!(f.collector.request_missing_approvals(10).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn pruning_drops_request_tracker_items() {
        let f = fixture();
        f.collector.process_incorporated_result(&f.incorporated(1, 10)).await.unwrap();
        f.collector.process_incorporated_result(&f.incorporated(2, 10)).await.unwrap();
        for created in f.mocks.factory.collectors() {
            created.set_missing(vec![(0, vec![f.verifiers[0].node_id()])]);
        }
        f.collector.request_missing_approvals(10).await.unwrap();
        assert_eq!(f.collector.request_tracker.lock().await.len(), 2);

        f.collector.on_block_finalized_at_height(&identifier(1), 10).await;
        assert_eq!(f.collector.request_tracker.lock().await.len(), 1);
    }
}
