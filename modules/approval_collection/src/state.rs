//! Approval collection state - the registry of assignment collectors
use crate::approval_cache::ApprovalCache;
use crate::assignment_collector::AssignmentCollector;
use crate::collaborators::Collaborators;
use crate::collector_error::CollectorError;
use crate::configuration::ApprovalCollectionConfig;
use sealing_common::{Identifier, IncorporatedResult, ResultApproval};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Approval collection state
/// Note all methods take &self, so the state can be shared between tasks
pub struct State {
    config: ApprovalCollectionConfig,

    collaborators: Collaborators,

    /// Assignment collectors by result ID
    collectors: RwLock<HashMap<Identifier, Arc<AssignmentCollector>>>,

    /// Approvals for results we have not seen incorporated yet - unvalidated.
    /// Only touched with `collectors` held, and always after it
    pending_approvals: Mutex<ApprovalCache>,

    last_finalized_height: Mutex<Option<u64>>,
}

impl State {
    pub fn new(config: ApprovalCollectionConfig, collaborators: Collaborators) -> Self {
        let pending_approvals = Mutex::new(ApprovalCache::new(config.pending_approvals_cache_size));
        Self {
            config,
            collaborators,
            collectors: RwLock::new(HashMap::new()),
            pending_approvals,
            last_finalized_height: Mutex::new(None),
        }
    }

    /// Result IDs being tracked, in order
    pub async fn tracked_results(&self) -> Vec<Identifier> {
        let mut results: Vec<Identifier> = self.collectors.read().await.keys().copied().collect();
        results.sort_unstable();
        results
    }

    pub async fn assignment_collector(&self, result_id: &Identifier) -> Option<Arc<AssignmentCollector>> {
        self.collectors.read().await.get(result_id).cloned()
    }

    pub async fn last_finalized_height(&self) -> Option<u64> {
        *self.last_finalized_height.lock().await
    }

    pub async fn pending_approval_count(&self) -> usize {
        self.pending_approvals.lock().await.len()
    }

    /// Handle a result incorporated in a block, then process any approvals
    /// which arrived for it early
    pub async fn handle_incorporated_result(
        &self,
        incorporated: &IncorporatedResult,
    ) -> Result<(), CollectorError> {
        let result_id = incorporated.result_id();

        let (collector, parked) = {
            let mut collectors = self.collectors.write().await;
            let collector = collectors
                .entry(result_id)
                .or_insert_with(|| {
                    Arc::new(AssignmentCollector::new(
                        result_id,
                        self.collaborators.clone(),
                        &self.config,
                    ))
                })
                .clone();

            if let Err(e) = collector.process_incorporated_result(incorporated).await {
                if collector.is_empty().await {
                    collectors.remove(&result_id);
                }
                return Err(e);
            }

            let parked = self
                .pending_approvals
                .lock()
                .await
                .take_matching(|approval| approval.result_id() == result_id);
            (collector, parked)
        };

        if !parked.is_empty() {
            debug!("Processing {} parked approvals for result {result_id}", parked.len());
        }
        for approval in &parked {
            if let Err(e) = collector.process_approval(approval).await {
                warn!("Parked approval {} rejected: {e}", approval.id());
            }
        }
        Ok(())
    }

    /// Handle an approval - parked unvalidated if its result is not tracked yet
    pub async fn handle_approval(&self, approval: &ResultApproval) -> Result<(), CollectorError> {
        let result_id = approval.result_id();
        let collector = {
            let collectors = self.collectors.read().await;
            match collectors.get(&result_id) {
                Some(collector) => collector.clone(),
                None => {
                    self.pending_approvals.lock().await.put(approval.clone());
                    debug!("Parked approval {} for unknown result {result_id}", approval.id());
                    return Ok(());
                }
            }
        };

        collector.process_approval(approval).await
    }

    /// Handle finalization of a block, pruning orphaned collectors and
    /// dropping results left with none.  Returns the orphaned block IDs
    pub async fn handle_block_finalized(&self, block_id: &Identifier, height: u64) -> Vec<Identifier> {
        {
            let mut last = self.last_finalized_height.lock().await;
            *last = Some(last.map_or(height, |last| last.max(height)));
        }

        let mut collectors = self.collectors.write().await;
        let mut orphans = Vec::new();
        let mut drained = Vec::new();
        for (result_id, collector) in collectors.iter() {
            orphans.extend(collector.on_block_finalized_at_height(block_id, height).await);
            if collector.is_empty().await {
                drained.push(*result_id);
            }
        }

        for result_id in &drained {
            collectors.remove(result_id);
        }
        if !orphans.is_empty() || !drained.is_empty() {
            info!(
                "Block {block_id} finalized at {height}: {} orphaned collectors, {} results dropped",
                orphans.len(),
                drained.len()
            );
        }
        orphans
    }

    /// Re-request missing approvals for results incorporated far enough below
    /// the last finalized height.  Returns the number of requests sent
    pub async fn request_missing_approvals(&self) -> Result<usize, CollectorError> {
        let Some(finalized) = self.last_finalized_height().await else {
            return Ok(0);
        };
        let threshold = self.config.approval_requests_threshold;
        if finalized <= threshold {
            return Ok(0);
        }
        let max_height_for_requesting = finalized - threshold;

        let collectors: Vec<Arc<AssignmentCollector>> =
            self.collectors.read().await.values().cloned().collect();

        let mut requested = 0;
        for collector in collectors {
            requested += collector.request_missing_approvals(max_height_for_requesting).await?;
        }
        if requested > 0 {
            debug!("Requested missing approvals {requested} times up to height {max_height_for_requesting}");
        }
        Ok(requested)
    }
}
