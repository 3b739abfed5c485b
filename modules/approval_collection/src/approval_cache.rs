//! Bounded, insertion-ordered store of approvals keyed by approval ID
use sealing_common::{Identifier, ResultApproval};
use std::collections::{HashMap, VecDeque};

/// Approval cache - once full, the oldest entry is evicted to make room
#[derive(Debug)]
pub struct ApprovalCache {
    capacity: usize,
    approvals: HashMap<Identifier, ResultApproval>,
    order: VecDeque<Identifier>,
}

impl ApprovalCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            approvals: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Add an approval, returning false if it was already cached
    pub fn put(&mut self, approval: ResultApproval) -> bool {
        let id = approval.id();
        if self.approvals.contains_key(&id) {
            return false;
        }

        while self.approvals.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.approvals.remove(&oldest);
                }
                None => break,
            }
        }

        self.order.push_back(id);
        self.approvals.insert(id, approval);
        true
    }

    pub fn peek(&self, id: &Identifier) -> Option<&ResultApproval> {
        self.approvals.get(id)
    }

    /// IDs of cached approvals, oldest first
    pub fn ids(&self) -> Vec<Identifier> {
        self.order.iter().copied().collect()
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.approvals.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.approvals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.approvals.is_empty()
    }

    /// Remove and return the approvals matching `predicate`, oldest first
    pub fn take_matching<F>(&mut self, mut predicate: F) -> Vec<ResultApproval>
    where
        F: FnMut(&ResultApproval) -> bool,
    {
        let mut taken = Vec::new();
        let approvals = &mut self.approvals;
        self.order.retain(|id| match approvals.get(id).map(&mut predicate) {
            Some(true) => {
                if let Some(approval) = approvals.remove(id) {
                    taken.push(approval);
                }
                false
            }
            Some(false) => true,
            None => false,
        });
        taken
    }

    /// Drain the cache, oldest first
    pub fn take_all(&mut self) -> Vec<ResultApproval> {
        self.take_matching(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealing_common::{ApprovalBody, Signature};

    fn approval(result: u8, chunk_index: u64) -> ResultApproval {
        ResultApproval {
            body: ApprovalBody {
                block_id: Identifier::new([9; 32]),
                execution_result_id: Identifier::new([result; 32]),
                chunk_index,
                approver_id: Identifier::new([7; 32]),
            },
            verifier_signature: Signature::default(),
        }
    }

    #[test]
    fn put_is_idempotent() {
        let mut cache = ApprovalCache::new(10);
        assert!(cache.put(approval(1, 0)));
        assert!(!cache.put(approval(1, 0)));
        assert_eq!(cache.len(), 1);

        let id = approval(1, 0).id();
        assert!(cache.contains(&id));
        assert_eq!(cache.peek(&id), Some(&approval(1, 0)));
    }

    #[test]
    fn oldest_entry_is_evicted_when_full() {
        let mut cache = ApprovalCache::new(2);
        cache.put(approval(1, 0));
        cache.put(approval(1, 1));
        cache.put(approval(1, 2));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&approval(1, 0).id()));
        assert_eq!(cache.ids(), vec![approval(1, 1).id(), approval(1, 2).id()]);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut cache = ApprovalCache::new(0);
        cache.put(approval(1, 0));
        cache.put(approval(1, 1));
        assert_eq!(cache.ids(), vec![approval(1, 1).id()]);
    }

    #[test]
    fn take_matching_leaves_the_rest() {
        let mut cache = ApprovalCache::new(10);
        cache.put(approval(1, 0));
        cache.put(approval(2, 0));
        cache.put(approval(1, 1));

        let taken = cache.take_matching(|a| a.body.execution_result_id == Identifier::new([1; 32]));
        assert_eq!(taken, vec![approval(1, 0), approval(1, 1)]);
        assert_eq!(cache.ids(), vec![approval(2, 0).id()]);

        assert_eq!(cache.take_all(), vec![approval(2, 0)]);
        assert!(cache.is_empty());
    }
}
