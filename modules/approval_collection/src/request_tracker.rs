//! Backoff state for re-requesting missing approvals
//!
//! One item per (result, incorporating block, chunk), so forks and chunks back
//! off independently of each other.
use sealing_common::{ChunkIndex, Identifier};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Request count and blackout expiry for one missing chunk approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTrackerItem {
    request_count: u32,
    blackout_until: Option<Instant>,
    blackout_min: Duration,
    blackout_max: Duration,
}

impl RequestTrackerItem {
    fn new(blackout_min: Duration, blackout_max: Duration) -> Self {
        Self {
            request_count: 0,
            blackout_until: None,
            blackout_min,
            blackout_max,
        }
    }

    /// Number of requests sent so far
    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn blackout_until(&self) -> Option<Instant> {
        self.blackout_until
    }

    pub fn is_blackout(&self) -> bool {
        self.is_blackout_at(Instant::now())
    }

    pub fn is_blackout_at(&self, now: Instant) -> bool {
        self.blackout_until.is_some_and(|until| now < until)
    }

    /// Record a request sent now
    pub fn update(&mut self) {
        self.update_at(Instant::now())
    }

    /// Record a request sent at `now`, extending the blackout by
    /// min(blackout_min * 2^(count-1), blackout_max)
    pub fn update_at(&mut self, now: Instant) {
        self.request_count = self.request_count.saturating_add(1);
        let until = now + self.window();
        self.blackout_until = Some(match self.blackout_until {
            Some(existing) => existing.max(until),
            None => until,
        });
    }

    /// Blackout window for the current request count
    pub fn window(&self) -> Duration {
        let exponent = self.request_count.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.blackout_min.saturating_mul(factor).min(self.blackout_max)
    }
}

type TrackerKey = (Identifier, Identifier, ChunkIndex);

/// Request tracker for one assignment collector
#[derive(Debug)]
pub struct RequestTracker {
    items: HashMap<TrackerKey, RequestTrackerItem>,
    blackout_min: Duration,
    blackout_max: Duration,
}

impl RequestTracker {
    pub fn new(blackout_min: Duration, blackout_max: Duration) -> Self {
        Self {
            items: HashMap::new(),
            blackout_min,
            blackout_max: blackout_max.max(blackout_min),
        }
    }

    /// Get the item for a triple, creating it on first access
    pub fn get(
        &mut self,
        result_id: &Identifier,
        incorporated_block_id: &Identifier,
        chunk_index: ChunkIndex,
    ) -> &mut RequestTrackerItem {
        let (min, max) = (self.blackout_min, self.blackout_max);
        self.items
            .entry((*result_id, *incorporated_block_id, chunk_index))
            .or_insert_with(|| RequestTrackerItem::new(min, max))
    }

    /// Drop every item for an incorporating block, returning how many went
    pub fn remove_incorporated_block(&mut self, incorporated_block_id: &Identifier) -> usize {
        let before = self.items.len();
        self.items.retain(|(_, block_id, _), _| block_id != incorporated_block_id);
        before - self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
