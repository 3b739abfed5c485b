//! Reverse index from block height to the incorporating blocks seen there
use sealing_common::Identifier;
use std::collections::{BTreeSet, HashMap};

/// Height index, used to find orphaned collectors once a height is finalized
#[derive(Debug, Default)]
pub struct HeightIndex {
    buckets: HashMap<u64, BTreeSet<Identifier>>,
}

impl HeightIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block at a height, returning false if it was already there
    pub fn insert(&mut self, height: u64, block_id: Identifier) -> bool {
        self.buckets.entry(height).or_default().insert(block_id)
    }

    /// Remove the bucket for a height, returning its blocks in order
    pub fn take(&mut self, height: u64) -> Vec<Identifier> {
        self.buckets.remove(&height).map(|blocks| blocks.into_iter().collect()).unwrap_or_default()
    }

    /// Number of heights with blocks
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Heights currently indexed, ascending
    pub fn heights(&self) -> Vec<u64> {
        let mut heights: Vec<u64> = self.buckets.keys().copied().collect();
        heights.sort_unstable();
        heights
    }
}
