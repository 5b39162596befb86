//! Mountain range computed on the fly from host-stored leaves.
//!
//! Nothing but the count is kept; every node is recomputed from leaves
//! fetched through the loader. Suited to short ranges whose leaves the host
//! keeps anyway, e.g. the headers of a block range being validated.

use super::{build_proof, fold_peaks, peak_positions, predict_root};
use crate::merkle::proof::Proof;
use crate::utils::hasher::{self, Hash32};

pub struct FlyMmr<F> {
    count: u64,
    load_leaf: F,
}

impl<F: Fn(u64) -> Hash32> FlyMmr<F> {
    /// Creates a range over leaves `0..count` served by `load_leaf`.
    pub fn new(count: u64, load_leaf: F) -> Self {
        Self { count, load_leaf }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Makes one more host-stored leaf part of the range.
    pub fn extend(&mut self) {
        self.count += 1;
    }

    /// Recomputes the node `(height, index)` from its leaves.
    pub fn get_node_hash(&self, height: u8, index: u64) -> Hash32 {
        if height == 0 {
            return (self.load_leaf)(index);
        }
        let left = self.get_node_hash(height - 1, index << 1);
        let right = self.get_node_hash(height - 1, (index << 1) | 1);
        hasher::hash2(&left, &right)
    }

    fn peak_hashes(&self) -> Vec<Hash32> {
        peak_positions(self.count)
            .into_iter()
            .map(|(h, i)| self.get_node_hash(h, i))
            .collect()
    }

    pub fn get_hash(&self) -> Hash32 {
        fold_peaks(&self.peak_hashes())
    }

    pub fn get_predicted_hash(&self, leaf: &Hash32) -> Hash32 {
        predict_root(&self.peak_hashes(), self.count, leaf)
    }

    pub fn get_proof(&self, index: u64) -> Option<Proof> {
        build_proof(self.count, index, |h, i| self.get_node_hash(h, i))
    }
}
