//! Mountain range keeping only what the next append needs.
//!
//! Memory is bounded by the number of peaks. Besides the peaks the compact
//! form remembers the left siblings the last append merged with, so it can
//! still prove the most recently appended leaf. Older leaves are not provable.

use super::{fold_peaks, predict_root, Mmr};
use crate::merkle::proof::Proof;
use crate::utils::hasher::{self, Hash32};

#[derive(Debug, Default, Clone)]
pub struct CompactMmr {
    count: u64,
    // leftmost first
    peaks: Vec<Hash32>,
    // bottom-up
    last_siblings: Vec<Hash32>,
}

impl CompactMmr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peak hashes, leftmost first.
    pub fn peaks(&self) -> &[Hash32] {
        &self.peaks
    }
}

impl Mmr for CompactMmr {
    fn count(&self) -> u64 {
        self.count
    }

    fn append(&mut self, leaf: &Hash32) {
        let mut acc = *leaf;
        let mut n = self.count;
        self.last_siblings.clear();
        while n & 1 == 1 {
            // one peak per trailing one-bit of the count
            let left = self.peaks.pop().expect("peak count follows leaf count");
            self.last_siblings.push(left);
            acc = hasher::hash2(&left, &acc);
            n >>= 1;
        }
        self.peaks.push(acc);
        self.count += 1;
    }

    fn get_hash(&self) -> Hash32 {
        fold_peaks(&self.peaks)
    }

    fn get_predicted_hash(&self, leaf: &Hash32) -> Hash32 {
        predict_root(&self.peaks, self.count, leaf)
    }

    /// Only the last appended leaf can be proven.
    fn get_proof(&self, index: u64) -> Option<Proof> {
        if self.count == 0 || index != self.count - 1 {
            return None;
        }
        let left_peaks = &self.peaks[..self.peaks.len() - 1];
        let mut proof = Proof::with_capacity(self.last_siblings.len() + left_peaks.len());
        for sibling in &self.last_siblings {
            proof.push(*sibling, false);
        }
        for peak in left_peaks.iter().rev() {
            proof.push(*peak, false);
        }
        Some(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::mmr::ArrayMmr;
    use crate::test_helper::random_hash;

    #[test]
    fn test_matches_array() {
        let mut compact = CompactMmr::new();
        let mut array = ArrayMmr::new();
        for i in 0..70u64 {
            let leaf = random_hash(i);
            assert_eq!(
                array.get_predicted_hash(&leaf),
                compact.get_predicted_hash(&leaf)
            );
            compact.append(&leaf);
            array.append(&leaf);
            assert_eq!(array.get_hash(), compact.get_hash());
            assert_eq!(array.get_proof(i), compact.get_proof(i));
            assert_eq!((i + 1).count_ones() as usize, compact.peaks().len());
        }
    }

    #[test]
    fn test_old_leaves_unprovable() {
        let mut mmr = CompactMmr::new();
        assert!(mmr.get_proof(0).is_none());
        for i in 0..5u64 {
            mmr.append(&random_hash(i));
        }
        assert!(mmr.get_proof(4).is_some());
        assert!(mmr.get_proof(3).is_none());
        assert!(mmr.get_proof(5).is_none());
    }
}
