//! Merkle mountain ranges.
//!
//! A mountain range is an append-only list of leaf digests committed to by a
//! single root. Leaves are numbered `0..count`. The node at `(height h,
//! index i)` covers leaves `[i << h, (i + 1) << h)` and exists once all of
//! them were appended. The maximal complete subtrees ("peaks") correspond to
//! the set bits of `count`, the highest bit being the leftmost peak.
//!
//! The root folds the peaks from right to left:
//! `root = p0 ⊕ (p1 ⊕ (... ⊕ pk))`, and an empty range has the zero root.
//!
//! A proof for leaf `n` lists the siblings inside its mountain bottom-up,
//! then (if any peak lies to its right) one step carrying the right-fold of
//! those peaks, then each peak to its left, nearest first.
//!
//! Four accumulators share this addressing:
//! - [`StoredMmr`]: every node kept through an [`ElementStore`], e.g. the
//!   per-height vectors of [`ArrayMmr`]
//! - [`DistributedMmr`]: nodes allocated and owned by the host, reached
//!   through opaque keys
//! - [`CompactMmr`]: peaks only
//! - [`FlyMmr`]: nothing stored, leaves loaded on demand

pub mod compact;
pub mod distributed;
pub mod fly;
pub mod stored;

pub use compact::CompactMmr;
pub use distributed::{DistributedMmr, NodeKey, NodeStore};
pub use fly::FlyMmr;
pub use stored::{ArrayMmr, ElementStore, HeightVecStore, StoredMmr};

use super::proof::Proof;
use crate::utils::hasher::{self, Hash32, ZERO_HASH32};

/// The contract every append-only accumulator fulfils.
///
/// For the same append sequence all implementations produce the same roots
/// and, wherever they can answer, the same proofs.
pub trait Mmr {
    /// Number of appended leaves.
    fn count(&self) -> u64;

    /// Appends a leaf digest.
    fn append(&mut self, leaf: &Hash32);

    /// Root over all leaves appended so far.
    fn get_hash(&self) -> Hash32;

    /// Root the accumulator would have after appending `leaf`. Does not
    /// mutate the accumulator.
    fn get_predicted_hash(&self, leaf: &Hash32) -> Hash32;

    /// Inclusion proof for the leaf at `index`, or `None` if the accumulator
    /// holds no such leaf or cannot prove it.
    fn get_proof(&self, index: u64) -> Option<Proof>;

    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Returns whether the node `(height, index)` is complete in a range of
/// `count` leaves.
pub fn node_exists(count: u64, height: u8, index: u64) -> bool {
    height < 64 && index < (count >> height)
}

/// Positions `(height, index)` of the peaks of a range of `count` leaves,
/// leftmost first.
pub fn peak_positions(count: u64) -> Vec<(u8, u64)> {
    let mut res = Vec::with_capacity(count.count_ones() as usize);
    let mut start = 0u64;
    for height in (0..64u8).rev() {
        if (count >> height) & 1 == 1 {
            res.push((height, start >> height));
            start += 1u64 << height;
        }
    }
    res
}

/// Folds peak hashes (leftmost first) into the root.
pub fn fold_peaks(peaks: &[Hash32]) -> Hash32 {
    match peaks.split_last() {
        None => ZERO_HASH32,
        Some((last, rest)) => rest
            .iter()
            .rev()
            .fold(*last, |acc, peak| hasher::hash2(peak, &acc)),
    }
}

/// Computes the root a range with `count` leaves and the given peak hashes
/// would have after appending `leaf`.
///
/// Appending merges the new leaf with one peak per trailing one-bit of
/// `count`; the smallest peaks sit at the end of `peaks`.
pub fn predict_root(peaks: &[Hash32], count: u64, leaf: &Hash32) -> Hash32 {
    let mut acc = *leaf;
    let mut n = count;
    let mut k = peaks.len();
    while n & 1 == 1 {
        k -= 1;
        acc = hasher::hash2(&peaks[k], &acc);
        n >>= 1;
    }
    let mut new_peaks = Vec::with_capacity(k + 1);
    new_peaks.extend_from_slice(&peaks[..k]);
    new_peaks.push(acc);
    fold_peaks(&new_peaks)
}

/// Builds the inclusion proof of leaf `index` in a range of `count` leaves.
///
/// `node` must return the hash of an existing node `(height, index)`.
/// Returns `None` if `index >= count`.
pub fn build_proof<F>(count: u64, index: u64, mut node: F) -> Option<Proof>
where
    F: FnMut(u8, u64) -> Hash32,
{
    if index >= count {
        return None;
    }
    let peaks = peak_positions(count);
    let pos = peaks
        .iter()
        .position(|&(h, i)| index < ((i + 1) << h))
        .expect("leaf below count must fall into a peak");
    let height = peaks[pos].0;

    let mut proof = Proof::with_capacity(height as usize + peaks.len());
    for h in 0..height {
        let i = index >> h;
        proof.push(node(h, i ^ 1), i & 1 == 0);
    }
    if pos + 1 < peaks.len() {
        let right: Vec<Hash32> = peaks[pos + 1..].iter().map(|&(h, i)| node(h, i)).collect();
        proof.push(fold_peaks(&right), true);
    }
    for &(h, i) in peaks[..pos].iter().rev() {
        proof.push(node(h, i), false);
    }
    Some(proof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::proof::interpret;
    use crate::utils::hasher::{hash, hash2};

    #[test]
    fn test_peak_positions() {
        assert!(peak_positions(0).is_empty());
        assert_eq!(vec![(0, 0)], peak_positions(1));
        assert_eq!(vec![(1, 0)], peak_positions(2));
        assert_eq!(vec![(1, 0), (0, 2)], peak_positions(3));
        assert_eq!(vec![(2, 0), (1, 2), (0, 6)], peak_positions(7));
        assert_eq!(vec![(3, 0), (1, 4)], peak_positions(10));
    }

    #[test]
    fn test_node_exists() {
        assert!(node_exists(3, 1, 0));
        assert!(!node_exists(3, 1, 1));
        assert!(node_exists(3, 0, 2));
        assert!(!node_exists(3, 2, 0));
        assert!(!node_exists(u64::MAX, 63, 2));
        assert!(!node_exists(u64::MAX, 63, 1));
        assert!(node_exists(u64::MAX, 63, 0));
        assert!(node_exists(u64::MAX, 0, u64::MAX - 1));
        assert!(!node_exists(u64::MAX, 64, 0));
    }

    #[test]
    fn test_fold_and_predict() {
        let leaves: Vec<Hash32> = (0..3u8).map(|i| hash([i])).collect();
        assert_eq!(ZERO_HASH32, fold_peaks(&[]));
        assert_eq!(leaves[0], fold_peaks(&leaves[..1]));

        let p01 = hash2(&leaves[0], &leaves[1]);
        // three leaves: peaks are (0,1) and 2
        let root3 = hash2(&p01, &leaves[2]);
        assert_eq!(root3, fold_peaks(&[p01, leaves[2]]));

        assert_eq!(leaves[0], predict_root(&[], 0, &leaves[0]));
        assert_eq!(p01, predict_root(&[leaves[0]], 1, &leaves[1]));
        assert_eq!(root3, predict_root(&[p01], 2, &leaves[2]));
    }

    #[test]
    fn test_build_proof_small() {
        let leaves: Vec<Hash32> = (0..3u8).map(|i| hash([i])).collect();
        let p01 = hash2(&leaves[0], &leaves[1]);
        let root = hash2(&p01, &leaves[2]);
        let node = |h: u8, i: u64| match (h, i) {
            (0, i) => leaves[i as usize],
            (1, 0) => p01,
            _ => panic!("no such node {}-{}", h, i),
        };

        let proof = build_proof(3, 0, node).unwrap();
        assert_eq!(2, proof.len());
        assert_eq!((leaves[1], true), (proof.0[0].peer_hash, proof.0[0].peer_at_right));
        assert_eq!((leaves[2], true), (proof.0[1].peer_hash, proof.0[1].peer_at_right));
        assert_eq!(root, interpret(&leaves[0], &proof));

        let proof = build_proof(3, 2, node).unwrap();
        assert_eq!(1, proof.len());
        assert_eq!((p01, false), (proof.0[0].peer_hash, proof.0[0].peer_at_right));
        assert_eq!(root, interpret(&leaves[2], &proof));

        assert!(build_proof(3, 3, node).is_none());
    }
}
