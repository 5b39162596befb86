//! Mountain range whose nodes are allocated and owned by the host.
//!
//! Every appended leaf becomes one host node, identified by an opaque
//! [`NodeKey`]. The accumulator keeps just the leaf count and the key of the
//! last node; everything else is reached by following links stored in the
//! node payloads the host hands back through [`NodeStore`].
//!
//! Payload of the node for leaf `n`, with `t = trailing_ones(n)`:
//! +-----------------------------------+----------------------------------+
//! | t hashes (32B each)               | links (8B LE each)               |
//! +-----------------------------------+----------------------------------+
//! - hash `k` (0-based) is the node of height `k + 1` whose last leaf is `n`
//! - link `h` for `h` in `0..=t` is the key of leaf `n - 2^h`, present only
//!   when that leaf exists
//!
//! A node of height `h` ends at a leaf whose index has `h` trailing one-bits,
//! so its hash always sits in that leaf's payload. The link at `t` jumps to
//! the end of the previous peak, which makes the walk over peaks and the
//! search for any leaf logarithmic.

use auto_impl::auto_impl;

use super::{build_proof, fold_peaks, node_exists, peak_positions, predict_root};
use crate::def::{HASH_SIZE, NODE_LINK_SIZE};
use crate::merkle::proof::Proof;
use crate::utils::codec;
use crate::utils::hasher::{self, Hash32};

/// Host-side handle of a mountain range node.
pub type NodeKey = u64;

/// Read access to host-allocated nodes.
#[auto_impl(&, &mut, Box)]
pub trait NodeStore {
    /// Payload written by [`DistributedMmr::append`] for this node.
    fn node_data(&self, key: NodeKey) -> &[u8];

    /// Leaf hash the node was appended with.
    fn node_hash(&self, key: NodeKey) -> Hash32;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DistributedMmr {
    count: u64,
    last: NodeKey,
}

fn link_count(n: u64) -> usize {
    let t = n.trailing_ones();
    (0..=t).take_while(|&h| h < 64 && (1u64 << h) <= n).count()
}

fn read_link(data: &[u8], n: u64, h: u32) -> NodeKey {
    let off = n.trailing_ones() as usize * HASH_SIZE + h as usize * NODE_LINK_SIZE;
    codec::decode_le_u64(&data[off..])
}

fn read_hash(data: &[u8], height: u8) -> Hash32 {
    let off = (height as usize - 1) * HASH_SIZE;
    let mut res = [0u8; HASH_SIZE];
    res.copy_from_slice(&data[off..off + HASH_SIZE]);
    res
}

impl DistributedMmr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes a range of `count` leaves whose last node is `last`.
    pub fn from_parts(count: u64, last: NodeKey) -> Self {
        Self { count, last }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Key of the most recently appended node. Meaningless for an empty range.
    pub fn last_key(&self) -> NodeKey {
        self.last
    }

    /// Size of the payload the host must allocate for the next node of a
    /// range currently holding `count` leaves.
    pub fn node_size(count: u64) -> usize {
        count.trailing_ones() as usize * HASH_SIZE + link_count(count) * NODE_LINK_SIZE
    }

    /// Appends a leaf whose node the host has allocated under `key`.
    ///
    /// # Arguments
    /// * `store` - The host nodes appended so far
    /// * `key` - Key of the new node; it is not read during the call
    /// * `data` - Payload of the new node, `node_size(self.count())` bytes
    /// * `leaf` - Leaf hash; the host must report it as `node_hash(key)`
    ///
    /// # Panics
    /// If `data` has the wrong size.
    pub fn append<S: NodeStore + ?Sized>(
        &mut self,
        store: &S,
        key: NodeKey,
        data: &mut [u8],
        leaf: &Hash32,
    ) {
        let n = self.count;
        let t = n.trailing_ones();
        assert_eq!(data.len(), Self::node_size(n), "node payload size");

        // links[h] is the key of leaf n - 2^h; the node of that leaf has
        // h - 1 trailing ones, so its last link leads one step further
        let links = link_count(n);
        let links_off = t as usize * HASH_SIZE;
        let mut link_keys = Vec::with_capacity(links);
        for h in 0..links as u32 {
            let k = if h == 0 {
                self.last
            } else {
                let from = n - (1u64 << (h - 1));
                read_link(store.node_data(link_keys[h as usize - 1]), from, h - 1)
            };
            let off = links_off + h as usize * NODE_LINK_SIZE;
            codec::write_le_u64(&mut data[off..], k);
            link_keys.push(k);
        }

        let mut acc = *leaf;
        for h in 1..=t {
            let left_key = link_keys[h as usize - 1];
            let left = if h == 1 {
                store.node_hash(left_key)
            } else {
                read_hash(store.node_data(left_key), (h - 1) as u8)
            };
            acc = hasher::hash2(&left, &acc);
            let off = (h as usize - 1) * HASH_SIZE;
            data[off..off + HASH_SIZE].copy_from_slice(&acc);
        }

        self.count += 1;
        self.last = key;
    }

    /// Finds the key of leaf `target` by jumping backwards from the last leaf.
    pub fn key_of_leaf<S: NodeStore + ?Sized>(&self, store: &S, target: u64) -> NodeKey {
        assert!(target < self.count, "leaf {} out of {}", target, self.count);
        let mut cur = self.count - 1;
        let mut key = self.last;
        while cur != target {
            let links = link_count(cur) as u32;
            let h = (0..links)
                .rev()
                .find(|&h| cur - (1u64 << h) >= target)
                .expect("link 0 always reaches the previous leaf");
            key = read_link(store.node_data(key), cur, h);
            cur -= 1u64 << h;
        }
        key
    }

    /// Hash of the existing node `(height, index)`.
    pub fn get_node_hash<S: NodeStore + ?Sized>(&self, store: &S, height: u8, index: u64) -> Hash32 {
        debug_assert!(node_exists(self.count, height, index));
        let last_leaf = ((index + 1) << height) - 1;
        let key = self.key_of_leaf(store, last_leaf);
        if height == 0 {
            store.node_hash(key)
        } else {
            read_hash(store.node_data(key), height)
        }
    }

    /// Peak hashes, leftmost first, collected along the links between peaks.
    fn peak_hashes<S: NodeStore + ?Sized>(&self, store: &S) -> Vec<Hash32> {
        let mut res = Vec::with_capacity(self.count.count_ones() as usize);
        if self.count == 0 {
            return res;
        }
        let mut cur = self.count - 1;
        let mut key = self.last;
        loop {
            let h = cur.trailing_ones();
            let hash = if h == 0 {
                store.node_hash(key)
            } else {
                read_hash(store.node_data(key), h as u8)
            };
            res.push(hash);
            if cur < (1u64 << h) {
                break;
            }
            key = read_link(store.node_data(key), cur, h);
            cur -= 1u64 << h;
        }
        res.reverse();
        res
    }

    pub fn get_hash<S: NodeStore + ?Sized>(&self, store: &S) -> Hash32 {
        fold_peaks(&self.peak_hashes(store))
    }

    pub fn get_predicted_hash<S: NodeStore + ?Sized>(&self, store: &S, leaf: &Hash32) -> Hash32 {
        predict_root(&self.peak_hashes(store), self.count, leaf)
    }

    pub fn get_proof<S: NodeStore + ?Sized>(&self, store: &S, index: u64) -> Option<Proof> {
        build_proof(self.count, index, |h, i| self.get_node_hash(store, h, i))
    }

    /// Number of peaks, for diagnostics.
    pub fn peak_count(&self) -> usize {
        peak_positions(self.count).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::mmr::{ArrayMmr, Mmr};
    use crate::test_helper::{random_hash, VecNodeMmr};

    #[test]
    fn test_node_size() {
        assert_eq!(0, DistributedMmr::node_size(0));
        // leaf 1: link to 0, one hash
        assert_eq!(HASH_SIZE + NODE_LINK_SIZE, DistributedMmr::node_size(1));
        // leaf 2: link to 1
        assert_eq!(NODE_LINK_SIZE, DistributedMmr::node_size(2));
        // leaf 3: links to 2 and 1, t = 2 but leaf -1 does not exist
        assert_eq!(2 * HASH_SIZE + 2 * NODE_LINK_SIZE, DistributedMmr::node_size(3));
        // leaf 7: links to 6, 5, 3; three hashes
        assert_eq!(3 * HASH_SIZE + 3 * NODE_LINK_SIZE, DistributedMmr::node_size(7));
        // leaf 11: links to 10, 9, 7
        assert_eq!(2 * HASH_SIZE + 3 * NODE_LINK_SIZE, DistributedMmr::node_size(11));
    }

    #[test]
    fn test_matches_array() {
        let mut array = ArrayMmr::new();
        let mut dmmr = VecNodeMmr::new();
        for i in 0..77u64 {
            let leaf = random_hash(i);
            assert_eq!(
                array.get_predicted_hash(&leaf),
                dmmr.get_predicted_hash(&leaf)
            );
            array.append(&leaf);
            dmmr.append(&leaf);
            assert_eq!(array.get_hash(), dmmr.get_hash());
            assert_eq!(array.get_proof(i), dmmr.get_proof(i));
        }
        for i in 0..77u64 {
            assert_eq!(array.get_proof(i), dmmr.get_proof(i));
            assert_eq!(dmmr.key_for(i), dmmr.mmr.key_of_leaf(&dmmr.store, i));
        }
        assert!(dmmr.get_proof(77).is_none());
        assert_eq!(4, dmmr.mmr.peak_count());
    }

    #[test]
    fn test_resume_from_parts() {
        let mut dmmr = VecNodeMmr::new();
        for i in 0..9u64 {
            dmmr.append(&random_hash(i));
        }
        let root = dmmr.get_hash();
        let resumed = DistributedMmr::from_parts(dmmr.mmr.count(), dmmr.mmr.last_key());
        assert_eq!(root, resumed.get_hash(&dmmr.store));
    }
}
