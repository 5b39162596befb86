//! Mountain range keeping every node through an element store.
//!
//! The accumulator itself only tracks the leaf count; nodes are saved and
//! loaded by `(index, height)` through an [`ElementStore`]. The in-memory
//! [`HeightVecStore`] keeps one vector per height, which makes [`ArrayMmr`]
//! the reference variant: it can prove any leaf.

use super::{build_proof, fold_peaks, node_exists, peak_positions, predict_root, Mmr};
use crate::merkle::proof::Proof;
use crate::utils::hasher::{self, Hash32, ZERO_HASH32};

/// Persistence of mountain range nodes addressed by `(index, height)`.
pub trait ElementStore {
    /// Loads the hash of an existing node.
    ///
    /// # Panics
    /// Implementations may panic if the node was never saved.
    fn load_element(&self, index: u64, height: u8) -> Hash32;

    /// Saves the hash of a node, overwriting any previous value.
    fn save_element(&mut self, hash: &Hash32, index: u64, height: u8);
}

/// In-memory element store with one vector per height.
#[derive(Debug, Default, Clone)]
pub struct HeightVecStore {
    levels: Vec<Vec<Hash32>>,
}

impl HeightVecStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes stored at `height`.
    pub fn level_len(&self, height: u8) -> usize {
        self.levels.get(height as usize).map_or(0, |l| l.len())
    }
}

impl ElementStore for HeightVecStore {
    fn load_element(&self, index: u64, height: u8) -> Hash32 {
        self.levels[height as usize][index as usize]
    }

    fn save_element(&mut self, hash: &Hash32, index: u64, height: u8) {
        let h = height as usize;
        if self.levels.len() <= h {
            self.levels.resize_with(h + 1, Vec::new);
        }
        let level = &mut self.levels[h];
        let i = index as usize;
        if level.len() <= i {
            level.resize(i + 1, ZERO_HASH32);
        }
        level[i] = *hash;
    }
}

/// A mountain range whose nodes all live in an [`ElementStore`].
#[derive(Debug, Default, Clone)]
pub struct StoredMmr<S> {
    store: S,
    count: u64,
}

/// The array-backed mountain range.
pub type ArrayMmr = StoredMmr<HeightVecStore>;

impl ArrayMmr {
    pub fn new() -> Self {
        Self::with_store(HeightVecStore::new(), 0)
    }
}

impl<S: ElementStore> StoredMmr<S> {
    /// Wraps a store already holding the nodes of `count` leaves.
    pub fn with_store(store: S, count: u64) -> Self {
        Self { store, count }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Hash of an existing node.
    pub fn get_node_hash(&self, height: u8, index: u64) -> Hash32 {
        debug_assert!(node_exists(self.count, height, index));
        self.store.load_element(index, height)
    }

    fn peak_hashes(&self) -> Vec<Hash32> {
        peak_positions(self.count)
            .into_iter()
            .map(|(h, i)| self.store.load_element(i, h))
            .collect()
    }
}

impl<S: ElementStore> Mmr for StoredMmr<S> {
    fn count(&self) -> u64 {
        self.count
    }

    fn append(&mut self, leaf: &Hash32) {
        let mut acc = *leaf;
        let mut index = self.count;
        let mut height = 0u8;
        self.store.save_element(&acc, index, height);
        // a right child completes its parent
        while index & 1 == 1 {
            let left = self.store.load_element(index ^ 1, height);
            acc = hasher::hash2(&left, &acc);
            index >>= 1;
            height += 1;
            self.store.save_element(&acc, index, height);
        }
        self.count += 1;
    }

    fn get_hash(&self) -> Hash32 {
        fold_peaks(&self.peak_hashes())
    }

    fn get_predicted_hash(&self, leaf: &Hash32) -> Hash32 {
        predict_root(&self.peak_hashes(), self.count, leaf)
    }

    fn get_proof(&self, index: u64) -> Option<Proof> {
        build_proof(self.count, index, |h, i| self.store.load_element(i, h))
    }
}
