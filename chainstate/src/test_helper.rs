//! Fixtures shared by unit and integration tests.
//!
//! - [`CounterHost`]: a patch host whose header is an array of counters and
//!   whose patches add a delta to one counter
//! - [`VecNodeMmr`]: a node-referenced mountain range with its nodes kept in
//!   a map, exposed through the common [`Mmr`] trait
//! - deterministic pseudo-random hashes and keys

use std::collections::HashMap;

use crate::def::KEY_SIZE;
use crate::merkle::mmr::{DistributedMmr, Mmr, NodeKey, NodeStore};
use crate::merkle::proof::Proof;
use crate::navigator::{ChainNavigator, MappingDefs, NavigatorError, Offset, PatchHost, TagInfo};
use crate::utils::codec;
use crate::utils::hasher::{self, Hash32};
use crate::utxotree::Key;

/// Reproducible pseudo-random hash.
pub fn random_hash(seed: u64) -> Hash32 {
    hasher::hash(seed.to_le_bytes())
}

/// Reproducible pseudo-random UTXO key.
pub fn random_key(seed: u64) -> Key {
    let a = random_hash(seed);
    let b = hasher::hash(a);
    let mut bz = [0u8; KEY_SIZE];
    bz[..32].copy_from_slice(&a);
    bz[32..].copy_from_slice(&b[..KEY_SIZE - 32]);
    Key(bz)
}

/// Patch host over a header of little-endian `u32` counters.
///
/// A patch is a counter index (`u32` LE) followed by a signed delta
/// (`i32` LE); applying it backwards subtracts the delta.
#[derive(Debug, Default)]
pub struct CounterHost {
    /// Number of patch applications, both directions
    pub applied: u64,
}

impl CounterHost {
    pub const COUNTERS: usize = 30;
    pub const PATCH_SIZE: usize = 8;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode_patch(idx: u32, delta: i32) -> [u8; 8] {
        let mut bz = [0u8; 8];
        bz[..4].copy_from_slice(&idx.to_le_bytes());
        bz[4..].copy_from_slice(&delta.to_le_bytes());
        bz
    }

    /// Decodes the counters of a header.
    pub fn counters(hdr: &[u8]) -> Vec<u32> {
        hdr.chunks_exact(4).map(codec::decode_le_u32).collect()
    }
}

impl PatchHost for CounterHost {
    fn adjust_defs(&self, defs: &mut MappingDefs) {
        defs.banks = 1;
        defs.fixed_hdr_size = Self::COUNTERS * 4;
    }

    fn apply(&mut self, hdr: &mut [u8], patch: &[u8], fwd: bool) {
        let idx = codec::decode_le_u32(patch) as usize;
        let delta = codec::decode_le_u32(&patch[4..]);
        let slot = &mut hdr[idx * 4..idx * 4 + 4];
        let value = codec::decode_le_u32(slot);
        let value = if fwd {
            value.wrapping_add(delta)
        } else {
            value.wrapping_sub(delta)
        };
        slot.copy_from_slice(&value.to_le_bytes());
        self.applied += 1;
    }
}

/// Allocates, fills and commits a counter patch at the cursor.
pub fn commit_delta<H: PatchHost>(
    nav: &mut ChainNavigator<H>,
    idx: u32,
    delta: i32,
) -> Result<Offset, NavigatorError> {
    let off = nav.allocate(0, CounterHost::PATCH_SIZE)?;
    nav.patch_mut(off)?
        .copy_from_slice(&CounterHost::encode_patch(idx, delta));
    if let Err(err) = nav.commit(off) {
        nav.free(off)?;
        return Err(err);
    }
    Ok(off)
}

/// Tag description whose ordering key grows with `n`.
pub fn tag_info(n: u64) -> TagInfo {
    TagInfo {
        hash: random_hash(n),
        difficulty: n,
        height: n,
    }
}

/// Host node storage for [`DistributedMmr`] keyed by sparse handles.
#[derive(Debug, Default)]
pub struct VecNodeStore {
    nodes: HashMap<NodeKey, (Hash32, Vec<u8>)>,
}

impl VecNodeStore {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeStore for VecNodeStore {
    fn node_data(&self, key: NodeKey) -> &[u8] {
        &self.nodes[&key].1
    }

    fn node_hash(&self, key: NodeKey) -> Hash32 {
        self.nodes[&key].0
    }
}

#[derive(Debug, Default)]
pub struct VecNodeMmr {
    pub store: VecNodeStore,
    pub mmr: DistributedMmr,
    keys: Vec<NodeKey>,
}

impl VecNodeMmr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the host assigned to leaf `index`.
    pub fn key_for(&self, index: u64) -> NodeKey {
        self.keys[index as usize]
    }
}

impl Mmr for VecNodeMmr {
    fn count(&self) -> u64 {
        self.mmr.count()
    }

    fn append(&mut self, leaf: &Hash32) {
        let key = 0x1000 + 16 * self.keys.len() as NodeKey;
        let mut data = vec![0u8; DistributedMmr::node_size(self.mmr.count())];
        self.mmr.append(&self.store, key, &mut data, leaf);
        self.store.nodes.insert(key, (*leaf, data));
        self.keys.push(key);
    }

    fn get_hash(&self) -> Hash32 {
        self.mmr.get_hash(&self.store)
    }

    fn get_predicted_hash(&self, leaf: &Hash32) -> Hash32 {
        self.mmr.get_predicted_hash(&self.store, leaf)
    }

    fn get_proof(&self, index: u64) -> Option<Proof> {
        self.mmr.get_proof(&self.store, index)
    }
}
