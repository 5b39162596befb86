//! The merkelized crit-bit tree over packed UTXO keys.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. A joint
//! records the first key bit in which its two subtrees differ; bits grow
//! strictly along every root-to-leaf path. The shape therefore depends only
//! on the key set, and so does the root hash.
//!
//! Hashes are cached per node and recomputed lazily: mutations only mark the
//! touched path dirty, and [`UtxoTree::get_hash`] / [`UtxoTree::get_proof`]
//! refresh what is stale.

use std::io::{Read, Write};

use anyhow::bail;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use smallvec::SmallVec;

use super::key::Key;
use crate::def::{KEY_SIZE, UTXO_RECORD_SIZE};
use crate::merkle::proof::Proof;
use crate::utils::hasher::{self, Hash32, ZERO_HASH32};

pub type NodeId = u32;

/// Host payload attached to every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UtxoValue {
    /// Number of identical outputs sharing the key
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoLeaf {
    pub key: Key,
    pub value: UtxoValue,
}

impl UtxoLeaf {
    /// Digest binding the key to its value.
    pub fn hash(&self) -> Hash32 {
        hasher::hash_concat(&[self.key.as_bytes(), &self.value.count.to_le_bytes()])
    }
}

#[derive(Debug, Clone)]
pub(super) enum NodeKind {
    Leaf(UtxoLeaf),
    Joint { bit: u16, children: [NodeId; 2] },
    Free,
}

#[derive(Debug, Clone)]
pub(super) struct Node {
    pub(super) kind: NodeKind,
    pub(super) hash: Hash32,
    pub(super) dirty: bool,
}

/// Search path recorded by a lookup.
///
/// A cursor is bound to the tree state it was produced in. Any insertion or
/// deletion through another cursor invalidates it.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    path: SmallVec<[NodeId; 64]>,
    generation: u64,
    found: bool,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last lookup reached a leaf with the searched key.
    pub fn is_found(&self) -> bool {
        self.found
    }

    /// Number of nodes from the root to the reached node.
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    fn reset(&mut self, generation: u64) {
        self.path.clear();
        self.generation = generation;
        self.found = false;
    }
}

#[derive(Debug, Clone, Default)]
pub struct UtxoTree {
    pub(super) nodes: Vec<Node>,
    free: Vec<NodeId>,
    pub(super) root: Option<NodeId>,
    count: u64,
    generation: u64,
}

impl UtxoTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Removes every key.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.count = 0;
        self.generation += 1;
    }

    pub(super) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub(super) fn joint_children(&self, id: NodeId) -> Option<[NodeId; 2]> {
        match &self.node(id).kind {
            NodeKind::Joint { children, .. } => Some(*children),
            NodeKind::Leaf(_) => None,
            NodeKind::Free => panic!("node {} is free", id),
        }
    }

    fn leaf(&self, id: NodeId) -> &UtxoLeaf {
        match &self.node(id).kind {
            NodeKind::Leaf(leaf) => leaf,
            _ => panic!("node {} is not a leaf", id),
        }
    }

    fn leaf_mut(&mut self, id: NodeId) -> &mut UtxoLeaf {
        match &mut self.nodes[id as usize].kind {
            NodeKind::Leaf(leaf) => leaf,
            _ => panic!("node {} is not a leaf", id),
        }
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            hash: ZERO_HASH32,
            dirty: true,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id as usize].kind = NodeKind::Free;
        self.free.push(id);
    }

    fn mark_dirty(&mut self, path: &[NodeId]) {
        for &id in path {
            self.nodes[id as usize].dirty = true;
        }
    }

    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: NodeId) {
        match parent {
            None => self.root = Some(new),
            Some(p) => match &mut self.nodes[p as usize].kind {
                NodeKind::Joint { children, .. } => {
                    let side = if children[0] == old { 0 } else { 1 };
                    assert_eq!(old, children[side], "child {} not under {}", old, p);
                    children[side] = new;
                }
                _ => panic!("parent {} is not a joint", p),
            },
        }
    }

    fn assert_valid(&self, cu: &Cursor) {
        assert_eq!(self.generation, cu.generation, "stale cursor");
        assert!(cu.found, "cursor does not point to a leaf");
    }

    /// Looks `key` up, recording the descent in `cu`.
    ///
    /// When the key is absent the cursor ends at the leaf sharing the
    /// longest prefix with it and is not marked found.
    pub fn find(&self, cu: &mut Cursor, key: &Key) -> Option<&UtxoLeaf> {
        cu.reset(self.generation);
        let mut id = self.root?;
        loop {
            cu.path.push(id);
            match &self.node(id).kind {
                NodeKind::Joint { bit, children } => id = children[key.bit(*bit as usize)],
                NodeKind::Leaf(leaf) => {
                    if leaf.key == *key {
                        cu.found = true;
                        return Some(leaf);
                    }
                    return None;
                }
                NodeKind::Free => panic!("free node {} reachable", id),
            }
        }
    }

    /// Looks `key` up and inserts it with a default value when absent.
    ///
    /// The path to the leaf is marked dirty either way, since the caller may
    /// modify the returned value.
    ///
    /// # Returns
    /// The value of the leaf and whether it was created
    pub fn find_or_create(&mut self, cu: &mut Cursor, key: &Key) -> (&mut UtxoValue, bool) {
        if self.find(cu, key).is_some() {
            self.mark_dirty(&cu.path);
            let id = *cu.path.last().expect("found leaf");
            return (&mut self.leaf_mut(id).value, false);
        }

        let leaf = self.alloc(NodeKind::Leaf(UtxoLeaf {
            key: *key,
            value: UtxoValue::default(),
        }));
        let Some(&nearest) = cu.path.last() else {
            self.root = Some(leaf);
            self.finish_insert(cu, 0, &[leaf]);
            return (&mut self.leaf_mut(leaf).value, true);
        };

        let bit = self
            .leaf(nearest)
            .key
            .crit_bit(key)
            .expect("absent key differs from its nearest leaf");
        // the new joint goes above the first path node discriminating a later bit
        let pos = cu
            .path
            .iter()
            .position(|&id| match &self.node(id).kind {
                NodeKind::Joint { bit: b, .. } => *b as usize > bit,
                _ => true,
            })
            .expect("path ends with a leaf");
        let displaced = cu.path[pos];
        let side = key.bit(bit);
        let mut children = [displaced; 2];
        children[side] = leaf;
        let joint = self.alloc(NodeKind::Joint {
            bit: bit as u16,
            children,
        });
        let parent = if pos == 0 { None } else { Some(cu.path[pos - 1]) };
        self.replace_child(parent, displaced, joint);
        self.finish_insert(cu, pos, &[joint, leaf]);
        (&mut self.leaf_mut(leaf).value, true)
    }

    fn finish_insert(&mut self, cu: &mut Cursor, keep: usize, tail: &[NodeId]) {
        cu.path.truncate(keep);
        cu.path.extend_from_slice(tail);
        self.mark_dirty(&cu.path);
        self.count += 1;
        self.generation += 1;
        cu.generation = self.generation;
        cu.found = true;
    }

    /// The leaf the cursor points to.
    pub fn leaf_at(&self, cu: &Cursor) -> &UtxoLeaf {
        self.assert_valid(cu);
        self.leaf(*cu.path.last().expect("found leaf"))
    }

    /// Mutable access to the value at the cursor; the leaf's path is marked
    /// dirty.
    pub fn value_mut(&mut self, cu: &Cursor) -> &mut UtxoValue {
        self.assert_valid(cu);
        self.mark_dirty(&cu.path);
        let id = *cu.path.last().expect("found leaf");
        &mut self.leaf_mut(id).value
    }

    /// Removes the leaf the cursor points to, collapsing its parent joint.
    ///
    /// # Panics
    /// If the cursor is stale or does not point to a leaf.
    pub fn delete(&mut self, cu: &mut Cursor) {
        self.assert_valid(cu);
        let n = cu.path.len();
        let leaf = cu.path[n - 1];
        if n == 1 {
            self.root = None;
        } else {
            let parent = cu.path[n - 2];
            let children = self.joint_children(parent).expect("parent of a leaf is a joint");
            let sibling = if children[0] == leaf { children[1] } else { children[0] };
            let grandparent = if n == 2 { None } else { Some(cu.path[n - 3]) };
            self.replace_child(grandparent, parent, sibling);
            self.release(parent);
            self.mark_dirty(&cu.path[..n - 2]);
        }
        self.release(leaf);
        self.count -= 1;
        self.generation += 1;
        cu.reset(self.generation);
    }

    fn refresh(&mut self, id: NodeId) -> Hash32 {
        let node = self.node(id);
        if !node.dirty {
            return node.hash;
        }
        let hash = match self.joint_children(id) {
            Some([left, right]) => {
                let hl = self.refresh(left);
                let hr = self.refresh(right);
                hasher::hash2(&hl, &hr)
            }
            None => self.leaf(id).hash(),
        };
        let node = &mut self.nodes[id as usize];
        node.hash = hash;
        node.dirty = false;
        hash
    }

    /// Root hash; the zero hash for an empty tree.
    pub fn get_hash(&mut self) -> Hash32 {
        match self.root {
            None => ZERO_HASH32,
            Some(root) => self.refresh(root),
        }
    }

    /// Inclusion proof of the leaf the cursor points to, leaf level first.
    pub fn get_proof(&mut self, cu: &Cursor) -> Proof {
        self.assert_valid(cu);
        self.get_hash();
        let mut proof = Proof::with_capacity(cu.path.len() - 1);
        for pair in cu.path.windows(2).rev() {
            let (parent, child) = (pair[0], pair[1]);
            let children = self.joint_children(parent).expect("inner path node is a joint");
            let peer_at_right = children[0] == child;
            let peer = if peer_at_right { children[1] } else { children[0] };
            proof.push(self.node(peer).hash, peer_at_right);
        }
        proof
    }

    /// Leaves in key order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            tree: self,
            stack: self.root.into_iter().collect(),
        }
    }

    /// Visits, in key order, the leaves with `min <= key <= max`.
    ///
    /// Subtrees whose common prefix puts them outside the bounds are skipped.
    ///
    /// # Returns
    /// `false` if the visitor stopped the traversal by returning `false`
    pub fn traverse<F>(&self, min: &Key, max: &Key, mut visitor: F) -> bool
    where
        F: FnMut(&UtxoLeaf) -> bool,
    {
        match self.root {
            None => true,
            Some(root) => self.traverse_node(root, min, max, &mut visitor),
        }
    }

    fn any_leaf_key(&self, mut id: NodeId) -> &Key {
        while let Some(children) = self.joint_children(id) {
            id = children[0];
        }
        &self.leaf(id).key
    }

    fn traverse_node<F>(&self, id: NodeId, min: &Key, max: &Key, visitor: &mut F) -> bool
    where
        F: FnMut(&UtxoLeaf) -> bool,
    {
        match &self.node(id).kind {
            NodeKind::Leaf(leaf) => {
                if leaf.key < *min || leaf.key > *max {
                    return true;
                }
                visitor(leaf)
            }
            NodeKind::Joint { bit, children } => {
                for &child in children {
                    let prefix = self.any_leaf_key(child);
                    let nbits = *bit as usize + 1;
                    if prefix.masked(nbits, true) < *min || prefix.masked(nbits, false) > *max {
                        continue;
                    }
                    if !self.traverse_node(child, min, max, visitor) {
                        return false;
                    }
                }
                true
            }
            NodeKind::Free => panic!("free node {} reachable", id),
        }
    }

    /// Writes every (key, value) pair in key order.
    ///
    /// Layout: count as u64 LE, then per entry the packed key followed by
    /// the value count as u32 LE.
    pub fn save<W: Write>(&self, w: &mut W) -> anyhow::Result<()> {
        w.write_u64::<LittleEndian>(self.count)?;
        for leaf in self.iter() {
            w.write_all(leaf.key.as_bytes())?;
            w.write_u32::<LittleEndian>(leaf.value.count)?;
        }
        debug!("saved {} utxos", self.count);
        Ok(())
    }

    /// Replaces the content with the pairs written by [`UtxoTree::save`].
    ///
    /// The entries may come in any order; duplicated keys are rejected. On
    /// error the tree keeps its previous content.
    pub fn load<R: Read>(&mut self, r: &mut R) -> anyhow::Result<()> {
        let n = r.read_u64::<LittleEndian>()?;
        debug!("loading {} utxos, {} bytes", n, n.saturating_mul(UTXO_RECORD_SIZE as u64));
        let mut loaded = UtxoTree::new();
        let mut cu = Cursor::new();
        let mut bz = [0u8; KEY_SIZE];
        for _ in 0..n {
            r.read_exact(&mut bz)?;
            let count = r.read_u32::<LittleEndian>()?;
            let key = Key(bz);
            let (value, created) = loaded.find_or_create(&mut cu, &key);
            if !created {
                bail!("duplicate utxo key {}", key);
            }
            value.count = count;
        }
        // keep cursors of the replaced content stale
        loaded.generation = self.generation + 1;
        *self = loaded;
        info!("loaded {} utxos", n);
        Ok(())
    }
}

/// In-order iterator over the leaves of a [`UtxoTree`].
pub struct Iter<'a> {
    tree: &'a UtxoTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a UtxoLeaf;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = self.stack.pop()?;
            match self.tree.joint_children(id) {
                Some([left, right]) => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
                None => return Some(self.tree.leaf(id)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::proof::interpret;
    use crate::utxotree::check::check_hash_consistency;

    fn key_with(prefix: &[u8]) -> Key {
        let mut k = Key::MIN;
        k.0[..prefix.len()].copy_from_slice(prefix);
        k
    }

    fn insert(tree: &mut UtxoTree, key: &Key, count: u32) {
        let mut cu = Cursor::new();
        let (value, created) = tree.find_or_create(&mut cu, key);
        assert!(created);
        value.count = count;
    }

    #[test]
    fn test_empty_and_single() {
        let mut tree = UtxoTree::new();
        assert_eq!(ZERO_HASH32, tree.get_hash());
        let mut cu = Cursor::new();
        assert!(tree.find(&mut cu, &Key::MIN).is_none());
        assert_eq!(0, cu.depth());

        let k = key_with(&[1]);
        insert(&mut tree, &k, 3);
        let leaf = UtxoLeaf {
            key: k,
            value: UtxoValue { count: 3 },
        };
        assert_eq!(leaf.hash(), tree.get_hash());
        assert!(tree.find(&mut cu, &k).is_some());
        assert!(tree.get_proof(&cu).is_empty());

        tree.delete(&mut cu);
        assert_eq!(0, tree.count());
        assert_eq!(ZERO_HASH32, tree.get_hash());
    }

    #[test]
    fn test_shape_and_hash() {
        let a = key_with(&[0b0000_0000]);
        let b = key_with(&[0b0100_0000]);
        let c = key_with(&[0b1000_0000]);
        let mut tree = UtxoTree::new();
        for k in [&c, &a, &b] {
            insert(&mut tree, k, 1);
        }
        let h = |k: &Key| {
            UtxoLeaf {
                key: *k,
                value: UtxoValue { count: 1 },
            }
            .hash()
        };
        let expected = hasher::hash2(&hasher::hash2(&h(&a), &h(&b)), &h(&c));
        assert_eq!(expected, tree.get_hash());
        check_hash_consistency(&mut tree);

        let mut cu = Cursor::new();
        assert!(tree.find(&mut cu, &b).is_some());
        assert_eq!(3, cu.depth());
        let proof = tree.get_proof(&cu);
        assert_eq!(2, proof.len());
        assert_eq!(expected, interpret(&h(&b), &proof));

        let keys: Vec<Key> = tree.iter().map(|l| l.key).collect();
        assert_eq!(vec![a, b, c], keys);
    }

    #[test]
    fn test_absent_lookup_keeps_tree() {
        let mut tree = UtxoTree::new();
        insert(&mut tree, &key_with(&[1]), 1);
        insert(&mut tree, &key_with(&[2]), 1);
        let root = tree.get_hash();
        let mut cu = Cursor::new();
        assert!(tree.find(&mut cu, &key_with(&[3])).is_none());
        assert!(!cu.is_found());
        assert_eq!(2, cu.depth());
        assert_eq!(2, tree.count());
        assert_eq!(root, tree.get_hash());
    }

    #[test]
    fn test_value_mut_dirties_path() {
        let mut tree = UtxoTree::new();
        for i in 0..10u8 {
            insert(&mut tree, &key_with(&[i, i]), 1);
        }
        let before = tree.get_hash();
        let mut cu = Cursor::new();
        let k = key_with(&[7, 7]);
        tree.find(&mut cu, &k);
        tree.value_mut(&cu).count = 2;
        let after = tree.get_hash();
        assert_ne!(before, after);
        assert_eq!(2, tree.leaf_at(&cu).value.count);
        assert_eq!(after, interpret(&tree.leaf_at(&cu).hash(), &tree.get_proof(&cu)));
        check_hash_consistency(&mut tree);
    }

    #[test]
    #[should_panic(expected = "stale cursor")]
    fn test_stale_cursor() {
        let mut tree = UtxoTree::new();
        insert(&mut tree, &key_with(&[1]), 1);
        let mut cu = Cursor::new();
        tree.find(&mut cu, &key_with(&[1]));
        insert(&mut tree, &key_with(&[2]), 1);
        tree.delete(&mut cu);
    }

    #[test]
    fn test_traverse_bounds() {
        let mut tree = UtxoTree::new();
        for i in 0..50u8 {
            insert(&mut tree, &key_with(&[i * 3]), i as u32);
        }
        let mut seen = Vec::new();
        let done = tree.traverse(&key_with(&[10]), &key_with(&[40]), |leaf| {
            seen.push(leaf.key.0[0]);
            true
        });
        assert!(done);
        assert_eq!(vec![12, 15, 18, 21, 24, 27, 30, 33, 36, 39], seen);

        let mut n = 0;
        let done = tree.traverse(&Key::MIN, &Key::MAX, |_| {
            n += 1;
            n < 5
        });
        assert!(!done);
        assert_eq!(5, n);
    }

    #[test]
    fn test_save_load_rejects_duplicates() {
        let mut tree = UtxoTree::new();
        insert(&mut tree, &key_with(&[9]), 4);
        let mut bz = Vec::new();
        tree.save(&mut bz).unwrap();
        // claim two entries and repeat the first one
        let entry = bz[8..].to_vec();
        bz[0] = 2;
        bz.extend_from_slice(&entry);
        let mut other = UtxoTree::new();
        insert(&mut other, &key_with(&[1]), 2);
        insert(&mut other, &key_with(&[2]), 3);
        let root = other.get_hash();
        let err = other.load(&mut bz.as_slice()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
        assert_eq!(2, other.count());
        assert_eq!(root, other.get_hash());
        check_hash_consistency(&mut other);
    }
}
