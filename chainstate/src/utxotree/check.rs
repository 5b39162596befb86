//! Consistency checks for the UTXO tree.
//!
//! These walk the whole tree and verify that:
//! 1. Every cached hash matches its children (or its leaf content)
//! 2. Discriminating bits grow strictly from the root down
//! 3. Each joint splits its keys exactly at its bit
//! 4. The maintained key count matches the number of leaves

use super::key::Key;
use super::tree::{NodeId, NodeKind, UtxoTree};
use crate::utils::hasher::{self, Hash32, ZERO_HASH32};

/// Verifies that two hashes are equal.
///
/// # Panics
/// Panics with `tag` in the message if they differ
pub fn hash_equal(tag: &str, a: &Hash32, b: &Hash32) {
    if a != b {
        panic!(
            "{} Not Equal: {} {}",
            tag,
            hasher::to_hex(a),
            hasher::to_hex(b)
        );
    }
}

/// Refreshes the tree hash and checks every node of the tree.
///
/// # Panics
/// Panics on the first inconsistency found
pub fn check_hash_consistency(tree: &mut UtxoTree) {
    let root_hash = tree.get_hash();
    match tree.root {
        None => {
            hash_equal("empty root", &root_hash, &ZERO_HASH32);
            assert_eq!(0, tree.count(), "empty tree with non-zero count");
        }
        Some(root) => {
            let (hash, leaves, _) = check_node(tree, root, None);
            hash_equal("root", &hash, &root_hash);
            assert_eq!(leaves, tree.count(), "leaf count mismatch");
        }
    }
}

// returns the recomputed hash, the number of leaves and one key of the subtree
fn check_node(tree: &UtxoTree, id: NodeId, parent_bit: Option<u16>) -> (Hash32, u64, Key) {
    let node = tree.node(id);
    assert!(!node.dirty, "node {} still dirty after refresh", id);
    match &node.kind {
        NodeKind::Leaf(leaf) => {
            hash_equal(&format!("leaf {}", id), &leaf.hash(), &node.hash);
            (node.hash, 1, leaf.key)
        }
        NodeKind::Joint { bit, children } => {
            if let Some(pb) = parent_bit {
                assert!(*bit > pb, "bit {} of node {} not below parent bit {}", bit, id, pb);
            }
            let (hl, nl, kl) = check_node(tree, children[0], Some(*bit));
            let (hr, nr, kr) = check_node(tree, children[1], Some(*bit));
            assert_eq!(
                Some(*bit as usize),
                kl.crit_bit(&kr),
                "node {} does not split at its bit",
                id
            );
            assert_eq!(0, kl.bit(*bit as usize), "left key of node {}", id);
            hash_equal(&format!("joint {}", id), &hasher::hash2(&hl, &hr), &node.hash);
            (node.hash, nl + nr, kl)
        }
        NodeKind::Free => panic!("free node {} reachable", id),
    }
}
