//! The tree of branches.
//!
//! Tags are kept in a map from [`TagId`] to [`TagNode`]; each node knows its
//! parent and its ordered children. Siblings are sorted best first:
//! descending by difficulty, then height, then tag hash. Siblings with equal
//! ordering keys keep their insertion order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::mapping::Offset;
use crate::utils::hasher::Hash32;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(pub u64);

/// The implicit tag every branch descends from.
pub const ROOT_TAG: TagId = TagId(0);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host description of a branch.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TagInfo {
    /// Identifying hash of the branch tip
    pub hash: Hash32,
    /// Accumulated work of the branch
    pub difficulty: u64,
    pub height: u64,
}

impl TagInfo {
    fn order_key(&self) -> (u64, u64, Hash32) {
        (self.difficulty, self.height, self.hash)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TagNode {
    pub info: TagInfo,
    pub parent: Option<TagId>,
    /// Best first
    pub children: Vec<TagId>,
    /// Patches committed to this tag, oldest first
    pub patches: Vec<Offset>,
}

impl TagNode {
    fn new(info: TagInfo, parent: Option<TagId>) -> Self {
        Self {
            info,
            parent,
            children: Vec::new(),
            patches: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TagTree {
    nodes: BTreeMap<TagId, TagNode>,
    next_id: u64,
    cursor: TagId,
}

impl Default for TagTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TagTree {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_TAG, TagNode::new(TagInfo::default(), None));
        Self {
            nodes,
            next_id: ROOT_TAG.0 + 1,
            cursor: ROOT_TAG,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn cursor(&self) -> TagId {
        self.cursor
    }

    pub(super) fn set_cursor(&mut self, id: TagId) {
        debug_assert!(self.nodes.contains_key(&id));
        self.cursor = id;
    }

    pub fn get(&self, id: TagId) -> Option<&TagNode> {
        self.nodes.get(&id)
    }

    pub(super) fn get_mut(&mut self, id: TagId) -> Option<&mut TagNode> {
        self.nodes.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TagId, &TagNode)> {
        self.nodes.iter()
    }

    /// Children of `id`, best first; empty for an unknown tag.
    pub fn children(&self, id: TagId) -> &[TagId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// The sibling following `id` in its parent's order.
    pub fn next_sibling(&self, id: TagId) -> Option<TagId> {
        let parent = self.nodes.get(&id)?.parent?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    /// Adds a child of `parent`, placed by its ordering key.
    ///
    /// # Panics
    /// If `parent` does not exist.
    pub(super) fn insert_child(&mut self, parent: TagId, info: TagInfo) -> TagId {
        let id = TagId(self.next_id);
        self.next_id += 1;
        let key = info.order_key();
        let pos = {
            let siblings = &self.nodes[&parent].children;
            siblings
                .iter()
                .position(|c| self.nodes[c].info.order_key() < key)
                .unwrap_or(siblings.len())
        };
        self.nodes
            .get_mut(&parent)
            .expect("parent tag exists")
            .children
            .insert(pos, id);
        self.nodes.insert(id, TagNode::new(info, Some(parent)));
        id
    }

    /// Tags from the root down to `id`, both included.
    pub fn path_from_root(&self, id: TagId) -> Option<Vec<TagId>> {
        let mut path = vec![id];
        let mut cur = self.nodes.get(&id)?;
        while let Some(parent) = cur.parent {
            path.push(parent);
            cur = self.nodes.get(&parent)?;
        }
        path.reverse();
        Some(path)
    }

    /// Whether `ancestor` is `id` itself or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: TagId, id: TagId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.nodes.get(&c).and_then(|n| n.parent);
        }
        false
    }

    /// Detaches and returns the subtree rooted at `id`, parents before
    /// children.
    ///
    /// # Panics
    /// If `id` is the root or does not exist.
    pub(super) fn remove_subtree(&mut self, id: TagId) -> Vec<(TagId, TagNode)> {
        assert_ne!(ROOT_TAG, id, "root tag cannot be removed");
        let parent = self.nodes[&id].parent.expect("non-root tag has a parent");
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|&c| c != id);
        }
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let node = self.nodes.remove(&cur).expect("subtree tag exists");
            stack.extend(node.children.iter().rev());
            removed.push((cur, node));
        }
        removed
    }

    /// Checks parent/child links, sibling order, reachability and the cursor.
    pub fn check(&self) -> Result<(), String> {
        let root = self.nodes.get(&ROOT_TAG).ok_or("missing root tag")?;
        if root.parent.is_some() {
            return Err("root tag has a parent".to_string());
        }
        if !self.nodes.contains_key(&self.cursor) {
            return Err(format!("cursor {} does not exist", self.cursor));
        }
        let mut reached = 0usize;
        let mut stack = vec![ROOT_TAG];
        while let Some(id) = stack.pop() {
            reached += 1;
            if reached > self.nodes.len() {
                return Err("cycle in tag tree".to_string());
            }
            let node = &self.nodes[&id];
            for pair in node.children.windows(2) {
                let a = self.nodes.get(&pair[0]).ok_or(format!("missing child {}", pair[0]))?;
                let b = self.nodes.get(&pair[1]).ok_or(format!("missing child {}", pair[1]))?;
                if a.info.order_key() < b.info.order_key() {
                    return Err(format!("children of {} out of order", id));
                }
            }
            for &child in &node.children {
                let c = self.nodes.get(&child).ok_or(format!("missing child {}", child))?;
                if c.parent != Some(id) {
                    return Err(format!("tag {} does not point back to {}", child, id));
                }
                if child.0 >= self.next_id {
                    return Err(format!("tag {} beyond next id {}", child, self.next_id));
                }
                stack.push(child);
            }
        }
        if reached != self.nodes.len() {
            return Err(format!(
                "{} tags unreachable from the root",
                self.nodes.len() - reached
            ));
        }
        Ok(())
    }
}
