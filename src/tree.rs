//! The compressed trie (radix tree) keyed on token IDs.
//!
//! Mirrors `sglang`'s `RadixCache` tree operations (longest-prefix match,
//! split-on-insert, leaf collection) but stores nodes in an arena indexed
//! by [`NodeId`] instead of `Rc<RefCell<TreeNode>>`, per the design notes
//! in `SPEC_FULL.md`.

use std::collections::HashMap;

use log::trace;

use crate::errors::CacheError;
use crate::node::{NodeId, SlotIndex, TokenId, TreeNode};

fn common_prefix_len(a: &[TokenId], b: &[TokenId]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// The radix tree itself. Owns the node arena and the aggregate
/// `evictable_size` counter; pinning and eviction are implemented as
/// free functions over `&mut PrefixTree` in [`crate::pin`] and
/// [`crate::evict`] so that each concern stays in its own module, the
/// way the teacher splits tree/query/store responsibilities.
pub struct PrefixTree {
    arena: Vec<Option<TreeNode>>,
    free_list: Vec<NodeId>,
    clock: u64,
    pub(crate) evictable_size: usize,
}

impl Default for PrefixTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefixTree {
    pub fn new() -> Self {
        let mut tree = PrefixTree {
            arena: Vec::new(),
            free_list: Vec::new(),
            clock: 0,
            evictable_size: 0,
        };
        let now = tree.tick();
        tree.arena.push(Some(TreeNode::root(now)));
        tree
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        self.arena[id.index()]
            .as_ref()
            .expect("NodeId referenced a freed arena slot")
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        self.arena[id.index()]
            .as_mut()
            .expect("NodeId referenced a freed arena slot")
    }

    pub fn evictable_size(&self) -> usize {
        self.evictable_size
    }

    /// Sum of `|node.value|` across the whole tree (root contributes 0).
    pub fn total_size(&self) -> usize {
        self.total_size_from(NodeId::ROOT)
    }

    fn total_size_from(&self, id: NodeId) -> usize {
        let node = self.node(id);
        let mut total = node.len();
        for child in node.children.values() {
            total += self.total_size_from(*child);
        }
        total
    }

    /// Iterative DFS returning every node with no children. The root is
    /// included iff the tree is empty (no children at all).
    pub fn collect_leaves(&self) -> Vec<NodeId> {
        let mut stack = vec![NodeId::ROOT];
        let mut leaves = Vec::new();
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.is_leaf() {
                leaves.push(id);
            } else {
                stack.extend(node.children.values().copied());
            }
        }
        leaves
    }

    /// Walk from the root following children keyed by the current first
    /// token; splits a child in place when the match ends mid-edge.
    /// Returns the concatenated matched values and the deepest node
    /// whose cumulative label equals the matched prefix.
    pub fn match_prefix(&mut self, key: &[TokenId]) -> (Vec<SlotIndex>, NodeId) {
        let mut values = Vec::new();
        let mut cur = NodeId::ROOT;
        let mut offset = 0usize;
        let now = self.tick();
        self.node_mut(cur).last_access_time = now;

        while offset < key.len() {
            let first = key[offset];
            let child = match self.node(cur).children.get(&first) {
                Some(c) => *c,
                None => break,
            };

            let remaining = &key[offset..];
            let child_key_len = self.node(child).key.len();
            let p = common_prefix_len(&self.node(child).key, remaining);

            if p < child_key_len {
                let upper = self.split(child, p).expect("split at matched lcp is in-bounds");
                values.extend_from_slice(&self.node(upper).value);
                cur = upper;
                break;
            }

            values.extend_from_slice(&self.node(child).value);
            self.node_mut(child).last_access_time = now;
            cur = child;
            offset += p;
        }

        (values, cur)
    }

    /// Install `(key, value)` along the path from the root. Returns the
    /// length of the prefix of `key` that was already present.
    pub fn insert(&mut self, key: &[TokenId], value: &[SlotIndex]) -> Result<usize, CacheError> {
        if key.len() != value.len() {
            return Err(CacheError::MismatchedKeyValue {
                key_len: key.len(),
                value_len: value.len(),
            });
        }
        self.insert_at(NodeId::ROOT, key, value)
    }

    fn insert_at(
        &mut self,
        node: NodeId,
        key: &[TokenId],
        value: &[SlotIndex],
    ) -> Result<usize, CacheError> {
        let now = self.tick();
        self.node_mut(node).last_access_time = now;

        if key.is_empty() {
            return Ok(0);
        }

        let first = key[0];
        let existing_child = self.node(node).children.get(&first).copied();

        let Some(child) = existing_child else {
            let leaf = TreeNode::leaf(key.to_vec(), value.to_vec(), node, now);
            let leaf_len = leaf.len();
            let id = self.alloc(leaf);
            self.node_mut(node).children.insert(first, id);
            self.evictable_size += leaf_len;
            trace!("insert: created leaf {:?} under {:?} ({} tokens)", id, node, leaf_len);
            return Ok(0);
        };

        let p = common_prefix_len(&self.node(child).key, key);
        let child_key_len = self.node(child).key.len();

        if p == child_key_len {
            if p == key.len() {
                return Ok(p);
            }
            let rest = self.insert_at(child, &key[p..], &value[p..])?;
            return Ok(p + rest);
        }

        let upper = self.split(child, p)?;
        let rest = self.insert_at(upper, &key[p..], &value[p..])?;
        Ok(p + rest)
    }

    /// Insert a new node `u` between `child.parent` and `child`, carrying
    /// `child.key[:p]`/`child.value[:p]`. `child` is shortened to the
    /// tail. `evictable_size` is unchanged: the same evictable value is
    /// redistributed across two nodes instead of one.
    fn split(&mut self, child: NodeId, p: usize) -> Result<NodeId, CacheError> {
        let (full_key, full_value, parent, lock_ref) = {
            let node = self.node(child);
            if p == 0 || p >= node.key.len() {
                return Err(CacheError::CorruptedTree("invalid split position"));
            }
            debug_assert!(!node.is_root(), "split is never called on the root");
            (
                node.key.clone(),
                node.value.clone(),
                node.parent.expect("split is never called on the root"),
                node.lock_ref,
            )
        };

        let now = self.tick();
        let mut upper = TreeNode::leaf(full_key[..p].to_vec(), full_value[..p].to_vec(), parent, now);
        // `upper` inherits `child.lock_ref` so a split never crosses a
        // pin boundary (§4.C).
        upper.lock_ref = lock_ref;
        let upper_id = self.alloc(upper);

        let old_edge = full_key[0];
        self.node_mut(parent).children.insert(old_edge, upper_id);

        let new_edge = full_key[p];
        {
            let node = self.node_mut(child);
            node.key = full_key[p..].to_vec();
            node.value = full_value[p..].to_vec();
            node.parent = Some(upper_id);
        }
        self.node_mut(upper_id).children.insert(new_edge, child);

        trace!("split: {:?} at {} -> upper {:?}", child, p, upper_id);
        Ok(upper_id)
    }

    fn alloc(&mut self, node: TreeNode) -> NodeId {
        if let Some(id) = self.free_list.pop() {
            self.arena[id.index()] = Some(node);
            id
        } else {
            let id = NodeId(self.arena.len() as u32);
            self.arena.push(Some(node));
            id
        }
    }

    /// Remove a leaf from its parent's children map and return its
    /// arena slot to the free list. Does not touch `evictable_size` for
    /// the freed value; callers (the evictor) account for that
    /// themselves, since the exact accounting differs between a normal
    /// eviction (`evictable_size -= |value|`, already unpinned) and
    /// `reset` (which discards the whole tree without walking it).
    pub(crate) fn delete_leaf(&mut self, id: NodeId) -> Result<NodeId, CacheError> {
        debug_assert!(self.node(id).is_leaf(), "delete_leaf called on a non-leaf");
        debug_assert!(!self.node(id).is_root(), "delete_leaf called on the root");
        let parent = self
            .node(id)
            .parent
            .ok_or(CacheError::CorruptedTree("attempted to delete the root"))?;
        let edge = *self
            .node(id)
            .key
            .first()
            .ok_or(CacheError::CorruptedTree("leaf has an empty key"))?;
        self.node_mut(parent).children.remove(&edge);
        self.arena[id.index()] = None;
        self.free_list.push(id);
        Ok(parent)
    }

    /// Drop the entire tree and re-initialize with a fresh root.
    /// Slots previously held are *not* returned through any callback.
    pub fn reset(&mut self) {
        self.arena.clear();
        self.free_list.clear();
        self.evictable_size = 0;
        self.clock = 0;
        let now = self.tick();
        self.arena.push(Some(TreeNode::root(now)));
    }

    /// The children of `id`, keyed by first token. Exposed for callers
    /// that want to walk the tree for diagnostics or invariant-checking
    /// without reaching into arena internals.
    pub fn children_of(&self, id: NodeId) -> &HashMap<TokenId, NodeId> {
        &self.node(id).children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_matches_nothing() {
        let mut tree = PrefixTree::new();
        let (values, last_node) = tree.match_prefix(&[]);
        assert!(values.is_empty());
        assert_eq!(last_node, NodeId::ROOT);
    }

    #[test]
    fn insert_then_match_returns_full_value() {
        let mut tree = PrefixTree::new();
        tree.insert(&[1, 2, 3, 4], &[10, 11, 12, 13]).unwrap();
        let (values, _) = tree.match_prefix(&[1, 2, 3]);
        assert_eq!(values, vec![10, 11, 12]);
    }

    #[test]
    fn split_on_insert_matches_scenario_1() {
        let mut tree = PrefixTree::new();
        assert_eq!(tree.insert(&[1, 2, 3, 4], &[10, 11, 12, 13]).unwrap(), 0);
        assert_eq!(tree.insert(&[1, 2, 5], &[20, 21, 22]).unwrap(), 2);
        assert_eq!(tree.total_size(), 5);

        let (values, _) = tree.match_prefix(&[1, 2, 3]);
        assert_eq!(values, vec![10, 11, 12]);
    }

    #[test]
    fn insert_is_idempotent_in_content() {
        let mut tree = PrefixTree::new();
        tree.insert(&[1, 2, 3], &[1, 2, 3]).unwrap();
        let before = tree.total_size();
        let again = tree.insert(&[1, 2, 3], &[9, 9, 9]).unwrap();
        assert_eq!(again, 3);
        assert_eq!(tree.total_size(), before);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut tree = PrefixTree::new();
        let err = tree.insert(&[1, 2], &[1]).unwrap_err();
        assert_eq!(
            err,
            CacheError::MismatchedKeyValue {
                key_len: 2,
                value_len: 1
            }
        );
    }
}
