//! Pin/unpin along a root→node path.
//!
//! A node is pinned while any live request's `last_node` points at it or
//! a descendant. `evictable_size` only ever changes here, or inside
//! [`crate::tree::PrefixTree`]'s insert/split/delete paths — these are
//! the sole writers, per the invariant in `SPEC_FULL.md` §4.C.

use log::trace;

use crate::errors::CacheError;
use crate::node::NodeId;
use crate::tree::PrefixTree;

/// Walk from `node` up to (but not including) root, incrementing
/// `lock_ref` at each step. The first transition of a node's `lock_ref`
/// from 0 to 1 removes that node's value length from `evictable_size`.
pub fn pin(tree: &mut PrefixTree, node: NodeId) {
    let mut cur = node;
    while cur != NodeId::ROOT {
        let len = tree.node(cur).len();
        let lock_ref = tree.node(cur).lock_ref;
        if lock_ref == 0 {
            tree.evictable_size -= len;
        }
        tree.node_mut(cur).lock_ref += 1;
        cur = tree.node(cur).parent.expect("non-root node always has a parent");
    }
    trace!("pin: {:?}", node);
}

/// Walk from `node` up to (but not including) root, decrementing
/// `lock_ref` at each step. The transition of a node's `lock_ref` from 1
/// to 0 restores that node's value length to `evictable_size`.
///
/// Underflowing `lock_ref` below zero is a programmer error; it is
/// reported as [`CacheError::UnlockUnderflow`] rather than panicking so
/// the caller can decide how to fail.
pub fn unpin(tree: &mut PrefixTree, node: NodeId) -> Result<(), CacheError> {
    let mut cur = node;
    while cur != NodeId::ROOT {
        let lock_ref = tree.node(cur).lock_ref;
        if lock_ref == 0 {
            return Err(CacheError::UnlockUnderflow);
        }
        if lock_ref == 1 {
            let len = tree.node(cur).len();
            tree.evictable_size += len;
        }
        tree.node_mut(cur).lock_ref -= 1;
        cur = tree.node(cur).parent.expect("non-root node always has a parent");
    }
    trace!("unpin: {:?}", node);
    Ok(())
}
