//! Recency-ordered leaf eviction.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use log::{debug, warn};

use crate::errors::CacheError;
use crate::node::{NodeId, SlotIndex};
use crate::tree::PrefixTree;

#[derive(Clone, Copy, Eq, PartialEq)]
struct HeapEntry {
    last_access_time: u64,
    // Tie-break on the arena slot so ties are broken stably instead of
    // arbitrarily, per the ordering note on `TreeNode` in `SPEC_FULL.md`.
    node: NodeId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.last_access_time
            .cmp(&other.last_access_time)
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Free cached KV slots from unpinned leaves, oldest `last_access_time`
/// first, until at least `num_tokens` have been freed or no further
/// progress is possible. Returns the number of tokens actually freed.
///
/// `reserved`, when present, spares the named nodes from this pass even
/// though they are unpinned — used to protect the prefixes of
/// queued-but-not-yet-scheduled requests. There is a single `evict`
/// entry point rather than a separate reserved-set method, per the
/// design note resolving that open question.
pub fn evict(
    tree: &mut PrefixTree,
    num_tokens: usize,
    mut free_callback: impl FnMut(&[SlotIndex]),
    reserved: Option<&HashSet<NodeId>>,
) -> Result<usize, CacheError> {
    if num_tokens == 0 {
        return Ok(0);
    }

    let mut heap: BinaryHeap<Reverse<HeapEntry>> = tree
        .collect_leaves()
        .into_iter()
        .map(|id| {
            Reverse(HeapEntry {
                last_access_time: tree.node(id).last_access_time,
                node: id,
            })
        })
        .collect();

    let mut freed = 0usize;

    while freed < num_tokens {
        let Some(Reverse(entry)) = heap.pop() else {
            break;
        };
        let id = entry.node;

        if id == NodeId::ROOT {
            break;
        }
        if tree.node(id).lock_ref > 0 {
            continue;
        }
        if reserved.is_some_and(|r| r.contains(&id)) {
            continue;
        }

        let value = tree.node(id).value.clone();
        free_callback(&value);

        let freed_len = tree.node(id).len();
        let parent = tree.delete_leaf(id)?;
        tree.evictable_size = tree
            .evictable_size
            .checked_sub(freed_len)
            .ok_or(CacheError::CorruptedTree("evictable_size underflow during eviction"))?;
        freed += freed_len;
        debug!("evict: freed {:?} ({} tokens)", id, freed_len);

        if parent != NodeId::ROOT && tree.node(parent).is_leaf() {
            heap.push(Reverse(HeapEntry {
                last_access_time: tree.node(parent).last_access_time,
                node: parent,
            }));
        }
    }

    if freed < num_tokens {
        warn!(
            "evict: requested {} tokens, only freed {} (pinned/reserved state blocked further progress)",
            num_tokens, freed
        );
    }

    Ok(freed)
}
