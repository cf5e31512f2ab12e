//! `CacheFacade`: the glue contract the scheduler actually calls (§4.E).

use std::collections::HashSet;

use log::debug;

use crate::config::{CacheConfig, CacheMode};
use crate::errors::CacheError;
use crate::evict;
use crate::node::{NodeId, SlotIndex, TokenId};
use crate::pin;
use crate::request::{CacheRequest, ReqToTokenPool, TokenToKvPool};
use crate::tree::PrefixTree;

pub struct CacheFacade {
    tree: PrefixTree,
    mode: CacheMode,
    /// KV-slot indices released through [`Self::release_slots`] since the
    /// last time they were reinserted into the tree. Lets
    /// `cache_unfinished_request`/`cache_finished_request` detect a slot
    /// being freed twice in a row without the pool ever handing it back
    /// out in between.
    freed_slots: HashSet<SlotIndex>,
}

impl Default for CacheFacade {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheFacade {
    pub fn new(config: CacheConfig) -> Self {
        CacheFacade {
            tree: PrefixTree::new(),
            mode: config.mode,
            freed_slots: HashSet::new(),
        }
    }

    /// Hand `slots` back to `kv_pool`, recording each one as freed.
    /// Returns [`CacheError::DoubleFree`] if any slot in `slots` was
    /// already freed and has not since been reinserted into the tree —
    /// `kv_pool.free` is not called at all in that case.
    fn release_slots(&mut self, kv_pool: &mut impl TokenToKvPool, slots: &[SlotIndex]) -> Result<(), CacheError> {
        for slot in slots {
            if !self.freed_slots.insert(*slot) {
                return Err(CacheError::DoubleFree);
            }
        }
        kv_pool.free(slots);
        Ok(())
    }

    pub fn is_disabled(&self) -> bool {
        self.mode.is_disabled()
    }

    /// Read-only access to the underlying tree, for callers that want to
    /// walk it directly (diagnostics, invariant checking).
    pub fn tree(&self) -> &PrefixTree {
        &self.tree
    }

    /// Pin `node` and every ancestor up to (but not including) root.
    /// Exposed directly, in addition to the implicit pin/unpin inside
    /// [`Self::cache_unfinished_request`]/[`Self::cache_finished_request`],
    /// because a scheduler may want to pin a freshly matched prefix
    /// before a request has even entered the request-slot pool.
    pub fn pin(&mut self, node: NodeId) {
        if self.mode.is_disabled() {
            return;
        }
        pin::pin(&mut self.tree, node);
    }

    /// Unpin `node` and every ancestor up to (but not including) root.
    pub fn unpin(&mut self, node: NodeId) -> Result<(), CacheError> {
        if self.mode.is_disabled() {
            return Ok(());
        }
        pin::unpin(&mut self.tree, node)
    }

    /// Pure read (updates timestamps); does NOT pin.
    pub fn match_prefix(&mut self, tokens: &[TokenId]) -> (Vec<SlotIndex>, NodeId) {
        if self.mode.is_disabled() {
            return (Vec::new(), NodeId::ROOT);
        }
        self.tree.match_prefix(tokens)
    }

    pub fn insert(&mut self, tokens: &[TokenId], slot_indices: &[SlotIndex]) -> Result<usize, CacheError> {
        if self.mode.is_disabled() {
            return Ok(0);
        }
        self.tree.insert(tokens, slot_indices)
    }

    pub fn evictable_size(&self) -> usize {
        self.tree.evictable_size()
    }

    pub fn total_size(&self) -> usize {
        self.tree.total_size()
    }

    /// Drop the entire tree and re-initialize with a fresh root. Slots
    /// previously held are *not* returned through any callback.
    pub fn reset(&mut self) {
        self.tree.reset();
        self.freed_slots.clear();
        debug!("cache reset");
    }

    pub fn evict(
        &mut self,
        num_tokens: usize,
        free_callback: impl FnMut(&[SlotIndex]),
        reserved: Option<&HashSet<NodeId>>,
    ) -> Result<usize, CacheError> {
        if self.mode.is_disabled() {
            return Ok(0);
        }
        evict::evict(&mut self.tree, num_tokens, free_callback, reserved)
    }

    /// Insert a request's current `fill_ids`, free the slot range that
    /// was already present (and so redundantly re-allocated by the
    /// model runtime before this call), then re-match to rewrite the
    /// request's slot-pool row onto the canonical cached slots and swap
    /// the pin from the old tip to the new one.
    pub fn cache_unfinished_request<Req, ReqPool, KvPool>(
        &mut self,
        req: &mut Req,
        req_pool: &mut ReqPool,
        kv_pool: &mut KvPool,
    ) -> Result<(), CacheError>
    where
        Req: CacheRequest,
        ReqPool: ReqToTokenPool<ReqPoolIdx = Req::ReqPoolIdx>,
        KvPool: TokenToKvPool,
    {
        if self.mode.is_disabled() {
            return Ok(());
        }

        let token_ids = req.fill_ids().to_vec();
        let kv_indices = req_pool.slots(req.req_pool_idx(), token_ids.len());

        let new_prefix_len = self.tree.insert(&token_ids, &kv_indices)?;
        for slot in &kv_indices[new_prefix_len..] {
            self.freed_slots.remove(slot);
        }
        let old_prefix_len = req.prefix_indices().len();
        if old_prefix_len < new_prefix_len {
            self.release_slots(kv_pool, &kv_indices[old_prefix_len..new_prefix_len])?;
        }

        let (new_indices, new_last_node) = self.tree.match_prefix(&token_ids);
        debug_assert_eq!(new_indices.len(), token_ids.len());

        req_pool.assign(
            req.req_pool_idx(),
            old_prefix_len..new_indices.len(),
            &new_indices[old_prefix_len..],
        );

        pin::unpin(&mut self.tree, req.last_node())?;
        pin::pin(&mut self.tree, new_last_node);

        req.set_prefix_indices(new_indices);
        req.set_last_node(new_last_node);
        Ok(())
    }

    /// Same insert/free as [`Self::cache_unfinished_request`], but also
    /// frees the request's row in the request-slot pool and unpins
    /// without re-pinning (the request is done, there is no new tip to
    /// protect).
    pub fn cache_finished_request<Req, ReqPool, KvPool>(
        &mut self,
        req: &Req,
        req_pool: &mut ReqPool,
        kv_pool: &mut KvPool,
    ) -> Result<(), CacheError>
    where
        Req: CacheRequest,
        ReqPool: ReqToTokenPool<ReqPoolIdx = Req::ReqPoolIdx>,
        KvPool: TokenToKvPool,
    {
        let token_ids = {
            let origin = req.origin_input_ids();
            let output = req.output_ids();
            let mut ids = Vec::with_capacity(origin.len() + output.len());
            ids.extend_from_slice(origin);
            ids.extend_from_slice(output);
            // The last generated token has no cached successor yet; the
            // teacher's Python drops it with `[:-1]` for the same reason.
            ids.pop();
            ids
        };

        let kv_indices = req_pool.slots(req.req_pool_idx(), token_ids.len());

        if self.mode.is_disabled() {
            kv_pool.free(&kv_indices);
            req_pool.free(req.req_pool_idx());
            return Ok(());
        }

        let new_prefix_len = self.tree.insert(&token_ids, &kv_indices)?;
        for slot in &kv_indices[new_prefix_len..] {
            self.freed_slots.remove(slot);
        }
        let old_prefix_len = req.prefix_indices().len();
        if old_prefix_len < new_prefix_len {
            self.release_slots(kv_pool, &kv_indices[old_prefix_len..new_prefix_len])?;
        }

        req_pool.free(req.req_pool_idx());
        pin::unpin(&mut self.tree, req.last_node())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeReq {
        origin_input_ids: Vec<TokenId>,
        output_ids: Vec<TokenId>,
        fill_ids: Vec<TokenId>,
        req_pool_idx: u32,
        prefix_indices: Vec<SlotIndex>,
        last_node: NodeId,
    }

    impl CacheRequest for FakeReq {
        type ReqPoolIdx = u32;

        fn origin_input_ids(&self) -> &[TokenId] {
            &self.origin_input_ids
        }
        fn output_ids(&self) -> &[TokenId] {
            &self.output_ids
        }
        fn fill_ids(&self) -> &[TokenId] {
            &self.fill_ids
        }
        fn req_pool_idx(&self) -> u32 {
            self.req_pool_idx
        }
        fn prefix_indices(&self) -> &[SlotIndex] {
            &self.prefix_indices
        }
        fn set_prefix_indices(&mut self, indices: Vec<SlotIndex>) {
            self.prefix_indices = indices;
        }
        fn last_node(&self) -> NodeId {
            self.last_node
        }
        fn set_last_node(&mut self, node: NodeId) {
            self.last_node = node;
        }
    }

    #[derive(Default)]
    struct FakeReqPool {
        rows: HashMap<u32, Vec<SlotIndex>>,
    }

    impl ReqToTokenPool for FakeReqPool {
        type ReqPoolIdx = u32;

        fn slots(&self, req_pool_idx: u32, len: usize) -> Vec<SlotIndex> {
            self.rows[&req_pool_idx][..len].to_vec()
        }

        fn assign(&mut self, req_pool_idx: u32, range: std::ops::Range<usize>, slots: &[SlotIndex]) {
            let row = self.rows.get_mut(&req_pool_idx).unwrap();
            row[range].copy_from_slice(slots);
        }

        fn free(&mut self, req_pool_idx: u32) {
            self.rows.remove(&req_pool_idx);
        }
    }

    #[derive(Default)]
    struct FakeKvPool {
        freed: Vec<SlotIndex>,
    }

    impl TokenToKvPool for FakeKvPool {
        fn free(&mut self, slot_indices: &[SlotIndex]) {
            self.freed.extend_from_slice(slot_indices);
        }
    }

    #[test]
    fn cache_unfinished_request_round_trip_scenario_5() {
        let mut facade = CacheFacade::default();
        facade.insert(&[1, 2], &[100, 101]).unwrap();

        let mut req_pool = FakeReqPool::default();
        req_pool.rows.insert(0, vec![200, 201, 202]);
        let mut kv_pool = FakeKvPool::default();

        let mut req = FakeReq {
            origin_input_ids: vec![1, 2, 3],
            output_ids: vec![],
            fill_ids: vec![1, 2, 3],
            req_pool_idx: 0,
            prefix_indices: vec![],
            last_node: NodeId::ROOT,
        };

        facade
            .cache_unfinished_request(&mut req, &mut req_pool, &mut kv_pool)
            .unwrap();

        assert_eq!(req_pool.rows[&0][0..2], [100, 101]);
        assert_eq!(kv_pool.freed, vec![200, 201]);
        assert_eq!(req.prefix_indices.len(), 3);
        assert_ne!(req.last_node, NodeId::ROOT);
    }

    #[test]
    fn cache_finished_request_rejects_a_repeated_free() {
        let mut facade = CacheFacade::default();
        facade.insert(&[1, 2], &[100, 101]).unwrap();

        let mut req_pool = FakeReqPool::default();
        req_pool.rows.insert(0, vec![100, 101]);
        let mut kv_pool = FakeKvPool::default();

        let req = FakeReq {
            origin_input_ids: vec![1, 2],
            output_ids: vec![3],
            fill_ids: vec![],
            req_pool_idx: 0,
            prefix_indices: vec![],
            last_node: NodeId::ROOT,
        };

        facade
            .cache_finished_request(&req, &mut req_pool, &mut kv_pool)
            .unwrap();
        assert_eq!(kv_pool.freed, vec![100, 101]);

        // The pool hands the same two slots back out to a second request
        // that collapses onto the same already-cached prefix; `req` was
        // never advanced (its `prefix_indices` is still empty), so this
        // must be refused rather than freeing slot 100/101 a second time.
        req_pool.rows.insert(0, vec![100, 101]);
        let err = facade
            .cache_finished_request(&req, &mut req_pool, &mut kv_pool)
            .unwrap_err();
        assert_eq!(err, CacheError::DoubleFree);
    }

    #[test]
    fn reset_clears_everything_scenario_6() {
        let mut facade = CacheFacade::default();
        facade.insert(&[1, 2, 3], &[1, 2, 3]).unwrap();
        facade.reset();

        assert_eq!(facade.total_size(), 0);
        assert_eq!(facade.evictable_size(), 0);
    }

    #[test]
    fn disabled_mode_is_a_pass_through() {
        let mut facade = CacheFacade::new(CacheConfig::disabled());
        assert_eq!(facade.insert(&[1, 2], &[1, 2]).unwrap(), 0);
        let (values, node) = facade.match_prefix(&[1, 2]);
        assert!(values.is_empty());
        assert_eq!(node, NodeId::ROOT);

        let mut req_pool = FakeReqPool::default();
        req_pool.rows.insert(0, vec![5, 6]);
        let mut kv_pool = FakeKvPool::default();
        let req = FakeReq {
            origin_input_ids: vec![1, 2, 3],
            output_ids: vec![],
            fill_ids: vec![1, 2],
            req_pool_idx: 0,
            prefix_indices: vec![],
            last_node: NodeId::ROOT,
        };
        facade
            .cache_finished_request(&req, &mut req_pool, &mut kv_pool)
            .unwrap();
        assert_eq!(kv_pool.freed, vec![5, 6]);
        assert!(!req_pool.rows.contains_key(&0));
    }
}
