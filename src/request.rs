//! The narrow slices of the scheduler's request and pool objects that the
//! cache touches (§6). These are traits, not concrete types, so the
//! cache stays decoupled from the rest of the serving runtime — the
//! scheduler's actual `Req`/pool types only need to implement them.

use crate::node::{NodeId, SlotIndex, TokenId};

/// The request-slot pool: owns one row of KV-slot indices per in-flight
/// request, addressed by `req_pool_idx`.
pub trait ReqToTokenPool {
    /// The handle naming a request's row in this pool.
    type ReqPoolIdx: Copy;

    /// The slot indices assigned to `req_pool_idx` for position range
    /// `0..len`.
    fn slots(&self, req_pool_idx: Self::ReqPoolIdx, len: usize) -> Vec<SlotIndex>;

    /// Overwrite the slot indices for `req_pool_idx` over `range` with
    /// `slots` (`slots.len() == range.len()`).
    fn assign(&mut self, req_pool_idx: Self::ReqPoolIdx, range: std::ops::Range<usize>, slots: &[SlotIndex]);

    /// Release the request's row back to the pool.
    fn free(&mut self, req_pool_idx: Self::ReqPoolIdx);
}

/// The token-to-KV pool: owns the actual KV tensors named by slot index.
pub trait TokenToKvPool {
    /// Return a batch of KV-slot indices to the pool. Not assumed
    /// idempotent; the cache calls this exactly once per index released.
    fn free(&mut self, slot_indices: &[SlotIndex]);
}

/// The scheduler's request object, as far as the cache needs to see it.
pub trait CacheRequest {
    type ReqPoolIdx: Copy;

    fn origin_input_ids(&self) -> &[TokenId];
    fn output_ids(&self) -> &[TokenId];
    fn fill_ids(&self) -> &[TokenId];
    fn req_pool_idx(&self) -> Self::ReqPoolIdx;

    fn prefix_indices(&self) -> &[SlotIndex];
    fn set_prefix_indices(&mut self, indices: Vec<SlotIndex>);

    fn last_node(&self) -> NodeId;
    fn set_last_node(&mut self, node: NodeId);
}
