//! A prefix-sharing KV cache for LLM serving runtimes: a compressed
//! trie (radix tree) keyed on token IDs, combined with a pinning
//! discipline that protects in-use prefixes from eviction and a
//! recency-ordered eviction policy that reclaims storage in an external
//! KV storage pool.
//!
//! The cache is designed for single-threaded cooperative use from a
//! scheduler's event loop (see `SPEC_FULL.md` §5); it performs no
//! internal synchronization. Callers needing cross-thread access own
//! the mutex.

pub mod config;
pub mod errors;
pub mod evict;
pub mod facade;
pub mod node;
pub mod pin;
pub mod request;
pub mod tree;

pub use config::{CacheConfig, CacheMode};
pub use errors::CacheError;
pub use facade::CacheFacade;
pub use node::{NodeId, SlotIndex, TokenId, TreeNode};
pub use request::{CacheRequest, ReqToTokenPool, TokenToKvPool};
pub use tree::PrefixTree;
