//! Cache construction-time configuration, modeled on the teacher's
//! `StoreConfig`/`PersistStrategy` pair in `local_array/rib/rib.rs`: a
//! small `Copy` mode enum plus a plain config struct, no config-file
//! crate, since the cache has no CLI surface to source one from.

/// Whether the cache is active or is degenerating to a pass-through for
/// A/B benchmarking (§4.E "Disable mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Enabled,
    Disabled,
}

impl CacheMode {
    pub fn is_disabled(self) -> bool {
        matches!(self, CacheMode::Disabled)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub mode: CacheMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            mode: CacheMode::Enabled,
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        CacheConfig {
            mode: CacheMode::Disabled,
        }
    }
}
