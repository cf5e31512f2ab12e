use std::fmt;

/// Possible errors returned by methods on the cache.
///
/// These are programmer-error conditions: a correctly wired scheduler
/// should never trigger them. They are returned as `Result::Err` rather
/// than panicking so that a caller embedding the cache in a larger
/// service can log and abort gracefully.
#[derive(Debug, PartialEq, Eq)]
pub enum CacheError {
    /// `unpin` was called on a node whose `lock_ref` is already zero.
    UnlockUnderflow,
    /// A KV-slot index was about to be freed twice.
    DoubleFree,
    /// A tree invariant was violated: mismatched key/value lengths, a
    /// dangling child edge, or a missing parent link.
    CorruptedTree(&'static str),
    /// `insert` was called with a key/value pair of mismatched length.
    MismatchedKeyValue { key_len: usize, value_len: usize },
}

impl std::error::Error for CacheError {}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CacheError::UnlockUnderflow => {
                write!(f, "Error: unpin called on a node with lock_ref == 0.")
            }
            CacheError::DoubleFree => {
                write!(f, "Error: KV-slot index freed more than once.")
            }
            CacheError::CorruptedTree(reason) => {
                write!(f, "Error: tree invariant violated: {reason}.")
            }
            CacheError::MismatchedKeyValue { key_len, value_len } => {
                write!(
                    f,
                    "Error: key length {key_len} does not match value length {value_len}."
                )
            }
        }
    }
}
