//! Versioned key-value storage consumed by the apply layer.
//!
//! The apply layer only ever talks to storage through the [`KV`] trait. The
//! crate ships one implementation, [`MvccStore`], a revision-based store on top
//! of sled:
//!
//! - Every write allocates the next global revision number
//! - Reads may target the current revision or any earlier one
//! - Deletions leave tombstones so history stays replayable
//! - The key index is rebuilt from the backend on startup

pub mod backend;
pub mod index;
pub mod mvcc;

pub use backend::{Backend, BackendConfig, BackendError, BackendResult};
pub use index::{KeyIndex, Revision};
pub use mvcc::{KeyValue, MvccStore};

use thiserror::Error;
use tracing::error;

/// Storage engine errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("required revision {requested} is a future revision (current {current})")]
    FutureRevision { requested: i64, current: i64 },

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// The versioned key-value interface the apply layer evaluates requests
/// against.
///
/// Implementations keep per-key version, create revision and mod revision, and
/// a single global revision counter that never decreases. Writes are
/// infallible from the caller's point of view: an implementation that cannot
/// complete a write must not return, since replicas would otherwise diverge.
pub trait KV {
    /// Returns the records in `[key, range_end)` visible at `range_rev`, plus
    /// the store's current revision.
    ///
    /// An empty `range_end` selects exactly `key`. `limit <= 0` means no limit
    /// and `range_rev <= 0` means the current revision.
    fn range(
        &self,
        key: &[u8],
        range_end: &[u8],
        limit: i64,
        range_rev: i64,
    ) -> StorageResult<(Vec<KeyValue>, i64)>;

    /// Writes `value` under `key` and returns the new revision.
    fn put(&self, key: &[u8], value: &[u8]) -> i64;

    /// Deletes the selected keys and returns `(deleted, revision)`. When
    /// nothing matches, no revision is allocated and the current one is
    /// returned.
    fn delete_range(&self, key: &[u8], range_end: &[u8]) -> (i64, i64);
}

/// Aborts on a storage failure the caller has no way to recover from.
pub(crate) fn fatal(op: &str, err: StorageError) -> ! {
    error!(op = op, error = %err, "unrecoverable storage failure");
    panic!("storage {} failed: {}", op, err);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "storage set_applied_index failed: Corrupt record: meta tree unwritable")]
    fn test_fatal_panics_with_operation_and_cause() {
        fatal(
            "set_applied_index",
            StorageError::Corrupt("meta tree unwritable".to_string()),
        );
    }
}
