use std::fmt::Debug;

use flow_trie::Hash;

use crate::error::StoreError;

/// A minimal persistent key/value engine backing [`crate::PayloadStore`].
///
/// Collapsed to the single content-addressed table this crate needs, with
/// the transaction lifecycle kept internal to the engine rather than
/// exposed as a long-lived object: `commit_batch` opens, retries past its
/// own size limit, and commits entirely inside one call.
pub trait PersistentEngine: Debug + Send + Sync {
    /// Reads a value directly from the durable store (bypassing any cache).
    fn get(&self, key: &Hash) -> Result<Option<Vec<u8>>, StoreError>;

    /// Durably writes every entry in `batch`. If the engine's transaction
    /// size limit is hit partway through (e.g. libmdbx's `MDBX_MAP_FULL`),
    /// the engine commits what it has and continues in a fresh transaction
    /// rather than surfacing [`StoreError::TransactionTooLarge`] to the
    /// caller.
    fn commit_batch(&self, batch: Vec<(Hash, Vec<u8>)>) -> Result<(), StoreError>;

    /// Flushes and releases all engine resources. Further calls are invalid.
    fn close(&self) -> Result<(), StoreError>;
}

pub mod in_memory;

#[cfg(feature = "libmdbx-backend")]
pub mod libmdbx_backend;
