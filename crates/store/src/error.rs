use flow_trie::Hash;
use thiserror::Error;

/// Errors surfaced by [`crate::PayloadStore`] and the persistent engines
/// behind it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `hash` has never been saved (or was saved and never persisted before
    /// a crash). Distinguished from `Io` so callers can choose to retry
    /// from elsewhere rather than treat it as a transient failure.
    #[error("payload {0} not found")]
    Missing(Hash),

    /// The engine's current transaction has exceeded its size limit (e.g.
    /// libmdbx's `MDBX_MAP_FULL`). Engines commit the transaction they have
    /// and retry the remaining writes in a fresh one; this variant should
    /// never escape `PayloadStore` itself.
    #[error("persistent engine transaction size limit exceeded")]
    TransactionTooLarge,

    #[error("persistent engine I/O error: {0}")]
    Io(#[source] anyhow::Error),

    #[error("operation attempted after PayloadStore::close")]
    Closed,
}
