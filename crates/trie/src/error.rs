use thiserror::Error;

/// Errors surfaced by [`crate::Trie`] operations.
///
/// Invariant violations (mismatched batch lengths, malformed node graphs
/// reached through internal bugs) are not represented here: they indicate a
/// programming error and are raised via `panic!`/`debug_assert!` instead.
#[derive(Debug, Error)]
pub enum TrieError {
    #[error("payload store error: {0}")]
    Store(#[from] anyhow::Error),
    #[error("payload for leaf hash {0} is missing from the backing store")]
    MissingPayload(crate::hash::Hash),
}

impl TrieError {
    /// Wraps a backing store's own error type, for [`crate::PayloadSource`]
    /// implementations outside this crate whose error enum can't appear in
    /// `TrieError` directly without an upward dependency on their crate.
    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        TrieError::Store(anyhow::Error::new(err))
    }
}
