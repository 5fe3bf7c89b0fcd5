use thiserror::Error;

use flow_trie::Hash;

#[derive(Debug, Error)]
pub enum ForestError {
    #[error("no trie retained for commitment {0}")]
    UnknownCommitment(Hash),
    #[error("trie operation failed: {0}")]
    Trie(#[from] flow_trie::TrieError),
}
