use std::fmt;
use std::sync::OnceLock;

use crate::path::Path;

/// A 256-bit node hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Binary hash of two child hashes: `H(left, right)`.
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&left.0);
    hasher.update(&right.0);
    Hash(*hasher.finalize().as_bytes())
}

/// Leaf hash over a path and its payload value, before compaction.
pub fn hash_leaf(path: &Path, value: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"flow-trie-leaf");
    hasher.update(&path.0);
    hasher.update(value);
    Hash(*hasher.finalize().as_bytes())
}

const DEFAULT_HASH_LEVELS: usize = Path::BITS as usize + 1;

fn default_hash_table() -> &'static [Hash; DEFAULT_HASH_LEVELS] {
    static TABLE: OnceLock<[Hash; DEFAULT_HASH_LEVELS]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [Hash([0u8; 32]); DEFAULT_HASH_LEVELS];
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"flow-trie-empty-subtree-sentinel");
        table[0] = Hash(*hasher.finalize().as_bytes());
        for h in 1..DEFAULT_HASH_LEVELS {
            table[h] = hash_pair(&table[h - 1], &table[h - 1]);
        }
        table
    })
}

/// Hash of an empty subtree of height `h` (0 <= h <= 256).
pub fn default_hash(h: Height) -> Hash {
    default_hash_table()[h as usize]
}

use crate::path::Height;

/// Folds `acc` (the hash of a subtree currently living at height
/// `from_height`) upward through default siblings until it represents a
/// subtree at height `to_height`, mixing in `path`'s bits along the way.
///
/// Shared by [`compact_hash`] (folding from a bare leaf hash at height 0) and
/// extension-node hashing (folding from a branch child's hash at whatever
/// height it lives at).
pub fn fold_hash(mut acc: Hash, path: &Path, from_height: Height, to_height: Height) -> Hash {
    for h in from_height..to_height {
        let bit_index = Path::BITS - 1 - h;
        let sibling = default_hash(h);
        acc = if path.bit(bit_index) {
            hash_pair(&sibling, &acc)
        } else {
            hash_pair(&acc, &sibling)
        };
    }
    acc
}

/// Compact-leaf hash: folds a leaf hash up through `height` levels of
/// default siblings, taking the side opposite the corresponding path bit at
/// each level so that an all-default subtree collapses into a single leaf.
pub fn compact_hash(path: &Path, value: &[u8], height: Height) -> Hash {
    fold_hash(hash_leaf(path, value), path, 0, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hash_is_deterministic_and_recursive() {
        let h0 = default_hash(0);
        let h1 = default_hash(1);
        assert_eq!(h1, hash_pair(&h0, &h0));
    }

    #[test]
    fn default_hash_of_root_matches_empty_trie_hash() {
        assert_eq!(default_hash(256), default_hash(Path::BITS));
    }

    #[test]
    fn compact_hash_at_height_zero_is_plain_leaf_hash() {
        let path = Path::from_bytes([0x11; 32]);
        let value = b"value".to_vec();
        assert_eq!(compact_hash(&path, &value, 0), hash_leaf(&path, &value));
    }

    #[test]
    fn compact_hash_is_stable_across_calls() {
        let path = Path::from_bytes([0xAB; 32]);
        let value = b"payload".to_vec();
        let a = compact_hash(&path, &value, 17);
        let b = compact_hash(&path, &value, 17);
        assert_eq!(a, b);
    }
}
