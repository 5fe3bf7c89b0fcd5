use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("root hash mismatch: trie record claims {expected} but the restored root hashes to {actual}")]
    RootHashMismatch { expected: flow_trie::Hash, actual: flow_trie::Hash },

    #[error("unexpected end of input after {0} bytes")]
    ShortRead(usize),

    #[error("bad magic {0:#06x}, expected 0x2137")]
    BadMagic(u16),

    #[error("unsupported checkpoint version {0:#06x}")]
    UnknownVersion(u16),

    #[error("crc32 mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("node record {index} references child {child}, which has not been emitted yet")]
    DescendantsFirstViolation { index: u64, child: u64 },

    #[error("malformed node record: {0}")]
    Malformed(String),

    #[error("payload store error while restoring a leaf: {0}")]
    Payload(#[from] flow_trie::TrieError),
}
