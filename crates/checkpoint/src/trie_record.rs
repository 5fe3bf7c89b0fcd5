use bytes::{BufMut, BytesMut};

use flow_trie::Hash;

use crate::error::DecodeError;
use crate::format::{self, Reader, NODE_ENCODING_V1};

/// One trie's root, recorded after every node it reaches has already been
/// emitted (`root_index` is 0 for an empty trie).
#[derive(Debug)]
pub struct TrieRecord {
    pub root_index: u64,
    pub hash: Hash,
}

impl TrieRecord {
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u16(NODE_ENCODING_V1);
        out.put_u64(self.root_index);
        format::put_short_bytes(out, self.hash.as_bytes());
    }

    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let encoding_version = reader.u16()?;
        if encoding_version != NODE_ENCODING_V1 {
            return Err(DecodeError::Malformed(format!(
                "unsupported trie encoding version {encoding_version:#06x}"
            )));
        }
        let root_index = reader.u64()?;
        let hash_bytes = reader.short_bytes()?;
        let hash = Hash(hash_bytes
            .try_into()
            .map_err(|v: Vec<u8>| DecodeError::Malformed(format!("expected 32 bytes, got {}", v.len())))?);
        Ok(TrieRecord { root_index, hash })
    }
}
