use bytes::{BufMut, BytesMut};

use flow_trie::{Hash, Height, Path};

use crate::error::DecodeError;
use crate::format::{self, Reader, NODE_ENCODING_V1};

/// Which trie node variant a record holds.
///
/// A decoder needs this before it knows whether to read the record's
/// optional `path`/`payload` fields, so it's carried as an explicit leading
/// tag byte rather than inferred from which fields are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Branch = 0,
    Extension = 1,
    Leaf = 2,
}

impl NodeKind {
    fn from_u8(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(NodeKind::Branch),
            1 => Ok(NodeKind::Extension),
            2 => Ok(NodeKind::Leaf),
            other => Err(DecodeError::Malformed(format!("unknown node kind tag {other}"))),
        }
    }
}

/// One flat node record, in the order nodes are emitted during a
/// descendants-first traversal. `left_index`/`right_index` are 1-based
/// sequence numbers into the decoder's node table; 0 means nil.
#[derive(Debug)]
pub struct NodeRecord {
    pub kind: NodeKind,
    pub left_index: u64,
    pub right_index: u64,
    pub height: Height,
    pub skip: u16,
    pub path: Option<Path>,
    pub hash: Hash,
    pub payload: Option<Vec<u8>>,
}

impl NodeRecord {
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u16(NODE_ENCODING_V1);
        out.put_u8(self.kind as u8);
        out.put_u64(self.left_index);
        out.put_u64(self.right_index);
        out.put_u16(self.height);
        out.put_u16(self.skip);
        if let Some(path) = &self.path {
            format::put_short_bytes(out, path.as_bytes());
        }
        format::put_short_bytes(out, self.hash.as_bytes());
        if let Some(payload) = &self.payload {
            format::put_long_bytes(out, payload);
        }
    }

    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let encoding_version = reader.u16()?;
        if encoding_version != NODE_ENCODING_V1 {
            return Err(DecodeError::Malformed(format!(
                "unsupported node encoding version {encoding_version:#06x}"
            )));
        }
        let kind = NodeKind::from_u8(reader.bytes(1)?[0])?;
        let left_index = reader.u64()?;
        let right_index = reader.u64()?;
        let height = reader.u16()?;
        let skip = reader.u16()?;

        let path = if matches!(kind, NodeKind::Leaf | NodeKind::Extension) {
            Some(Path::from_bytes(path_from_vec(reader.short_bytes()?)?))
        } else {
            None
        };

        let hash_bytes = reader.short_bytes()?;
        let hash = Hash(path_from_vec(hash_bytes)?);

        let payload = if matches!(kind, NodeKind::Leaf) {
            Some(reader.long_bytes()?)
        } else {
            None
        };

        Ok(NodeRecord {
            kind,
            left_index,
            right_index,
            height,
            skip,
            path,
            hash,
            payload,
        })
    }

    /// Decodes the legacy (pre-CRC) record layout: no encoding-version
    /// prefix, and two trailing fields (`register_count`, `max_depth`) the
    /// reference kept but never used downstream of restore.
    pub fn decode_legacy(reader: &mut Reader) -> Result<Self, DecodeError> {
        let kind = NodeKind::from_u8(reader.bytes(1)?[0])?;
        let left_index = reader.u64()?;
        let right_index = reader.u64()?;
        let height = reader.u16()?;
        let skip = reader.u16()?;

        let path = if matches!(kind, NodeKind::Leaf | NodeKind::Extension) {
            Some(Path::from_bytes(path_from_vec(reader.short_bytes()?)?))
        } else {
            None
        };

        let hash = Hash(path_from_vec(reader.short_bytes()?)?);

        let payload = if matches!(kind, NodeKind::Leaf) {
            Some(reader.long_bytes()?)
        } else {
            None
        };

        let _register_count = reader.u32()?;
        let _max_depth = reader.u16()?;

        Ok(NodeRecord {
            kind,
            left_index,
            right_index,
            height,
            skip,
            path,
            hash,
            payload,
        })
    }
}

fn path_from_vec(bytes: Vec<u8>) -> Result<[u8; 32], DecodeError> {
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| DecodeError::Malformed(format!("expected 32 bytes, got {}", v.len())))
}
