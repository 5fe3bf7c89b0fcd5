//! Binary serializer/deserializer for a whole [`Forest`]: every retained
//! trie, streamed in descendants-first node order with a trailing CRC32.

pub mod error;
pub mod format;
pub mod node_record;
pub mod trie_record;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;

use flow_forest::Forest;
use flow_trie::{ChildRef, LeafNode, Node, PayloadSource, Trie};

pub use error::DecodeError;
use node_record::{NodeKind, NodeRecord};
use trie_record::TrieRecord;

/// Encodes every trie retained by `forest` into a v3 checkpoint buffer.
///
/// Nodes shared between tries (structural sharing from `Trie::mutate`) are
/// emitted once and referenced by index from every trie that reaches them.
pub fn encode(forest: &Forest, source: &dyn PayloadSource) -> anyhow::Result<Vec<u8>> {
    let mut records: Vec<NodeRecord> = Vec::new();
    let mut seen: HashMap<usize, u64> = HashMap::new();

    let mut trees = forest.trees();
    trees.sort_by_key(|t| t.root_hash().0);

    let mut trie_records = Vec::with_capacity(trees.len());
    for trie in &trees {
        let root_index = emit_node(trie.root_ref(), &mut records, &mut seen, source)?;
        trie_records.push(TrieRecord {
            root_index,
            hash: trie.root_hash(),
        });
    }

    let mut body = BytesMut::new();
    body.extend_from_slice(&format::MAGIC.to_be_bytes());
    body.extend_from_slice(&format::VERSION_V3.to_be_bytes());
    body.extend_from_slice(&(records.len() as u64).to_be_bytes());
    body.extend_from_slice(&(trie_records.len() as u16).to_be_bytes());
    for record in &records {
        record.encode(&mut body);
    }
    for trie_record in &trie_records {
        trie_record.encode(&mut body);
    }

    let crc = crc32fast::hash(&body);
    body.extend_from_slice(&crc.to_be_bytes());
    tracing::info!(tries = trie_records.len(), nodes = records.len(), bytes = body.len(), "encoded checkpoint");
    Ok(body.to_vec())
}

fn emit_node(
    child: &ChildRef,
    records: &mut Vec<NodeRecord>,
    seen: &mut HashMap<usize, u64>,
    source: &dyn PayloadSource,
) -> anyhow::Result<u64> {
    let node = match child.node() {
        None => return Ok(0),
        Some(node) => node,
    };

    let ptr = Arc::as_ptr(node) as usize;
    if let Some(&index) = seen.get(&ptr) {
        return Ok(index);
    }

    let record = match node.as_ref() {
        Node::Leaf(leaf) => {
            let payload = source
                .get(&leaf.hash)?
                .ok_or_else(|| anyhow::anyhow!("no payload stored for leaf hash {}", leaf.hash))?;
            NodeRecord {
                kind: NodeKind::Leaf,
                left_index: 0,
                right_index: 0,
                height: leaf.height,
                skip: 0,
                path: Some(leaf.path),
                hash: leaf.hash,
                payload: Some(payload),
            }
        }
        Node::Branch(branch) => {
            let left_index = emit_node(&branch.left, records, seen, source)?;
            let right_index = emit_node(&branch.right, records, seen, source)?;
            NodeRecord {
                kind: NodeKind::Branch,
                left_index,
                right_index,
                height: branch.height,
                skip: 0,
                path: None,
                hash: node.hash(),
                payload: None,
            }
        }
        Node::Extension(ext) => {
            let child_index = emit_node(&ext.child, records, seen, source)?;
            NodeRecord {
                kind: NodeKind::Extension,
                left_index: child_index,
                right_index: 0,
                height: ext.height,
                skip: ext.count as u16,
                path: Some(ext.path),
                hash: node.hash(),
                payload: None,
            }
        }
    };

    records.push(record);
    let index = records.len() as u64;
    seen.insert(ptr, index);
    Ok(index)
}

/// Decodes a v3 or legacy v1 checkpoint buffer into a freshly populated
/// [`Forest`], saving every decoded leaf's payload into `source` along the
/// way.
pub fn decode(bytes: &[u8], source: Arc<dyn PayloadSource>) -> Result<Forest, DecodeError> {
    tracing::info!(bytes = bytes.len(), "decoding checkpoint");
    let mut header = format::Reader::new(bytes);
    let magic = header.u16()?;
    if magic != format::MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let version = header.u16()?;
    let has_crc = match version {
        format::VERSION_V3 => true,
        format::VERSION_LEGACY_V1 => false,
        v if format::is_known_but_unsupported(v) => return Err(DecodeError::UnknownVersion(v)),
        v => return Err(DecodeError::UnknownVersion(v)),
    };

    let body = if has_crc {
        if bytes.len() < 4 {
            return Err(DecodeError::ShortRead(bytes.len()));
        }
        let (body, tail) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_be_bytes(tail.try_into().expect("tail is exactly 4 bytes"));
        let computed = crc32fast::hash(body);
        if expected != computed {
            tracing::warn!(expected, computed, "checkpoint failed crc validation");
            return Err(DecodeError::CrcMismatch { expected, computed });
        }
        body
    } else {
        bytes
    };

    let mut reader = format::Reader::new(body);
    let _magic = reader.u16()?;
    let _version = reader.u16()?;
    let nodes_count = reader.u64()?;
    let tries_count = reader.u16()?;

    let mut node_table: Vec<ChildRef> = Vec::with_capacity(nodes_count as usize + 1);
    node_table.push(ChildRef::Empty);

    for index in 1..=nodes_count {
        let record = if has_crc {
            NodeRecord::decode(&mut reader)?
        } else {
            NodeRecord::decode_legacy(&mut reader)?
        };
        if record.left_index >= index || record.right_index >= index {
            let child = if record.left_index >= index {
                record.left_index
            } else {
                record.right_index
            };
            return Err(DecodeError::DescendantsFirstViolation { index, child });
        }
        let child_ref = build_child_ref(record, &node_table, source.as_ref())?;
        node_table.push(child_ref);
    }

    let forest = Forest::new();
    for _ in 0..tries_count {
        let trie_record = TrieRecord::decode(&mut reader)?;
        let root = node_table
            .get(trie_record.root_index as usize)
            .cloned()
            .ok_or_else(|| DecodeError::Malformed(format!("trie root index {} out of range", trie_record.root_index)))?;
        let trie = Trie::from_root(root, source.clone());
        let actual = trie.root_hash();
        if actual != trie_record.hash {
            tracing::warn!(expected = %trie_record.hash, actual = %actual, "checkpoint trie record hash mismatch");
            return Err(DecodeError::RootHashMismatch {
                expected: trie_record.hash,
                actual,
            });
        }
        forest.add(trie, Vec::new(), None);
    }

    tracing::info!(tries = tries_count, nodes = nodes_count, "decoded checkpoint");
    Ok(forest)
}

fn build_child_ref(record: NodeRecord, node_table: &[ChildRef], source: &dyn PayloadSource) -> Result<ChildRef, DecodeError> {
    match record.kind {
        NodeKind::Leaf => {
            let path = record
                .path
                .ok_or_else(|| DecodeError::Malformed("leaf record missing path".to_string()))?;
            let payload = record
                .payload
                .ok_or_else(|| DecodeError::Malformed("leaf record missing payload".to_string()))?;
            source.put(record.hash, payload)?;
            Ok(ChildRef::Node(Arc::new(Node::Leaf(LeafNode {
                path,
                height: record.height,
                hash: record.hash,
            }))))
        }
        NodeKind::Branch => {
            let left = node_table
                .get(record.left_index as usize)
                .cloned()
                .ok_or_else(|| DecodeError::Malformed("branch left index out of range".to_string()))?;
            let right = node_table
                .get(record.right_index as usize)
                .cloned()
                .ok_or_else(|| DecodeError::Malformed("branch right index out of range".to_string()))?;
            Ok(ChildRef::Node(Arc::new(flow_trie::node::new_branch(left, right, record.height))))
        }
        NodeKind::Extension => {
            let child = node_table
                .get(record.left_index as usize)
                .cloned()
                .ok_or_else(|| DecodeError::Malformed("extension child index out of range".to_string()))?;
            let path = record
                .path
                .ok_or_else(|| DecodeError::Malformed("extension record missing path".to_string()))?;
            Ok(ChildRef::Node(Arc::new(flow_trie::node::new_extension(
                child,
                path,
                record.skip as u8,
                record.height,
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_trie::{InMemoryPayloadSource, Path};

    fn path_from_u8(tag: u8) -> Path {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        Path::from_bytes(bytes)
    }

    fn populated_forest() -> (Forest, Arc<InMemoryPayloadSource>) {
        let source = Arc::new(InMemoryPayloadSource::new());
        let trie_source: Arc<dyn PayloadSource> = source.clone();
        let root = Trie::empty(trie_source);
        let writes: Vec<(Path, Vec<u8>)> = (0u8..12).map(|i| (path_from_u8(i), vec![i; 3])).collect();
        let trie = root.mutate(&writes).unwrap();

        let forest = Forest::new();
        forest.add(trie, Vec::new(), None);
        (forest, source)
    }

    #[test]
    fn round_trip_preserves_root_hash_and_reads() {
        let (forest, source) = populated_forest();
        let original_hash = forest.trees()[0].root_hash();

        let encoded = encode(&forest, source.as_ref()).unwrap();

        let restored_source: Arc<dyn PayloadSource> = Arc::new(InMemoryPayloadSource::new());
        let restored = decode(&encoded, restored_source).unwrap();

        let restored_trie = restored.tree(&original_hash).unwrap();
        assert_eq!(restored_trie.root_hash(), original_hash);

        for i in 0u8..12 {
            let path = path_from_u8(i);
            assert_eq!(restored_trie.read_one(&path).unwrap(), Some(vec![i; 3]));
        }
    }

    #[test]
    fn bit_flip_is_detected_by_crc() {
        let (forest, source) = populated_forest();
        let mut encoded = encode(&forest, source.as_ref()).unwrap();

        let mid = encoded.len() / 2;
        encoded[mid] ^= 0x01;

        let restored_source: Arc<dyn PayloadSource> = Arc::new(InMemoryPayloadSource::new());
        let err = decode(&encoded, restored_source).unwrap_err();
        assert!(matches!(err, DecodeError::CrcMismatch { .. }));
    }

    #[test]
    fn bad_magic_is_rejected_before_any_allocation() {
        let mut encoded = vec![0u8; 32];
        encoded[0] = 0xFF;
        encoded[1] = 0xFF;
        let source: Arc<dyn PayloadSource> = Arc::new(InMemoryPayloadSource::new());
        let err = decode(&encoded, source).unwrap_err();
        assert!(matches!(err, DecodeError::BadMagic(_)));
    }
}
