use tideline_crypto::{ByteVisitor, Decoder, Digest, Encode, PrefixEncodeVisitor, VisitBytes};
use tideline_store::{Cancel, ContentStore};
use tracing::trace;

use crate::{ChunkKind, FileRef, IndexError};

/// Maximum bytes held by one leaf region of a file tree.
pub const REGION_SIZE: usize = 256 * 1024;

/// Maximum children per inner node of a file tree.
pub const CHUNK_FANOUT: usize = 64;

struct InnerNode<'a>(&'a [FileRef]);

impl VisitBytes for InnerNode<'_> {
    fn visit<BV: ?Sized + ByteVisitor>(&self, visitor: &mut BV) {
        let mut pe = PrefixEncodeVisitor::new(visitor);
        pe.visit_unsigned(self.0.len() as u64);
        for child in self.0 {
            child.encode_into(&mut pe);
        }
    }
}

fn decode_inner(bytes: &[u8]) -> Result<Vec<FileRef>, IndexError> {
    let mut dec = Decoder::new(bytes);
    let count = dec.unsigned()?;
    let mut children = Vec::with_capacity(count as usize);
    for _ in 0..count {
        children.push(FileRef::decode_from(&mut dec)?);
    }
    dec.finish()?;
    Ok(children)
}

/// Splits `bytes` into content-addressed regions and returns the root
/// reference. A file that fits one region is stored as a single raw leaf, so
/// its digest is the plain content hash of the file.
pub fn store_file_bytes(
    store: &dyn ContentStore,
    bytes: &[u8],
    cancel: &Cancel,
) -> Result<FileRef, IndexError> {
    let total = bytes.len() as u64;
    let mut level: Vec<FileRef> = Vec::with_capacity(bytes.len() / REGION_SIZE + 1);

    if bytes.is_empty() {
        let digest = Digest::of_bytes(bytes);
        store.put(&digest, bytes, cancel)?;
        return Ok(FileRef {
            digest,
            kind: ChunkKind::Leaf,
            size: 0,
        });
    }

    for region in bytes.chunks(REGION_SIZE) {
        let digest = Digest::of_bytes(region);
        store.put(&digest, region, cancel)?;
        level.push(FileRef {
            digest,
            kind: ChunkKind::Leaf,
            size: region.len() as u64,
        });
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / CHUNK_FANOUT + 1);
        for group in level.chunks(CHUNK_FANOUT) {
            let encoded = InnerNode(group).encode();
            let digest = Digest::of_bytes(&encoded);
            store.put(&digest, &encoded, cancel)?;
            next.push(FileRef {
                digest,
                kind: ChunkKind::Inner,
                size: group.iter().map(|c| c.size).sum(),
            });
        }
        level = next;
    }

    let root = level.pop().unwrap();
    debug_assert_eq!(root.size, total);
    trace!(digest = %root.digest, size = total, "file chunked");
    Ok(root)
}

/// Reassembles a file tree back into its original bytes.
///
/// Concatenating the leaf regions in order must reproduce a buffer of
/// exactly `root.size` bytes; anything else is a damaged tree.
pub fn read_file_bytes(
    store: &dyn ContentStore,
    root: &FileRef,
    cancel: &Cancel,
) -> Result<Vec<u8>, IndexError> {
    let mut out = Vec::with_capacity(root.size as usize);
    collect_regions(store, root, &mut out, cancel)?;
    if out.len() as u64 != root.size {
        return Err(IndexError::SizeMismatch {
            expected: root.size,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

fn collect_regions(
    store: &dyn ContentStore,
    node: &FileRef,
    out: &mut Vec<u8>,
    cancel: &Cancel,
) -> Result<(), IndexError> {
    match node.kind {
        ChunkKind::Leaf => {
            out.extend_from_slice(&store.get(&node.digest, cancel)?);
            Ok(())
        }
        ChunkKind::Inner => {
            let bytes = store.get(&node.digest, cancel)?;
            for child in decode_inner(&bytes)? {
                collect_regions(store, &child, out, cancel)?;
            }
            Ok(())
        }
    }
}
