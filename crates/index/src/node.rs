use tideline_crypto::{ByteVisitor, Decoder, Digest, Encode, PrefixEncodeVisitor, VisitBytes};

use crate::{DirEntry, IndexError};

/// Maximum entries per leaf and children per internal node (`F`).
pub const FANOUT: usize = 64;

/// Leading tag byte of a canonical leaf node.
pub const LEAF_TAG: u8 = 0x00;

/// Leading tag byte of a canonical internal node.
pub const INNER_TAG: u8 = 0x01;

/// One node of the directory index tree, in its decoded form.
///
/// A leaf holds a sorted run of entries; an internal node holds `n` child
/// digests and `n − 1` ascending separator paths. All paths under child `i`
/// compare `< separators[i]` and `≥ separators[i − 1]`, with open ends at
/// the extremes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexNode {
    Leaf(Vec<DirEntry>),
    Inner {
        children: Vec<Digest>,
        separators: Vec<String>,
    },
}

impl VisitBytes for IndexNode {
    fn visit<BV: ?Sized + ByteVisitor>(&self, visitor: &mut BV) {
        let mut pe = PrefixEncodeVisitor::new(visitor);
        match self {
            IndexNode::Leaf(entries) => {
                pe.visit_raw([LEAF_TAG]);
                pe.visit_unsigned(entries.len() as u64);
                for entry in entries {
                    entry.encode_into(&mut pe);
                }
            }
            IndexNode::Inner {
                children,
                separators,
            } => {
                pe.visit_raw([INNER_TAG]);
                pe.visit_unsigned(children.len() as u64);
                for child in children {
                    pe.visit_raw(child);
                }
                for separator in separators {
                    pe.visit_str(separator);
                }
            }
        }
    }
}

impl IndexNode {
    /// Digest of the canonical encoding; the identity of this node in CAS.
    pub fn digest(&self) -> Digest {
        Digest::of(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IndexError> {
        let mut dec = Decoder::new(bytes);
        let tag = dec.byte()?;
        let node = match tag {
            LEAF_TAG => {
                let count = dec.unsigned()?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push(DirEntry::decode_from(&mut dec)?);
                }
                for pair in entries.windows(2) {
                    if pair[0].path.as_bytes() >= pair[1].path.as_bytes() {
                        return Err(tideline_crypto::DecodeError::Invalid(format!(
                            "leaf entries out of order at `{}`",
                            pair[1].path
                        ))
                        .into());
                    }
                }
                IndexNode::Leaf(entries)
            }
            INNER_TAG => {
                let count = dec.unsigned()? as usize;
                if count < 2 {
                    return Err(tideline_crypto::DecodeError::Invalid(
                        "internal node with fewer than two children".to_string(),
                    )
                    .into());
                }
                let mut children = Vec::with_capacity(count);
                for _ in 0..count {
                    children.push(dec.digest()?);
                }
                let mut separators = Vec::with_capacity(count - 1);
                for _ in 0..count - 1 {
                    separators.push(dec.str()?.to_string());
                }
                for pair in separators.windows(2) {
                    if pair[0].as_bytes() >= pair[1].as_bytes() {
                        return Err(tideline_crypto::DecodeError::Invalid(
                            "separators out of order".to_string(),
                        )
                        .into());
                    }
                }
                IndexNode::Inner {
                    children,
                    separators,
                }
            }
            other => return Err(tideline_crypto::DecodeError::UnknownTag(other).into()),
        };
        dec.finish()?;
        Ok(node)
    }

    /// Encodes, stores, and returns the node digest.
    pub fn store(
        &self,
        store: &dyn tideline_store::ContentStore,
        cancel: &tideline_store::Cancel,
    ) -> Result<Digest, IndexError> {
        let bytes = self.encode();
        let digest = Digest::of_bytes(&bytes);
        store.put(&digest, &bytes, cancel)?;
        Ok(digest)
    }
}
