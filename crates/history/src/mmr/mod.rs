pub mod pos;
mod proof;

pub use proof::Proof;

use std::sync::Arc;

use tideline_crypto::{
    hash_branch, hash_leaf, ByteVisitor, Decoder, Digest, Encode, PrefixEncodeVisitor, VisitBytes,
};
use tideline_store::{keys, MetaStore};
use tracing::debug;

use crate::{CommitLeaf, HistoryError};

/// Result of appending one leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub index: u64,
    pub leaf_hash: Digest,
    pub root: Digest,
}

struct Metadata {
    leaf_count: u64,
    peak_positions: Vec<u64>,
}

impl VisitBytes for Metadata {
    fn visit<BV: ?Sized + ByteVisitor>(&self, visitor: &mut BV) {
        let mut pe = PrefixEncodeVisitor::new(visitor);
        pe.visit_unsigned(self.leaf_count);
        pe.visit_unsigned(self.peak_positions.len() as u64);
        for position in &self.peak_positions {
            pe.visit_unsigned(*position);
        }
    }
}

impl Metadata {
    fn decode(bytes: &[u8]) -> Result<Self, HistoryError> {
        let mut dec = Decoder::new(bytes);
        let leaf_count = dec.unsigned()?;
        let count = dec.unsigned()?;
        let mut peak_positions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            peak_positions.push(dec.unsigned()?);
        }
        dec.finish()?;
        Ok(Metadata {
            leaf_count,
            peak_positions,
        })
    }
}

/// Append-only accumulator of commit leaves, persisted in the metadata
/// store.
///
/// Node digests live under `mmr/node/<position>`, leaf bytes under
/// `mmr/leaf/<index>`, and the `{leaf-count, peak-positions}` record under
/// `mmr/metadata`; every append writes all three in a single transaction.
/// The peak digests are cached in memory for root and proof computation.
#[derive(Debug)]
pub struct Mmr {
    meta: Arc<MetaStore>,
    leaf_count: u64,
    peaks: Vec<(u64, Digest)>,
}

impl Mmr {
    /// Loads accumulator state, verifying that the stored peak set matches
    /// the stored leaf count.
    pub fn load(meta: Arc<MetaStore>) -> Result<Self, HistoryError> {
        let Some(blob) = meta.get(keys::MMR_METADATA)? else {
            return Ok(Self {
                meta,
                leaf_count: 0,
                peaks: Vec::new(),
            });
        };

        let metadata = Metadata::decode(&blob)?;
        if metadata.peak_positions != pos::peaks_for_leaves(metadata.leaf_count) {
            return Err(HistoryError::Corrupt(format!(
                "stored peak set does not match leaf count {}",
                metadata.leaf_count
            )));
        }

        let mut peaks = Vec::with_capacity(metadata.peak_positions.len());
        for position in metadata.peak_positions {
            let digest = read_node(&meta, position)?;
            peaks.push((position, digest));
        }

        Ok(Self {
            meta,
            leaf_count: metadata.leaf_count,
            peaks,
        })
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Current accumulator root: the right fold of the peaks, or the
    /// all-zero digest when empty.
    pub fn root(&self) -> Digest {
        let digests: Vec<Digest> = self.peaks.iter().map(|(_, d)| *d).collect();
        proof::fold_peaks(&digests)
    }

    /// Appends a leaf. Equivalent to [`Mmr::append_with`] with no extra
    /// writes.
    pub fn append(&mut self, leaf: &CommitLeaf) -> Result<AppendOutcome, HistoryError> {
        self.append_with(leaf, &[])
    }

    /// Appends a leaf, committing the new leaf bytes, node digests, updated
    /// metadata, and any caller-supplied key-value writes in one
    /// transaction. Callers use `extra` to make a timeline head move
    /// observable together with the new root.
    pub fn append_with(
        &mut self,
        leaf: &CommitLeaf,
        extra: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<AppendOutcome, HistoryError> {
        let index = self.leaf_count;
        let leaf_bytes = leaf.encode();
        let leaf_hash = Digest::of_bytes(&leaf_bytes);

        let mut position = pos::leaf_pos(index);
        let mut height = 0u32;
        let mut current = hash_leaf(leaf_hash);

        let mut new_nodes = vec![(position, current)];
        let mut peaks = self.peaks.clone();
        peaks.push((position, current));

        // Equal-height peaks merge while the freshly placed node is a right
        // child; its left sibling is always the previous peak.
        while pos::is_right_child(position, height) {
            let (left_position, left_digest) = peaks[peaks.len() - 2];
            debug_assert_eq!(left_position, pos::sibling(position, height));

            let parent_position = pos::parent(position, height);
            let parent_digest = hash_branch(left_digest, current);

            peaks.pop();
            peaks.pop();
            peaks.push((parent_position, parent_digest));
            new_nodes.push((parent_position, parent_digest));

            position = parent_position;
            current = parent_digest;
            height += 1;
        }

        let leaf_key = keys::mmr_leaf(key_index(index)?);
        let node_writes: Vec<(Vec<u8>, Digest)> = new_nodes
            .iter()
            .map(|(p, d)| Ok((keys::mmr_node(key_index(*p)?), *d)))
            .collect::<Result<_, HistoryError>>()?;
        let metadata = Metadata {
            leaf_count: index + 1,
            peak_positions: peaks.iter().map(|(p, _)| *p).collect(),
        }
        .encode();

        self.meta.transaction(|tx| {
            tx.insert(leaf_key.as_slice(), leaf_bytes.as_slice())?;
            for (key, digest) in &node_writes {
                tx.insert(key.as_slice(), digest.as_bytes().as_slice())?;
            }
            tx.insert(keys::MMR_METADATA, metadata.as_slice())?;
            for (key, value) in extra {
                tx.insert(key.as_slice(), value.as_slice())?;
            }
            Ok(())
        })?;

        self.leaf_count = index + 1;
        self.peaks = peaks;

        let root = self.root();
        debug!(index, %leaf_hash, %root, "leaf appended");
        Ok(AppendOutcome {
            index,
            leaf_hash,
            root,
        })
    }

    /// Canonical bytes of leaf `index`.
    pub fn leaf_bytes(&self, index: u64) -> Result<Vec<u8>, HistoryError> {
        if index >= self.leaf_count {
            return Err(HistoryError::LeafOutOfRange(index));
        }
        let key = keys::mmr_leaf(key_index(index)?);
        let bytes = self
            .meta
            .get(&key)?
            .ok_or_else(|| HistoryError::Corrupt(format!("leaf {index} missing from store")))?;
        Ok(bytes.to_vec())
    }

    /// The single ancestor-resolution primitive: decode leaf `index`.
    pub fn get_leaf(&self, index: u64) -> Result<CommitLeaf, HistoryError> {
        CommitLeaf::decode(&self.leaf_bytes(index)?)
    }

    pub fn leaf_hash(&self, index: u64) -> Result<Digest, HistoryError> {
        Ok(Digest::of_bytes(&self.leaf_bytes(index)?))
    }

    /// Builds the inclusion proof for leaf `index` at the current size.
    pub fn prove(&self, index: u64) -> Result<Proof, HistoryError> {
        if index >= self.leaf_count {
            return Err(HistoryError::LeafOutOfRange(index));
        }

        let peak_positions = pos::peaks_for_leaves(self.leaf_count);
        let mut position = pos::leaf_pos(index);
        let mut height = 0u32;
        let mut siblings = Vec::new();

        while !peak_positions.contains(&position) {
            let sibling = pos::sibling(position, height);
            siblings.push(read_node(&self.meta, sibling)?);
            position = pos::parent(position, height);
            height += 1;
        }

        Ok(Proof {
            leaf_index: index,
            siblings,
            peaks: self.peaks.iter().map(|(_, d)| *d).collect(),
        })
    }
}

fn key_index(value: u64) -> Result<u32, HistoryError> {
    u32::try_from(value)
        .map_err(|_| HistoryError::Corrupt(format!("position {value} exceeds storable range")))
}

fn read_node(meta: &MetaStore, position: u64) -> Result<Digest, HistoryError> {
    let key = keys::mmr_node(key_index(position)?);
    let bytes = meta
        .get(&key)?
        .ok_or_else(|| HistoryError::Corrupt(format!("node {position} missing from store")))?;
    Digest::try_from_slice(&bytes)
        .map_err(|e| HistoryError::Corrupt(format!("node {position}: {e}")))
}
