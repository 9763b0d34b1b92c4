use tideline_crypto::{
    hash_branch, hash_leaf, ByteVisitor, Decoder, Digest, PrefixEncodeVisitor, VisitBytes,
};

use crate::mmr::pos;
use crate::HistoryError;

/// Inclusion proof for one leaf against an accumulator root.
///
/// `siblings` are the digests hashed in on the way from the leaf to its
/// peak; `peaks` is the full peak set of the accumulator at proof time. The
/// orientation of every fold step is implied by the leaf position, so the
/// proof carries no side flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub leaf_index: u64,
    pub siblings: Vec<Digest>,
    pub peaks: Vec<Digest>,
}

/// Fold the peak list right-to-left into the accumulator root.
pub(crate) fn fold_peaks(peaks: &[Digest]) -> Digest {
    peaks
        .iter()
        .rev()
        .copied()
        .reduce(|acc, peak| hash_branch(peak, acc))
        .unwrap_or(Digest::ZERO)
}

impl VisitBytes for Proof {
    fn visit<BV: ?Sized + ByteVisitor>(&self, visitor: &mut BV) {
        let mut pe = PrefixEncodeVisitor::new(visitor);
        pe.visit_unsigned(self.leaf_index);
        pe.visit_unsigned(self.siblings.len() as u64);
        for digest in &self.siblings {
            pe.visit_raw(digest);
        }
        pe.visit_unsigned(self.peaks.len() as u64);
        for digest in &self.peaks {
            pe.visit_raw(digest);
        }
    }
}

impl Proof {
    pub fn decode(bytes: &[u8]) -> Result<Self, HistoryError> {
        let mut dec = Decoder::new(bytes);
        let leaf_index = dec.unsigned()?;

        let sibling_count = dec.unsigned()?;
        let mut siblings = Vec::with_capacity(sibling_count as usize);
        for _ in 0..sibling_count {
            siblings.push(dec.digest()?);
        }

        let peak_count = dec.unsigned()?;
        let mut peaks = Vec::with_capacity(peak_count as usize);
        for _ in 0..peak_count {
            peaks.push(dec.digest()?);
        }

        dec.finish()?;
        Ok(Proof {
            leaf_index,
            siblings,
            peaks,
        })
    }

    /// Checks the proof for a leaf whose canonical bytes hash to
    /// `leaf_hash`, against a claimed accumulator root.
    ///
    /// The leaf-side peak is rebuilt by folding `H(0x00 ‖ leaf-hash)` with
    /// each sibling, taking left/right orientation from the position bits;
    /// the rebuilt peak must appear in the peak set, and the peak set must
    /// fold to the claimed root.
    pub fn verify(&self, leaf_hash: &Digest, root: &Digest) -> bool {
        if self.peaks.is_empty() {
            return false;
        }

        let mut position = pos::leaf_pos(self.leaf_index);
        let mut height = 0u32;
        let mut current = hash_leaf(leaf_hash);

        for sibling in &self.siblings {
            if pos::is_right_child(position, height) {
                current = hash_branch(sibling, current);
            } else {
                current = hash_branch(current, sibling);
            }
            position = pos::parent(position, height);
            height += 1;
        }

        self.peaks.contains(&current) && fold_peaks(&self.peaks) == *root
    }
}
