use std::collections::BTreeMap;

use tideline_crypto::{
    ByteVisitor, DecodeError, Decoder, Digest, PrefixEncodeVisitor, VisitBytes,
};

use crate::HistoryError;

/// Canonical encoding version accepted by the parser.
pub const LEAF_VERSION: u64 = 1;

/// Sentinel `prev` index of a leaf with no same-timeline parent.
pub const NO_PARENT: u64 = u64::MAX;

/// Meta key marking leaves written by the shelf mechanism.
pub const AUTOSHELVED_KEY: &str = "autoshelved";

/// One commit record; the unit appended to the accumulator.
///
/// Parents are referred to by 64-bit leaf index, not digest: `prev` is the
/// previous leaf on the same timeline (or [`NO_PARENT`]) and `merges` lists
/// additional parents in order. `meta` keys are canonically sorted by the
/// `BTreeMap` representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLeaf {
    pub directory_root: Digest,
    pub timeline: String,
    pub prev: u64,
    pub merges: Vec<u64>,
    pub author: String,
    pub unix_time: i64,
    pub message: String,
    pub meta: BTreeMap<String, String>,
}

impl VisitBytes for CommitLeaf {
    fn visit<BV: ?Sized + ByteVisitor>(&self, visitor: &mut BV) {
        let mut pe = PrefixEncodeVisitor::new(visitor);
        pe.visit_unsigned(LEAF_VERSION);
        pe.visit_raw(self.directory_root);
        pe.visit_str(&self.timeline);
        pe.visit_unsigned(self.prev);
        pe.visit_unsigned(self.merges.len() as u64);
        for idx in &self.merges {
            pe.visit_unsigned(*idx);
        }
        pe.visit_str(&self.author);
        pe.visit_signed(self.unix_time);
        pe.visit_str(&self.message);
        pe.visit_unsigned(self.meta.len() as u64);
        for (key, value) in &self.meta {
            pe.visit_str(key);
            pe.visit_str(value);
        }
    }
}

impl CommitLeaf {
    /// Digest of the canonical byte form.
    pub fn hash(&self) -> Digest {
        Digest::of(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HistoryError> {
        let mut dec = Decoder::new(bytes);

        let version = dec.unsigned()?;
        if version != LEAF_VERSION {
            return Err(DecodeError::UnsupportedVersion(version).into());
        }

        let directory_root = dec.digest()?;
        let timeline = dec.str()?.to_string();
        let prev = dec.unsigned()?;

        let merge_count = dec.unsigned()?;
        let mut merges = Vec::with_capacity(merge_count as usize);
        for _ in 0..merge_count {
            merges.push(dec.unsigned()?);
        }

        let author = dec.str()?.to_string();
        let unix_time = dec.signed()?;
        let message = dec.str()?.to_string();

        let meta_count = dec.unsigned()?;
        let mut meta = BTreeMap::new();
        let mut last_key: Option<String> = None;
        for _ in 0..meta_count {
            let key = dec.str()?.to_string();
            if let Some(prev_key) = &last_key {
                if prev_key.as_bytes() >= key.as_bytes() {
                    return Err(DecodeError::Invalid(
                        "meta keys out of canonical order".to_string(),
                    )
                    .into());
                }
            }
            let value = dec.str()?.to_string();
            last_key = Some(key.clone());
            meta.insert(key, value);
        }

        dec.finish()?;
        Ok(CommitLeaf {
            directory_root,
            timeline,
            prev,
            merges,
            author,
            unix_time,
            message,
            meta,
        })
    }

    /// Parent indices in deterministic enumeration order: `prev` first (when
    /// present), then the merge parents as listed.
    pub fn parents(&self) -> impl Iterator<Item = u64> + '_ {
        let prev = (self.prev != NO_PARENT).then_some(self.prev);
        prev.into_iter().chain(self.merges.iter().copied())
    }

    pub fn is_autoshelved(&self) -> bool {
        self.meta.get(AUTOSHELVED_KEY).map(String::as_str) == Some("1")
    }
}
