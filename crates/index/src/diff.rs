use std::cmp::Ordering;

use tideline_crypto::Digest;
use tideline_store::{Cancel, ContentStore};

use crate::{DirEntry, IndexError, RangeIter};

/// Result of comparing two directory indices.
///
/// `modified` pairs the old and new entry for a path; any entry-wise
/// inequality counts, including a bare mtime change.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexDiff {
    pub added: Vec<DirEntry>,
    pub modified: Vec<(DirEntry, DirEntry)>,
    pub removed: Vec<DirEntry>,
}

impl IndexDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

/// Symmetric merge of the two sorted entry streams.
pub fn diff(
    store: &dyn ContentStore,
    old_root: &Digest,
    new_root: &Digest,
    cancel: &Cancel,
) -> Result<IndexDiff, IndexError> {
    let mut result = IndexDiff::default();
    if old_root == new_root {
        return Ok(result);
    }

    let mut old_iter = RangeIter::new(store, old_root, None, None, cancel);
    let mut new_iter = RangeIter::new(store, new_root, None, None, cancel);

    let mut old_next = old_iter.next().transpose()?;
    let mut new_next = new_iter.next().transpose()?;

    loop {
        match (old_next.take(), new_next.take()) {
            (None, None) => break,
            (Some(old), None) => {
                result.removed.push(old);
                old_next = old_iter.next().transpose()?;
            }
            (None, Some(new)) => {
                result.added.push(new);
                new_next = new_iter.next().transpose()?;
            }
            (Some(old), Some(new)) => match old.path.as_bytes().cmp(new.path.as_bytes()) {
                Ordering::Less => {
                    result.removed.push(old);
                    old_next = old_iter.next().transpose()?;
                    new_next = Some(new);
                }
                Ordering::Greater => {
                    result.added.push(new);
                    new_next = new_iter.next().transpose()?;
                    old_next = Some(old);
                }
                Ordering::Equal => {
                    if old != new {
                        result.modified.push((old, new));
                    }
                    old_next = old_iter.next().transpose()?;
                    new_next = new_iter.next().transpose()?;
                }
            },
        }
    }

    Ok(result)
}
