use tideline_crypto::Digest;
use tideline_store::{Cancel, ContentStore};

use crate::{DirEntry, IndexError, IndexNode};

/// Finds the entry for `path`, descending one leaf-bound branch of the tree.
pub fn lookup(
    store: &dyn ContentStore,
    root: &Digest,
    path: &str,
    cancel: &Cancel,
) -> Result<Option<DirEntry>, IndexError> {
    let mut current = *root;
    loop {
        let node = IndexNode::decode(&store.get(&current, cancel)?)?;
        match node {
            IndexNode::Leaf(entries) => {
                return Ok(entries
                    .binary_search_by(|e| e.path.as_bytes().cmp(path.as_bytes()))
                    .ok()
                    .map(|i| entries[i].clone()));
            }
            IndexNode::Inner {
                children,
                separators,
            } => {
                // Child i holds paths in [separators[i-1], separators[i]).
                let child = separators.partition_point(|s| s.as_bytes() <= path.as_bytes());
                current = children[child];
            }
        }
    }
}

enum Frame {
    Node(Digest),
    Entries(std::vec::IntoIter<DirEntry>),
}

/// Streaming in-order traversal over `[lo, hi)`, pruned by separators so
/// subtrees entirely outside the range are never fetched.
pub struct RangeIter<'a> {
    store: &'a dyn ContentStore,
    cancel: Cancel,
    lo: Option<Vec<u8>>,
    hi: Option<Vec<u8>>,
    stack: Vec<Frame>,
    done: bool,
}

impl<'a> RangeIter<'a> {
    pub fn new(
        store: &'a dyn ContentStore,
        root: &Digest,
        lo: Option<&[u8]>,
        hi: Option<&[u8]>,
        cancel: &Cancel,
    ) -> Self {
        Self {
            store,
            cancel: cancel.clone(),
            lo: lo.map(<[u8]>::to_vec),
            hi: hi.map(<[u8]>::to_vec),
            stack: vec![Frame::Node(*root)],
            done: false,
        }
    }

    fn below_lo(&self, path: &[u8]) -> bool {
        self.lo.as_deref().is_some_and(|lo| path < lo)
    }

    fn at_or_past_hi(&self, path: &[u8]) -> bool {
        self.hi.as_deref().is_some_and(|hi| path >= hi)
    }

    fn expand(&mut self, digest: Digest) -> Result<(), IndexError> {
        let node = IndexNode::decode(&self.store.get(&digest, &self.cancel)?)?;
        match node {
            IndexNode::Leaf(entries) => {
                self.stack.push(Frame::Entries(entries.into_iter()));
            }
            IndexNode::Inner {
                children,
                separators,
            } => {
                // Push in reverse so the leftmost eligible child pops first.
                for (i, child) in children.iter().enumerate().rev() {
                    let child_min = i.checked_sub(1).map(|j| separators[j].as_bytes());
                    let child_max = separators.get(i).map(|s| s.as_bytes());

                    let past_hi = child_min.is_some_and(|min| self.at_or_past_hi(min));
                    let before_lo = match (child_max, self.lo.as_deref()) {
                        (Some(max), Some(lo)) => max <= lo,
                        _ => false,
                    };
                    if !past_hi && !before_lo {
                        self.stack.push(Frame::Node(*child));
                    }
                }
            }
        }
        Ok(())
    }
}

enum Step {
    Expand(Digest),
    Yield(Option<DirEntry>),
}

impl Iterator for RangeIter<'_> {
    type Item = Result<DirEntry, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let step = match self.stack.last_mut() {
                None => return None,
                Some(Frame::Entries(entries)) => Step::Yield(entries.next()),
                Some(Frame::Node(digest)) => Step::Expand(*digest),
            };

            match step {
                Step::Yield(None) => {
                    self.stack.pop();
                }
                Step::Yield(Some(entry)) => {
                    if self.below_lo(entry.path.as_bytes()) {
                        continue;
                    }
                    if self.at_or_past_hi(entry.path.as_bytes()) {
                        // Entries stream in order; nothing later can
                        // re-enter the range.
                        self.done = true;
                        return None;
                    }
                    return Some(Ok(entry));
                }
                Step::Expand(digest) => {
                    self.stack.pop();
                    if let Err(e) = self.expand(digest) {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }
        }
        None
    }
}

/// All entries in path order.
pub fn list_all(
    store: &dyn ContentStore,
    root: &Digest,
    cancel: &Cancel,
) -> Result<Vec<DirEntry>, IndexError> {
    RangeIter::new(store, root, None, None, cancel).collect()
}

/// Entries with `lo ≤ path < hi` in path order; either bound may be open.
pub fn list_range(
    store: &dyn ContentStore,
    root: &Digest,
    lo: Option<&[u8]>,
    hi: Option<&[u8]>,
    cancel: &Cancel,
) -> Result<Vec<DirEntry>, IndexError> {
    RangeIter::new(store, root, lo, hi, cancel).collect()
}

/// Entries whose path starts with `prefix`, in path order.
pub fn list_prefix(
    store: &dyn ContentStore,
    root: &Digest,
    prefix: &str,
    cancel: &Cancel,
) -> Result<Vec<DirEntry>, IndexError> {
    let hi = prefix_successor(prefix.as_bytes());
    RangeIter::new(
        store,
        root,
        Some(prefix.as_bytes()),
        hi.as_deref(),
        cancel,
    )
    .collect()
}

/// Smallest byte string greater than every string with the given prefix.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bytes = prefix.to_vec();
    while let Some(&last) = bytes.last() {
        if last == 0xff {
            bytes.pop();
        } else {
            *bytes.last_mut().unwrap() = last + 1;
            return Some(bytes);
        }
    }
    None
}
