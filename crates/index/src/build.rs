use tideline_crypto::Digest;
use tideline_store::{Cancel, ContentStore};
use tracing::trace;

use crate::{DirEntry, IndexError, IndexNode, FANOUT};

/// Builds a directory index from entries supplied in any order.
///
/// Entries are sorted by path bytes, packed into leaves of at most
/// [`FANOUT`] entries, then reduced level by level into internal nodes until
/// a single root remains. The result is deterministic: the same entry set
/// always stores the same nodes and returns the same root digest.
#[derive(Default)]
pub struct IndexBuilder {
    entries: Vec<DirEntry>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: DirEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = DirEntry>) {
        self.entries.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores every node and returns the root digest.
    pub fn build(
        mut self,
        store: &dyn ContentStore,
        cancel: &Cancel,
    ) -> Result<Digest, IndexError> {
        self.entries
            .sort_unstable_by(|a, b| a.path.as_bytes().cmp(b.path.as_bytes()));
        for pair in self.entries.windows(2) {
            if pair[0].path == pair[1].path {
                return Err(IndexError::DuplicatePath(pair[1].path.clone()));
            }
        }

        let total = self.entries.len();

        // (digest, smallest path in the subtree) per node of the current
        // level; the smallest path of each non-first child becomes the
        // separator above it.
        let mut level: Vec<(Digest, String)> = Vec::with_capacity(total / FANOUT + 1);

        if self.entries.is_empty() {
            return IndexNode::Leaf(Vec::new()).store(store, cancel);
        }

        let mut entries = std::mem::take(&mut self.entries);
        while !entries.is_empty() {
            let rest = entries.split_off(entries.len().min(FANOUT));
            let first_path = entries[0].path.clone();
            let digest = IndexNode::Leaf(entries).store(store, cancel)?;
            level.push((digest, first_path));
            entries = rest;
        }

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len() / FANOUT + 1);
            for group in level.chunks(FANOUT) {
                if group.len() == 1 {
                    // A lone trailing node is carried up unchanged; internal
                    // nodes always hold at least two children.
                    next.push(group[0].clone());
                    continue;
                }
                let children = group.iter().map(|(d, _)| *d).collect();
                let separators = group[1..].iter().map(|(_, p)| p.clone()).collect();
                let digest = IndexNode::Inner {
                    children,
                    separators,
                }
                .store(store, cancel)?;
                next.push((digest, group[0].1.clone()));
            }
            level = next;
        }

        let (root, _) = level.pop().unwrap();
        trace!(%root, entries = total, "directory index built");
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkKind, FileRef};
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use tideline_crypto::Encode;
    use tideline_store::MemoryStore;

    fn entry(path: &str) -> DirEntry {
        let digest = Digest::of_bytes(path.as_bytes());
        DirEntry::new(
            path,
            FileRef {
                digest,
                kind: ChunkKind::Leaf,
                size: path.len() as u64,
            },
            1_700_000_000_000_000_000,
            0o644,
        )
    }

    #[test]
    fn empty_build_is_the_empty_leaf() {
        let store = MemoryStore::new();
        let root = IndexBuilder::new().build(&store, &Cancel::none()).unwrap();
        assert_eq!(
            root,
            Digest::of_bytes(&IndexNode::Leaf(Vec::new()).encode())
        );
    }

    #[test]
    fn build_is_order_independent() {
        let store = MemoryStore::new();
        let paths: Vec<String> = (0..500).map(|i| format!("dir{}/file{i}.txt", i % 7)).collect();

        let mut forward = IndexBuilder::new();
        forward.extend(paths.iter().map(|p| entry(p)));
        let root_a = forward.build(&store, &Cancel::none()).unwrap();

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut shuffled: Vec<_> = paths.clone();
        shuffled.shuffle(&mut rng);
        let mut backward = IndexBuilder::new();
        backward.extend(shuffled.iter().map(|p| entry(p)));
        let root_b = backward.build(&store, &Cancel::none()).unwrap();

        assert_eq!(root_a, root_b);
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let store = MemoryStore::new();
        let mut builder = IndexBuilder::new();
        builder.push(entry("same"));
        builder.push(entry("same"));
        assert!(matches!(
            builder.build(&store, &Cancel::none()),
            Err(IndexError::DuplicatePath(p)) if p == "same"
        ));
    }

    #[test]
    fn multi_level_tree_stores_every_node() {
        let store = MemoryStore::new();
        let mut builder = IndexBuilder::new();
        builder.extend((0..FANOUT * FANOUT + 3).map(|i| entry(&format!("f{i:06}"))));
        let root = builder.build(&store, &Cancel::none()).unwrap();
        assert!(store.has(&root));
        // Three levels: leaves, one inner level, root.
        assert!(store.len() > FANOUT);
    }
}
