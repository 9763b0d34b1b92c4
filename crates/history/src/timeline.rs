use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tideline_crypto::Digest;
use tideline_store::{keys, MetaStore};
use tracing::{debug, info};

use crate::{AppendOutcome, CommitLeaf, HistoryError, Mmr, SkipTable, NO_PARENT};

/// Name of the per-repository active-timeline pointer file.
pub const HEAD_FILE: &str = "HEAD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
    Local,
    Remote,
    Tag,
}

impl TimelineKind {
    fn ref_dir(self) -> &'static str {
        match self {
            TimelineKind::Local => "heads",
            TimelineKind::Remote => "remotes",
            TimelineKind::Tag => "tags",
        }
    }
}

impl fmt::Display for TimelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineKind::Local => f.write_str("local"),
            TimelineKind::Remote => f.write_str("remote"),
            TimelineKind::Tag => f.write_str("tag"),
        }
    }
}

/// Stored per-name record. `head` is a leaf index into the accumulator;
/// `head_digest` is the hash of that leaf's canonical bytes (all-zero for a
/// timeline with no commits yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineRecord {
    pub name: String,
    pub kind: TimelineKind,
    pub head: Option<u64>,
    pub head_digest: Digest,
    pub foreign_id: Option<String>,
    pub updated_at: i64,
    pub description: String,
}

/// Caller-supplied fields of a commit; the registry fills `timeline` and
/// `prev` from the head it is advancing.
#[derive(Debug, Clone)]
pub struct PartialLeaf {
    pub directory_root: Digest,
    pub merges: Vec<u64>,
    pub author: String,
    pub unix_time: i64,
    pub message: String,
    pub meta: BTreeMap<String, String>,
}

/// Ref-file path for a record, relative to the repository directory.
pub fn head_ref_path(repo_dir: &Path, kind: TimelineKind, name: &str) -> PathBuf {
    repo_dir.join("refs").join(kind.ref_dir()).join(name)
}

/// Named heads over accumulator leaf indices.
///
/// Records are authoritative in the metadata store and mirrored as text ref
/// files under `refs/`; the active timeline is the `HEAD` pointer file.
/// Per-timeline skip tables answer same-timeline ancestor queries in
/// O(log n).
#[derive(Debug)]
pub struct TimelineRegistry {
    meta: Arc<MetaStore>,
    repo_dir: PathBuf,
    skip: Mutex<HashMap<String, SkipTable>>,
}

impl TimelineRegistry {
    pub fn open(meta: Arc<MetaStore>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            meta,
            repo_dir: repo_dir.into(),
            skip: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a timeline. `head` carries the starting leaf index, if any.
    pub fn create(
        &self,
        name: &str,
        kind: TimelineKind,
        head: Option<u64>,
        updated_at: i64,
        mmr: &Mmr,
    ) -> Result<TimelineRecord, HistoryError> {
        validate_name(name)?;
        if self.meta.get(&keys::timeline(name))?.is_some() {
            return Err(HistoryError::TimelineExists(name.to_string()));
        }

        let head_digest = match head {
            Some(idx) => mmr.leaf_hash(idx)?,
            None => Digest::ZERO,
        };
        let record = TimelineRecord {
            name: name.to_string(),
            kind,
            head,
            head_digest,
            foreign_id: None,
            updated_at,
            description: String::new(),
        };
        self.persist(&record)?;
        self.write_ref_file(&record, self.aux_digest(&record, mmr)?)?;
        info!(name, %kind, head = ?head, "timeline created");
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Result<TimelineRecord, HistoryError> {
        let bytes = self
            .meta
            .get(&keys::timeline(name))?
            .ok_or_else(|| HistoryError::TimelineNotFound(name.to_string()))?;
        Ok(serde_json::from_slice(&bytes)
            .map_err(|e| HistoryError::Corrupt(format!("timeline record `{name}`: {e}")))?)
    }

    pub fn exists(&self, name: &str) -> Result<bool, HistoryError> {
        Ok(self.meta.get(&keys::timeline(name))?.is_some())
    }

    /// All records, ordered by name.
    pub fn list(&self) -> Result<Vec<TimelineRecord>, HistoryError> {
        let mut records = Vec::new();
        for item in self.meta.scan_prefix(keys::TIMELINE_PREFIX) {
            let (_, value) = item?;
            records.push(
                serde_json::from_slice(&value)
                    .map_err(|e| HistoryError::Corrupt(format!("timeline record: {e}")))?,
            );
        }
        Ok(records)
    }

    /// The timeline named by the `HEAD` pointer file.
    pub fn active(&self) -> Result<String, HistoryError> {
        let text = std::fs::read_to_string(self.repo_dir.join(HEAD_FILE))?;
        parse_head(&text)
            .ok_or_else(|| HistoryError::Corrupt(format!("malformed HEAD pointer: {text:?}")))
    }

    pub fn set_active(&self, name: &str) -> Result<(), HistoryError> {
        std::fs::write(
            self.repo_dir.join(HEAD_FILE),
            format!("ref: refs/heads/{name}\n"),
        )?;
        Ok(())
    }

    /// Fills lineage fields, appends to the accumulator, and advances the
    /// head — the head move and the new root land in one transaction.
    pub fn commit(
        &self,
        mmr: &mut Mmr,
        timeline: &str,
        partial: PartialLeaf,
    ) -> Result<AppendOutcome, HistoryError> {
        let mut record = self.get(timeline)?;
        let prev = record.head.unwrap_or(NO_PARENT);

        let leaf = CommitLeaf {
            directory_root: partial.directory_root,
            timeline: timeline.to_string(),
            prev,
            merges: partial.merges,
            author: partial.author,
            unix_time: partial.unix_time,
            message: partial.message,
            meta: partial.meta,
        };

        let index = mmr.leaf_count();
        record.head = Some(index);
        record.head_digest = leaf.hash();
        record.updated_at = partial.unix_time;
        let record_bytes = serde_json::to_vec(&record)
            .map_err(|e| HistoryError::Corrupt(format!("timeline record `{timeline}`: {e}")))?;

        let outcome = mmr.append_with(&leaf, &[(keys::timeline(timeline), record_bytes)])?;
        self.write_ref_file(&record, leaf.directory_root)?;

        let mut tables = self.skip.lock();
        let table = tables.entry(timeline.to_string()).or_default();
        // Only append to a table whose parent row exists; a reopened
        // registry rebuilds the full chain lazily on the first LCA query.
        if prev == NO_PARENT || table.contains(prev) {
            table.extend(outcome.index, prev);
        }
        drop(tables);

        debug!(timeline, index = outcome.index, root = %outcome.root, "head advanced");
        Ok(outcome)
    }

    /// Lowest common ancestor of two leaves.
    ///
    /// Same-timeline pairs resolve through the skip table; pairs across
    /// timelines fall back to an ancestor-set walk that follows `prev` and
    /// every merge parent.
    pub fn lca(&self, mmr: &Mmr, a: u64, b: u64) -> Result<u64, HistoryError> {
        let leaf_a = mmr.get_leaf(a)?;
        let leaf_b = mmr.get_leaf(b)?;
        if a == b {
            return Ok(a);
        }

        if leaf_a.timeline == leaf_b.timeline {
            if let Some(found) = self.skip_lca(mmr, &leaf_a.timeline, a, b)? {
                return Ok(found);
            }
        }

        self.walk_lca(mmr, a, b)
    }

    fn skip_lca(
        &self,
        mmr: &Mmr,
        timeline: &str,
        a: u64,
        b: u64,
    ) -> Result<Option<u64>, HistoryError> {
        let record = self.get(timeline)?;
        let Some(head) = record.head else {
            return Ok(None);
        };

        let mut tables = self.skip.lock();
        let table = tables.entry(timeline.to_string()).or_default();

        // Lazily replay the head chain into the table; stop at the first
        // row it already has.
        let mut chain = Vec::new();
        let mut cursor = head;
        loop {
            if table.contains(cursor) {
                break;
            }
            let leaf = mmr.get_leaf(cursor)?;
            chain.push((cursor, leaf.prev));
            if leaf.prev == NO_PARENT {
                break;
            }
            cursor = leaf.prev;
        }
        for (idx, prev) in chain.into_iter().rev() {
            table.extend(idx, prev);
        }

        Ok(table.lca(a, b))
    }

    fn walk_lca(&self, mmr: &Mmr, a: u64, b: u64) -> Result<u64, HistoryError> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([a]);
        while let Some(idx) = queue.pop_front() {
            if seen.insert(idx) {
                queue.extend(mmr.get_leaf(idx)?.parents());
            }
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([b]);
        while let Some(idx) = queue.pop_front() {
            if seen.contains(&idx) {
                return Ok(idx);
            }
            if visited.insert(idx) {
                queue.extend(mmr.get_leaf(idx)?.parents());
            }
        }

        Err(HistoryError::NoCommonAncestor(a, b))
    }

    fn aux_digest(&self, record: &TimelineRecord, mmr: &Mmr) -> Result<Digest, HistoryError> {
        Ok(match record.head {
            Some(idx) => mmr.get_leaf(idx)?.directory_root,
            None => Digest::ZERO,
        })
    }

    fn persist(&self, record: &TimelineRecord) -> Result<(), HistoryError> {
        let bytes = serde_json::to_vec(record).map_err(|e| {
            HistoryError::Corrupt(format!("timeline record `{}`: {e}", record.name))
        })?;
        self.meta.insert(&keys::timeline(&record.name), bytes)?;
        Ok(())
    }

    fn write_ref_file(&self, record: &TimelineRecord, aux: Digest) -> Result<(), HistoryError> {
        let path = head_ref_path(&self.repo_dir, record.kind, &record.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let foreign = record.foreign_id.as_deref().unwrap_or("-");
        std::fs::write(
            path,
            format!(
                "{} {} {} {} {}\n",
                record.head_digest, aux, foreign, record.updated_at, record.description
            ),
        )?;
        Ok(())
    }
}

fn parse_head(text: &str) -> Option<String> {
    text.trim_end()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_string)
}

fn validate_name(name: &str) -> Result<(), HistoryError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(HistoryError::Corrupt(format!(
            "invalid timeline name `{name}`"
        )))
    }
}

impl FromStr for TimelineKind {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(TimelineKind::Local),
            "remote" => Ok(TimelineKind::Remote),
            "tag" => Ok(TimelineKind::Tag),
            other => Err(HistoryError::Corrupt(format!(
                "unknown timeline kind `{other}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> (tempfile::TempDir, TimelineRegistry, Mmr) {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaStore::open(dir.path().join("meta.db")).unwrap());
        let registry = TimelineRegistry::open(meta.clone(), dir.path());
        let mmr = Mmr::load(meta).unwrap();
        (dir, registry, mmr)
    }

    fn partial(message: &str) -> PartialLeaf {
        PartialLeaf {
            directory_root: Digest::of_bytes(message.as_bytes()),
            merges: Vec::new(),
            author: "a".to_string(),
            unix_time: 1_706_000_000,
            message: message.to_string(),
            meta: BTreeMap::new(),
        }
    }

    #[test]
    fn create_then_commit_advances_head() {
        let (_dir, registry, mut mmr) = setup();
        registry
            .create("main", TimelineKind::Local, None, 0, &mmr)
            .unwrap();

        let first = registry.commit(&mut mmr, "main", partial("init")).unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(mmr.get_leaf(0).unwrap().prev, NO_PARENT);

        let second = registry.commit(&mut mmr, "main", partial("more")).unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(mmr.get_leaf(1).unwrap().prev, 0);

        let record = registry.get("main").unwrap();
        assert_eq!(record.head, Some(1));
        assert_eq!(record.head_digest, mmr.leaf_hash(1).unwrap());
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let (_dir, registry, mmr) = setup();
        registry
            .create("main", TimelineKind::Local, None, 0, &mmr)
            .unwrap();
        assert!(matches!(
            registry.create("main", TimelineKind::Local, None, 0, &mmr),
            Err(HistoryError::TimelineExists(_))
        ));
    }

    #[test]
    fn head_pointer_round_trips() {
        let (_dir, registry, mmr) = setup();
        registry
            .create("main", TimelineKind::Local, None, 0, &mmr)
            .unwrap();
        registry.set_active("main").unwrap();
        assert_eq!(registry.active().unwrap(), "main");
    }

    #[test]
    fn ref_file_has_the_documented_shape() {
        let (dir, registry, mut mmr) = setup();
        registry
            .create("main", TimelineKind::Local, None, 0, &mmr)
            .unwrap();
        registry.commit(&mut mmr, "main", partial("init")).unwrap();

        let text =
            std::fs::read_to_string(head_ref_path(dir.path(), TimelineKind::Local, "main"))
                .unwrap();
        let fields: Vec<&str> = text.trim_end().split(' ').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0], mmr.leaf_hash(0).unwrap().to_string());
        assert_eq!(fields[2], "-");
    }

    #[test]
    fn same_timeline_lca_is_the_older_commit() {
        let (_dir, registry, mut mmr) = setup();
        registry
            .create("main", TimelineKind::Local, None, 0, &mmr)
            .unwrap();
        for n in 0..6 {
            registry
                .commit(&mut mmr, "main", partial(&format!("c{n}")))
                .unwrap();
        }
        assert_eq!(registry.lca(&mmr, 1, 4).unwrap(), 1);
        assert_eq!(registry.lca(&mmr, 5, 5).unwrap(), 5);
    }

    #[test]
    fn cross_timeline_lca_finds_the_fork_base() {
        let (_dir, registry, mut mmr) = setup();
        registry
            .create("main", TimelineKind::Local, None, 0, &mmr)
            .unwrap();
        registry.commit(&mut mmr, "main", partial("c0")).unwrap();
        let base = registry.commit(&mut mmr, "main", partial("c1")).unwrap();

        registry
            .create("feature", TimelineKind::Local, Some(base.index), 0, &mmr)
            .unwrap();
        let x = registry
            .commit(&mut mmr, "feature", partial("feat-a"))
            .unwrap();
        let y = registry.commit(&mut mmr, "main", partial("main-b")).unwrap();

        assert_eq!(registry.lca(&mmr, x.index, y.index).unwrap(), base.index);
    }

    #[test]
    fn disjoint_histories_have_no_common_ancestor() {
        let (_dir, registry, mut mmr) = setup();
        registry
            .create("main", TimelineKind::Local, None, 0, &mmr)
            .unwrap();
        registry
            .create("orphan", TimelineKind::Local, None, 0, &mmr)
            .unwrap();
        let a = registry.commit(&mut mmr, "main", partial("a")).unwrap();
        let b = registry.commit(&mut mmr, "orphan", partial("b")).unwrap();

        assert!(matches!(
            registry.lca(&mmr, a.index, b.index),
            Err(HistoryError::NoCommonAncestor(_, _))
        ));
    }

    #[test]
    fn skip_tables_rebuild_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaStore::open(dir.path().join("meta.db")).unwrap());
        {
            let registry = TimelineRegistry::open(meta.clone(), dir.path());
            let mut mmr = Mmr::load(meta.clone()).unwrap();
            registry
                .create("main", TimelineKind::Local, None, 0, &mmr)
                .unwrap();
            for n in 0..5 {
                registry
                    .commit(&mut mmr, "main", partial(&format!("c{n}")))
                    .unwrap();
            }
        }

        let registry = TimelineRegistry::open(meta.clone(), dir.path());
        let mmr = Mmr::load(meta).unwrap();
        assert_eq!(registry.lca(&mmr, 0, 4).unwrap(), 0);
    }
}
