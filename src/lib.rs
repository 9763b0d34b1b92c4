//! Tideline: a content-addressed version control core.
//!
//! A repository is an opaque `.repo/` directory holding a content-addressed
//! object store, an embedded metadata store, and a small set of text pointer
//! files. Workspace contents are captured as a sorted directory index;
//! commits are canonical leaves appended to a Merkle Mountain Range, so any
//! past commit carries a compact inclusion proof against the current root.
//! Timelines are named heads over leaf indices; switching between them
//! shelves uncommitted work and restores it on the way back.
//!
//! [`Repository`] is the only entry point peer tooling needs:
//!
//! ```no_run
//! use tideline::Repository;
//!
//! let repo = Repository::init("/path/to/project")?;
//! repo.commit("initial import", "dev@example.org")?;
//! repo.create_timeline("feature")?;
//! repo.switch("feature")?;
//! # Ok::<(), tideline::Error>(())
//! ```

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(clippy::all)]

mod config;
mod error;

pub use config::RepoConfig;
pub use error::{Error, ErrorKind};

pub use tideline_crypto::{hash_branch, hash_leaf, Digest, DigestParseError};
pub use tideline_history::{
    CommitLeaf, Proof, TimelineKind, TimelineRecord, AUTOSHELVED_KEY, NO_PARENT,
};
pub use tideline_index::{DirEntry, IndexDiff};
pub use tideline_store::Cancel;
pub use tideline_workspace::{Shelf, SwitchOutcome};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tideline_crypto::Encode;
use tideline_history::{Mmr, PartialLeaf, TimelineRegistry};
use tideline_index::{diff, IndexBuilder};
use tideline_store::{keys, ContentStore, FileStore, MetaStore, RepoLock};
use tideline_workspace::{scan_workspace, ScanOptions, ShelfStore, StageList, SwitchContext};
use tracing::{info, instrument};

/// Name of the repository directory inside a workspace.
pub const REPO_DIR: &str = ".repo";

const DEFAULT_TIMELINE: &str = "main";

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub timeline: String,
    pub index: u64,
    pub leaf_hash: Digest,
    pub mmr_root: Digest,
    pub directory_root: Digest,
}

/// Workspace state relative to the active head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub timeline: String,
    pub head: Option<u64>,
    pub changes: IndexDiff,
    pub staged: Vec<String>,
}

/// An opened repository: the single-writer handle over one workspace.
///
/// Mutating operations (commit, switch, create-timeline, staging) serialize
/// on an internal lock; read paths (lookups, proofs, status) share it.
/// Process exclusivity is enforced by a file lock taken at open.
#[derive(Debug)]
pub struct Repository {
    work_dir: PathBuf,
    repo_dir: PathBuf,
    store: FileStore,
    meta: Arc<MetaStore>,
    registry: TimelineRegistry,
    shelves: ShelfStore,
    stage: StageList,
    config: RepoConfig,
    mmr: RwLock<Mmr>,
    cancel: Cancel,
    _lock: RepoLock,
}

impl Repository {
    /// Creates the `.repo/` layout under `work_dir` and opens it, with
    /// timeline `main` active and headless.
    pub fn init(work_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let work_dir = work_dir.into();
        let repo_dir = work_dir.join(REPO_DIR);
        if repo_dir.exists() {
            return Err(Error::PreconditionFailed(format!(
                "repository already initialized at `{}`",
                repo_dir.display()
            )));
        }
        std::fs::create_dir_all(repo_dir.join("refs").join("heads"))?;

        let repo = Self::open_at(work_dir, repo_dir)?;
        {
            let mmr = repo.mmr.read();
            repo.registry
                .create(DEFAULT_TIMELINE, TimelineKind::Local, None, now(), &mmr)
                .map_err(Error::History)?;
        }
        repo.registry
            .set_active(DEFAULT_TIMELINE)
            .map_err(Error::History)?;
        repo.config.save(&repo.meta)?;
        info!(dir = %repo.work_dir.display(), "repository initialized");
        Ok(repo)
    }

    /// Opens an existing repository rooted at `work_dir`.
    pub fn open(work_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let work_dir = work_dir.into();
        let repo_dir = work_dir.join(REPO_DIR);
        if !repo_dir.is_dir() {
            return Err(Error::PreconditionFailed(format!(
                "no repository at `{}`",
                repo_dir.display()
            )));
        }
        Self::open_at(work_dir, repo_dir)
    }

    fn open_at(work_dir: PathBuf, repo_dir: PathBuf) -> Result<Self, Error> {
        let lock = RepoLock::acquire(repo_dir.join(".lock"))?;
        let store = FileStore::open(repo_dir.join("objects"))?;
        let meta = Arc::new(MetaStore::open(repo_dir.join("meta.db"))?);
        let config = RepoConfig::load(&meta)?;
        let registry = TimelineRegistry::open(meta.clone(), &repo_dir);
        let shelves = ShelfStore::open(repo_dir.join("shelves"));
        let stage = StageList::open(repo_dir.join("stage").join("files"));
        let mmr = Mmr::load(meta.clone()).map_err(Error::History)?;

        Ok(Self {
            work_dir,
            repo_dir,
            store,
            meta,
            registry,
            shelves,
            stage,
            config,
            mmr: RwLock::new(mmr),
            cancel: Cancel::new(),
            _lock: lock,
        })
    }

    /// Token that aborts in-flight store and filesystem work when fired.
    pub fn cancel_token(&self) -> Cancel {
        self.cancel.clone()
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Replaces the repo-local configuration, durably.
    pub fn set_config(&mut self, config: RepoConfig) -> Result<(), Error> {
        config.save(&self.meta)?;
        self.config = config;
        Ok(())
    }

    /// Walks the working directory into a directory index and returns its
    /// root. The root is remembered for the next scan's fast path.
    pub fn scan(&self) -> Result<Digest, Error> {
        let root = scan_workspace(
            &self.store,
            &self.work_dir,
            &ScanOptions {
                prev_index: self.last_workspace_root()?,
                pool_size: self.config.pool_size,
            },
            &self.cancel,
        )
        .map_err(Error::Workspace)?;
        self.remember_workspace_root(root)?;
        Ok(root)
    }

    /// Commits the current workspace contents to the active timeline.
    #[instrument(skip(self))]
    pub fn commit(&self, message: &str, author: &str) -> Result<CommitOutcome, Error> {
        self.commit_with_merges(message, author, Vec::new())
    }

    /// Commits with additional parent indices, recording a merge of those
    /// histories into the active timeline.
    pub fn commit_with_merges(
        &self,
        message: &str,
        author: &str,
        merges: Vec<u64>,
    ) -> Result<CommitOutcome, Error> {
        let mut mmr = self.mmr.write();
        for parent in &merges {
            if *parent >= mmr.leaf_count() {
                return Err(Error::PreconditionFailed(format!(
                    "merge parent {parent} is not an existing leaf"
                )));
            }
        }

        let timeline = self.registry.active().map_err(Error::History)?;
        let directory_root = self.scan()?;

        let outcome = self
            .registry
            .commit(
                &mut mmr,
                &timeline,
                PartialLeaf {
                    directory_root,
                    merges,
                    author: author.to_string(),
                    unix_time: now(),
                    message: message.to_string(),
                    meta: BTreeMap::new(),
                },
            )
            .map_err(Error::History)?;

        info!(timeline, index = outcome.index, "committed");
        Ok(CommitOutcome {
            timeline,
            index: outcome.index,
            leaf_hash: outcome.leaf_hash,
            mmr_root: outcome.root,
            directory_root,
        })
    }

    /// Switches the workspace to another timeline, auto-shelving
    /// uncommitted work on the way out and restoring any shelf on the way
    /// in.
    #[instrument(skip(self))]
    pub fn switch(&self, timeline: &str) -> Result<SwitchOutcome, Error> {
        let mmr = self.mmr.write();
        let context = SwitchContext {
            store: &self.store,
            work_dir: &self.work_dir,
            shelves: &self.shelves,
            stage: &self.stage,
            autoshelf: self.config.autoshelf,
            prev_index: self.last_workspace_root()?,
            pool_size: self.config.pool_size,
            now: now(),
            cancel: &self.cancel,
        };
        let outcome = tideline_workspace::switch(&context, &self.registry, &mmr, timeline)
            .map_err(Error::Workspace)?;
        self.remember_workspace_root(outcome.workspace_root)?;
        Ok(outcome)
    }

    /// Creates a timeline pointing at the active head.
    pub fn create_timeline(&self, name: &str) -> Result<TimelineRecord, Error> {
        let mmr = self.mmr.read();
        let active = self.registry.active().map_err(Error::History)?;
        let head = self.registry.get(&active).map_err(Error::History)?.head;
        self.registry
            .create(name, TimelineKind::Local, head, now(), &mmr)
            .map_err(Error::History)
    }

    pub fn list_timelines(&self) -> Result<Vec<TimelineRecord>, Error> {
        self.registry.list().map_err(Error::History)
    }

    /// Name and head of the active timeline.
    pub fn head(&self) -> Result<(String, Option<u64>), Error> {
        let active = self.registry.active().map_err(Error::History)?;
        let record = self.registry.get(&active).map_err(Error::History)?;
        Ok((active, record.head))
    }

    /// Compares the working directory against the active head.
    pub fn status(&self) -> Result<Status, Error> {
        let mmr = self.mmr.read();
        let timeline = self.registry.active().map_err(Error::History)?;
        let record = self.registry.get(&timeline).map_err(Error::History)?;

        let head_root = match record.head {
            Some(idx) => mmr.get_leaf(idx).map_err(Error::History)?.directory_root,
            None => IndexBuilder::new()
                .build(&self.store, &self.cancel)
                .map_err(Error::Index)?,
        };
        let workspace_root = self.scan()?;
        let changes = diff(&self.store, &head_root, &workspace_root, &self.cancel)
            .map_err(Error::Index)?;

        Ok(Status {
            timeline,
            head: record.head,
            changes,
            staged: self.stage.load().map_err(Error::Workspace)?,
        })
    }

    /// Adds paths to the staged list.
    pub fn stage(&self, paths: &[String]) -> Result<(), Error> {
        self.stage.add(paths).map_err(Error::Workspace)
    }

    /// Removes paths from the staged list; unknown paths are ignored.
    pub fn unstage(&self, paths: &[String]) -> Result<(), Error> {
        self.stage.remove(paths).map_err(Error::Workspace)
    }

    pub fn staged(&self) -> Result<Vec<String>, Error> {
        self.stage.load().map_err(Error::Workspace)
    }

    /// Decodes leaf `index` from the accumulator; the single
    /// ancestor-resolution primitive.
    pub fn get_leaf(&self, index: u64) -> Result<CommitLeaf, Error> {
        self.mmr.read().get_leaf(index).map_err(Error::History)
    }

    /// Looks up one path in the tree captured by commit `index`.
    pub fn lookup_at(&self, index: u64, path: &str) -> Result<Option<DirEntry>, Error> {
        let root = self.get_leaf(index)?.directory_root;
        tideline_index::lookup(&self.store, &root, path, &self.cancel).map_err(Error::Index)
    }

    /// Entries of the tree captured by commit `index`, optionally limited
    /// to a path prefix, in path order.
    pub fn list_at(&self, index: u64, prefix: Option<&str>) -> Result<Vec<DirEntry>, Error> {
        let root = self.get_leaf(index)?.directory_root;
        match prefix {
            Some(prefix) => {
                tideline_index::list_prefix(&self.store, &root, prefix, &self.cancel)
                    .map_err(Error::Index)
            }
            None => {
                tideline_index::list_all(&self.store, &root, &self.cancel).map_err(Error::Index)
            }
        }
    }

    pub fn leaf_hash(&self, index: u64) -> Result<Digest, Error> {
        self.mmr.read().leaf_hash(index).map_err(Error::History)
    }

    pub fn leaf_count(&self) -> u64 {
        self.mmr.read().leaf_count()
    }

    /// Current accumulator root.
    pub fn mmr_root(&self) -> Digest {
        self.mmr.read().root()
    }

    /// Canonical inclusion-proof bytes for leaf `index` at the current
    /// accumulator size.
    pub fn proof(&self, index: u64) -> Result<Vec<u8>, Error> {
        let proof = self.mmr.read().prove(index).map_err(Error::History)?;
        Ok(proof.encode())
    }

    /// Checks canonical proof bytes against a claimed root and leaf hash.
    /// Malformed bytes are an error; a well-formed proof that does not bind
    /// returns `Ok(false)`.
    pub fn verify(proof_bytes: &[u8], root: &Digest, leaf_hash: &Digest) -> Result<bool, Error> {
        let proof = Proof::decode(proof_bytes).map_err(Error::History)?;
        Ok(proof.verify(leaf_hash, root))
    }

    /// Lowest common ancestor of two leaves.
    pub fn lca(&self, a: u64, b: u64) -> Result<u64, Error> {
        let mmr = self.mmr.read();
        self.registry.lca(&mmr, a, b).map_err(Error::History)
    }

    /// Records a foreign-object identity for a future import bridge. Never
    /// consulted by commit or switch.
    pub fn record_foreign_mapping(&self, foreign: &str, native: &Digest) -> Result<(), Error> {
        self.meta
            .insert(&keys::mapping_foreign(foreign), native.as_bytes().as_slice())?;
        Ok(())
    }

    pub fn lookup_foreign_mapping(&self, foreign: &str) -> Result<Option<Digest>, Error> {
        lookup_mapping(&self.meta, &keys::mapping_foreign(foreign))
    }

    /// Records a name-to-digest mapping for a future import bridge.
    pub fn record_name_mapping(&self, name: &str, native: &Digest) -> Result<(), Error> {
        self.meta
            .insert(&keys::mapping_name(name), native.as_bytes().as_slice())?;
        Ok(())
    }

    pub fn lookup_name_mapping(&self, name: &str) -> Result<Option<Digest>, Error> {
        lookup_mapping(&self.meta, &keys::mapping_name(name))
    }

    /// Direct read access to the object store.
    pub fn object(&self, digest: &Digest) -> Result<Vec<u8>, Error> {
        Ok(self.store.get(digest, &self.cancel)?)
    }

    pub fn has_object(&self, digest: &Digest) -> bool {
        self.store.has(digest)
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn last_workspace_root(&self) -> Result<Option<Digest>, Error> {
        match self.meta.get(keys::WORKSPACE_INDEX)? {
            Some(bytes) => Ok(Digest::try_from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }

    fn remember_workspace_root(&self, root: Digest) -> Result<(), Error> {
        self.meta
            .insert(keys::WORKSPACE_INDEX, root.as_bytes().as_slice())?;
        Ok(())
    }
}

fn lookup_mapping(meta: &MetaStore, key: &[u8]) -> Result<Option<Digest>, Error> {
    match meta.get(key)? {
        Some(bytes) => Ok(Some(Digest::try_from_slice(&bytes).map_err(|e| {
            Error::Store(tideline_store::StoreError::Corrupt(format!(
                "mapping value: {e}"
            )))
        })?)),
        None => Ok(None),
    }
}

fn now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}
