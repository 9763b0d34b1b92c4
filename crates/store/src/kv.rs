use std::path::Path;

use sled::transaction::{ConflictableTransactionResult, TransactionError, TransactionalTree};
use sled::IVec;

use crate::StoreError;

/// Key namespaces inside the metadata store.
///
/// Everything lives in one sled tree; namespaces are distinguished by byte
/// prefix so a single transaction can span timeline heads, accumulator state,
/// and mappings.
pub mod keys {
    pub const MMR_METADATA: &[u8] = b"mmr/metadata";
    pub const MMR_LEAF_PREFIX: &[u8] = b"mmr/leaf/";
    pub const MMR_NODE_PREFIX: &[u8] = b"mmr/node/";
    pub const TIMELINE_PREFIX: &[u8] = b"timeline/";
    pub const MAPPING_FOREIGN_PREFIX: &[u8] = b"mapping:foreign/";
    pub const MAPPING_NAME_PREFIX: &[u8] = b"mapping:name/";
    pub const CONFIG_REPO: &[u8] = b"config/repo";
    pub const WORKSPACE_INDEX: &[u8] = b"workspace/index";

    fn join(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + suffix.len());
        key.extend_from_slice(prefix);
        key.extend_from_slice(suffix);
        key
    }

    /// `mmr/leaf/<big-endian-u32>` for leaf index `i`.
    pub fn mmr_leaf(index: u32) -> Vec<u8> {
        join(MMR_LEAF_PREFIX, &index.to_be_bytes())
    }

    /// `mmr/node/<big-endian-u32>` for node position `p`.
    pub fn mmr_node(position: u32) -> Vec<u8> {
        join(MMR_NODE_PREFIX, &position.to_be_bytes())
    }

    pub fn timeline(name: &str) -> Vec<u8> {
        join(TIMELINE_PREFIX, name.as_bytes())
    }

    pub fn mapping_foreign(id: &str) -> Vec<u8> {
        join(MAPPING_FOREIGN_PREFIX, id.as_bytes())
    }

    pub fn mapping_name(name: &str) -> Vec<u8> {
        join(MAPPING_NAME_PREFIX, name.as_bytes())
    }
}

/// Persistent ordered key-value store for all non-content repository state.
///
/// sled gives us an on-disk B+-tree with a process-exclusive file lock and
/// crash-safe transactions; a crash mid-transaction leaves the prior state.
#[derive(Debug)]
pub struct MetaStore {
    db: sled::Db,
}

impl MetaStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::Config::new().path(path.as_ref()).open()?;
        Ok(Self { db })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<IVec>, StoreError> {
        Ok(self.db.get(key)?)
    }

    pub fn insert(&self, key: &[u8], value: impl Into<IVec>) -> Result<(), StoreError> {
        self.db.insert(key, value.into())?;
        Ok(())
    }

    pub fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db.remove(key)?;
        Ok(())
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(key)?)
    }

    /// All `(key, value)` pairs under a namespace prefix, in key order.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> impl Iterator<Item = Result<(IVec, IVec), StoreError>> {
        self.db.scan_prefix(prefix).map(|r| r.map_err(Into::into))
    }

    /// Runs `f` as one atomic transaction over the store.
    pub fn transaction<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: Fn(&TransactionalTree) -> ConflictableTransactionResult<(), ()>,
    {
        self.db.transaction(f).map_err(|e| match e {
            TransactionError::Abort(()) => {
                StoreError::Corrupt("metadata transaction aborted".to_string())
            }
            TransactionError::Storage(e) => StoreError::Kv(e),
        })
    }

    /// Forces outstanding writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
