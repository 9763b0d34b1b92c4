use serde::{Deserialize, Serialize};
use tideline_store::{keys, MetaStore};

use crate::Error;

/// Repo-local configuration, stored as JSON in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Capture uncommitted work as an auto-shelf when switching away from a
    /// dirty timeline. With this off, switching a dirty workspace fails.
    pub autoshelf: bool,
    /// Worker threads for hashing during scans; `None` selects
    /// `min(cpus, 8)`.
    pub pool_size: Option<usize>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            autoshelf: true,
            pool_size: None,
        }
    }
}

impl RepoConfig {
    pub fn load(meta: &MetaStore) -> Result<Self, Error> {
        match meta.get(keys::CONFIG_REPO)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Store(tideline_store::StoreError::Corrupt(format!(
                    "repository config: {e}"
                )))
            }),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, meta: &MetaStore) -> Result<(), Error> {
        let bytes = serde_json::to_vec(self).map_err(|e| {
            Error::Store(tideline_store::StoreError::Corrupt(format!(
                "repository config: {e}"
            )))
        })?;
        meta.insert(keys::CONFIG_REPO, bytes)?;
        Ok(())
    }
}
