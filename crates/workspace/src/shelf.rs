use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tideline_crypto::Digest;
use tracing::debug;

use crate::WorkspaceError;

/// Saved workspace state for one timeline: the index the workspace scanned
/// to when switching away, the head index it was based on, and the staging
/// list. Auto-shelves are written on switch-out and consumed on switch-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shelf {
    pub id: String,
    pub timeline: String,
    pub created_at: i64,
    pub workspace_index: Digest,
    pub base_index: Digest,
    pub staged_paths: Vec<String>,
    pub auto_created: bool,
}

impl Shelf {
    /// Identifier of the auto-shelf for a timeline. One auto-shelf per
    /// timeline: a newer switch-out replaces the older record.
    pub fn auto_id(timeline: &str) -> String {
        format!("auto-{timeline}")
    }
}

/// Directory of shelf records, one JSON file per shelf id.
#[derive(Debug)]
pub struct ShelfStore {
    dir: PathBuf,
}

impl ShelfStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn save(&self, shelf: &Shelf) -> Result<(), WorkspaceError> {
        fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(shelf)?;
        fs::write(self.path_for(&shelf.id), bytes)?;
        debug!(id = shelf.id, timeline = shelf.timeline, "shelf written");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<Shelf>, WorkspaceError> {
        match fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove(&self, id: &str) -> Result<(), WorkspaceError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The auto-shelf for a timeline, if one was written.
    pub fn auto_shelf_for(&self, timeline: &str) -> Result<Option<Shelf>, WorkspaceError> {
        self.load(&Shelf::auto_id(timeline))
    }

    pub fn list(&self) -> Result<Vec<Shelf>, WorkspaceError> {
        let mut shelves = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(shelves),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                shelves.push(serde_json::from_slice(&fs::read(&path)?)?);
            }
        }
        shelves.sort_by(|a: &Shelf, b: &Shelf| a.id.cmp(&b.id));
        Ok(shelves)
    }
}
