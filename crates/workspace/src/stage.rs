use std::fs;
use std::path::PathBuf;

use crate::WorkspaceError;

/// The staged-paths list, persisted as an LF-separated file that exists only
/// while staging is non-empty.
#[derive(Debug)]
pub struct StageList {
    path: PathBuf,
}

impl StageList {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<String>, WorkspaceError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, paths: &[String]) -> Result<(), WorkspaceError> {
        if paths.is_empty() {
            return self.clear();
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut text = paths.join("\n");
        text.push('\n');
        fs::write(&self.path, text)?;
        Ok(())
    }

    /// Adds paths not already present, keeping the list sorted.
    pub fn add(&self, paths: &[String]) -> Result<(), WorkspaceError> {
        let mut staged = self.load()?;
        for path in paths {
            if !staged.contains(path) {
                staged.push(path.clone());
            }
        }
        staged.sort();
        self.save(&staged)
    }

    /// Removes the named paths; unknown paths are ignored. The backing file
    /// disappears when the list empties.
    pub fn remove(&self, paths: &[String]) -> Result<(), WorkspaceError> {
        let mut staged = self.load()?;
        staged.retain(|path| !paths.contains(path));
        self.save(&staged)
    }

    pub fn clear(&self) -> Result<(), WorkspaceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_empty(&self) -> Result<bool, WorkspaceError> {
        Ok(self.load()?.is_empty())
    }
}
