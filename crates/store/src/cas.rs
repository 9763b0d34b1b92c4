use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tideline_crypto::Digest;
use tracing::trace;

use crate::{Cancel, StoreError};

const TEMP_DIRECTORY: &str = "temp";

/// Write-once store of `digest → bytes`.
///
/// Objects are self-verifying: a put checks the claimed digest before
/// storing, a get recomputes the digest of whatever it read. A put of an
/// already-present digest succeeds as a no-op.
pub trait ContentStore: Send + Sync {
    fn put(&self, digest: &Digest, bytes: &[u8], cancel: &Cancel) -> Result<(), StoreError>;

    /// Returns a fresh buffer holding the object bytes.
    fn get(&self, digest: &Digest, cancel: &Cancel) -> Result<Vec<u8>, StoreError>;

    fn has(&self, digest: &Digest) -> bool;
}

fn verify_put(digest: &Digest, bytes: &[u8]) -> Result<(), StoreError> {
    let actual = Digest::of_bytes(bytes);
    if actual != *digest {
        return Err(StoreError::HashMismatch {
            expected: *digest,
            actual,
        });
    }
    Ok(())
}

/// In-memory store behind a reader-writer lock. Used by tests and as the
/// staging store for index builds that are later flushed to disk.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<Digest, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ContentStore for MemoryStore {
    fn put(&self, digest: &Digest, bytes: &[u8], cancel: &Cancel) -> Result<(), StoreError> {
        cancel.check()?;
        verify_put(digest, bytes)?;
        self.objects
            .write()
            .entry(*digest)
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    fn get(&self, digest: &Digest, cancel: &Cancel) -> Result<Vec<u8>, StoreError> {
        cancel.check()?;
        self.objects
            .read()
            .get(digest)
            .cloned()
            .ok_or(StoreError::NotFound(*digest))
    }

    fn has(&self, digest: &Digest) -> bool {
        self.objects.read().contains_key(digest)
    }
}

/// Filesystem store laid out as `root/<first-2-hex>/<rest-60-hex>`.
///
/// Writes go through a temporary file in a sibling `temp/` directory and an
/// atomic rename, so any readable object file already carries its final
/// bytes.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
    temp_dir: PathBuf,
}

impl FileStore {
    /// Opens the store rooted at `base_dir`, creating it if absent.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        let temp_dir = base_dir.join(TEMP_DIRECTORY);
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, temp_dir })
    }

    pub fn object_path(&self, digest: &Digest) -> PathBuf {
        let (prefix, rest) = digest.to_path_pair();
        self.base_dir.join(prefix).join(rest)
    }

    fn temp_file(&self) -> Result<NamedTempFile, StoreError> {
        fs::create_dir_all(&self.temp_dir)?;
        Ok(NamedTempFile::new_in(&self.temp_dir)?)
    }
}

impl ContentStore for FileStore {
    fn put(&self, digest: &Digest, bytes: &[u8], cancel: &Cancel) -> Result<(), StoreError> {
        cancel.check()?;
        verify_put(digest, bytes)?;

        let path = self.object_path(digest);
        if path.is_file() {
            trace!(%digest, "object already present");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut temp = self.temp_file()?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        trace!(%digest, len = bytes.len(), "object stored");
        Ok(())
    }

    fn get(&self, digest: &Digest, cancel: &Cancel) -> Result<Vec<u8>, StoreError> {
        cancel.check()?;
        let path = self.object_path(digest);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*digest))
            }
            Err(e) => return Err(e.into()),
        };

        let actual = Digest::of_bytes(&bytes);
        if actual != *digest {
            return Err(StoreError::CorruptObject {
                digest: *digest,
                actual,
            });
        }
        Ok(bytes)
    }

    fn has(&self, digest: &Digest) -> bool {
        self.object_path(digest).is_file()
    }
}
