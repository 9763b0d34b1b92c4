use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use tideline_crypto::Digest;
use tideline_index::{list_all, store_file_bytes, DirEntry, IndexBuilder};
use tideline_store::{Cancel, ContentStore};
use tracing::{debug, info_span};
use walkdir::WalkDir;

use crate::WorkspaceError;

/// Default hashing-pool width: one worker per CPU, capped at eight.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Scan configuration.
pub struct ScanOptions {
    /// Root of the previously scanned index, enabling the mtime+size fast
    /// path.
    pub prev_index: Option<Digest>,
    /// Worker threads for hashing changed files; `None` selects
    /// `min(cpus, DEFAULT_POOL_SIZE)`.
    pub pool_size: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            prev_index: None,
            pool_size: None,
        }
    }
}

fn effective_pool_size(requested: Option<usize>) -> usize {
    requested
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
                .min(DEFAULT_POOL_SIZE)
        })
        .max(1)
}

struct Candidate {
    path: String,
    mtime_ns: u64,
    mode: u32,
    size: u64,
}

/// Walks the working directory into a directory index and returns the root.
///
/// Dot-prefixed names (the repository directory among them) are skipped.
/// Files whose mtime and size match the previous index reuse the recorded
/// file reference; everything else is read and chunked on a bounded worker
/// pool, in a stable order so the resulting index is deterministic.
pub fn scan_workspace(
    store: &dyn ContentStore,
    work_dir: &Path,
    options: &ScanOptions,
    cancel: &Cancel,
) -> Result<Digest, WorkspaceError> {
    let span = info_span!("scan", dir = %work_dir.display());
    let _guard = span.enter();

    let prev: HashMap<String, DirEntry> = match &options.prev_index {
        Some(root) => list_all(store, root, cancel)?
            .into_iter()
            .map(|e| (e.path.clone(), e))
            .collect(),
        None => HashMap::new(),
    };

    let mut candidates = Vec::new();
    let walker = WalkDir::new(work_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .map_or(false, |name| name.starts_with('.'))
        });

    for entry in walker {
        cancel.check().map_err(WorkspaceError::Store)?;
        let entry = entry.map_err(|e| WorkspaceError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(rel) = entry.path().strip_prefix(work_dir) else {
            continue;
        };
        let path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let metadata = entry.metadata().map_err(|e| {
            WorkspaceError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "metadata unavailable")
            }))
        })?;
        candidates.push(Candidate {
            path,
            mtime_ns: mtime_ns(&metadata),
            mode: file_mode(&metadata),
            size: metadata.len(),
        });
    }

    let mut reused = 0usize;
    let mut to_hash = Vec::new();
    let mut entries = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match prev.get(&candidate.path) {
            Some(old) if old.mtime_ns == candidate.mtime_ns && old.size == candidate.size => {
                reused += 1;
                entries.push(DirEntry::new(
                    candidate.path,
                    old.file,
                    candidate.mtime_ns,
                    candidate.mode,
                ));
            }
            _ => to_hash.push(candidate),
        }
    }

    // Chunk changed files on the bounded pool; par_iter keeps submission
    // order in the collected output.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(effective_pool_size(options.pool_size))
        .build()
        .map_err(|e| WorkspaceError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    let hashed: Result<Vec<DirEntry>, WorkspaceError> = pool.install(|| {
        to_hash
            .par_iter()
            .map(|candidate| {
                cancel.check().map_err(WorkspaceError::Store)?;
                let bytes = fs::read(work_dir.join(&candidate.path))?;
                let file = store_file_bytes(store, &bytes, cancel)?;
                Ok(DirEntry::new(
                    candidate.path.clone(),
                    file,
                    candidate.mtime_ns,
                    candidate.mode,
                ))
            })
            .collect()
    });
    let hashed = hashed?;

    debug!(
        total = entries.len() + hashed.len(),
        reused,
        hashed = hashed.len(),
        "workspace scanned"
    );

    let mut builder = IndexBuilder::new();
    builder.extend(entries);
    builder.extend(hashed);
    Ok(builder.build(store, cancel)?)
}

fn mtime_ns(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}
