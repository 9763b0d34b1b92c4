use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use tideline_crypto::Digest;
use tideline_index::{diff, read_file_bytes, DirEntry};
use tideline_store::{Cancel, ContentStore};
use tracing::{debug, info_span};

use crate::WorkspaceError;

/// Filesystem mutations applied by one materialization.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub removed: Vec<String>,
    pub written: Vec<String>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.written.is_empty()
    }
}

enum Applied {
    Removed(DirEntry),
    Overwritten(DirEntry),
    Created(String),
}

/// Rewrites the working directory from `current` to `target`.
///
/// Removals run before writes; files are written via a temporary sibling and
/// rename, and parent directories emptied by a removal are pruned after
/// their last file goes. On failure the applied mutations are unwound in
/// reverse; if the unwind itself fails, the error lists the paths left in an
/// unknown state.
pub fn materialize(
    store: &dyn ContentStore,
    work_dir: &Path,
    current: &Digest,
    target: &Digest,
    cancel: &Cancel,
) -> Result<ApplyReport, WorkspaceError> {
    let span = info_span!("materialize", %current, %target);
    let _guard = span.enter();

    let changes = diff(store, current, target, cancel)?;
    let mut journal: Vec<Applied> = Vec::with_capacity(changes.len());

    let outcome = apply(store, work_dir, &changes, &mut journal, cancel);
    match outcome {
        Ok(report) => Ok(report),
        // The unwind runs with a quiet token so a cancellation mid-apply
        // still rolls the tree back to its pre-switch contents.
        Err(error) => match unwind(store, work_dir, &journal, &Cancel::none()) {
            Ok(()) => Err(error),
            Err(paths) => Err(WorkspaceError::Indeterminate {
                paths,
                source: Box::new(error),
            }),
        },
    }
}

fn apply(
    store: &dyn ContentStore,
    work_dir: &Path,
    changes: &tideline_index::IndexDiff,
    journal: &mut Vec<Applied>,
    cancel: &Cancel,
) -> Result<ApplyReport, WorkspaceError> {
    let mut report = ApplyReport::default();

    for entry in &changes.removed {
        cancel.check().map_err(WorkspaceError::Store)?;
        let path = work_dir.join(&entry.path);
        fs::remove_file(&path)?;
        prune_empty_dirs(work_dir, &path);
        journal.push(Applied::Removed(entry.clone()));
        report.removed.push(entry.path.clone());
    }

    for (old, new) in &changes.modified {
        cancel.check().map_err(WorkspaceError::Store)?;
        write_entry(store, work_dir, new, cancel)?;
        journal.push(Applied::Overwritten(old.clone()));
        report.written.push(new.path.clone());
    }

    for entry in &changes.added {
        cancel.check().map_err(WorkspaceError::Store)?;
        write_entry(store, work_dir, entry, cancel)?;
        journal.push(Applied::Created(entry.path.clone()));
        report.written.push(entry.path.clone());
    }

    debug!(
        removed = report.removed.len(),
        written = report.written.len(),
        "workspace updated"
    );
    Ok(report)
}

fn unwind(
    store: &dyn ContentStore,
    work_dir: &Path,
    journal: &[Applied],
    cancel: &Cancel,
) -> Result<(), Vec<String>> {
    let mut stuck = Vec::new();
    for action in journal.iter().rev() {
        let result = match action {
            Applied::Removed(entry) | Applied::Overwritten(entry) => {
                write_entry(store, work_dir, entry, cancel)
            }
            Applied::Created(path) => {
                let absolute = work_dir.join(path);
                let removed = fs::remove_file(&absolute).map_err(WorkspaceError::Io);
                prune_empty_dirs(work_dir, &absolute);
                removed
            }
        };
        if result.is_err() {
            let path = match action {
                Applied::Removed(e) | Applied::Overwritten(e) => e.path.clone(),
                Applied::Created(p) => p.clone(),
            };
            stuck.push(path);
        }
    }
    if stuck.is_empty() {
        Ok(())
    } else {
        Err(stuck)
    }
}

/// Writes one entry from the object store: temp sibling, rename, then mode
/// and mtime restoration.
fn write_entry(
    store: &dyn ContentStore,
    work_dir: &Path,
    entry: &DirEntry,
    cancel: &Cancel,
) -> Result<(), WorkspaceError> {
    let path = work_dir.join(&entry.path);
    let parent: PathBuf = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| work_dir.to_path_buf());
    fs::create_dir_all(&parent)?;

    let bytes = read_file_bytes(store, &entry.file, cancel)?;
    let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
    std::io::Write::write_all(&mut temp, &bytes)?;
    temp.persist(&path).map_err(|e| WorkspaceError::Io(e.error))?;

    restore_metadata(&path, entry)?;
    Ok(())
}

fn restore_metadata(path: &Path, entry: &DirEntry) -> Result<(), WorkspaceError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(entry.mode))?;
    }

    let mtime = UNIX_EPOCH + Duration::from_nanos(entry.mtime_ns);
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(mtime)?;
    Ok(())
}

/// Removes now-empty ancestor directories of a deleted file, stopping at the
/// workspace root.
fn prune_empty_dirs(work_dir: &Path, removed: &Path) {
    let mut dir = removed.parent();
    while let Some(current) = dir {
        if current == work_dir {
            break;
        }
        // remove_dir only succeeds on empty directories.
        if fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{scan_workspace, ScanOptions};
    use pretty_assertions::assert_eq;
    use tideline_store::MemoryStore;

    fn scan(store: &MemoryStore, dir: &Path) -> Digest {
        scan_workspace(store, dir, &ScanOptions::default(), &Cancel::none()).unwrap()
    }

    #[test]
    fn materialize_applies_adds_edits_and_removals() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();

        fs::write(dir.path().join("keep.txt"), b"keep").unwrap();
        fs::write(dir.path().join("gone.txt"), b"gone").unwrap();
        fs::write(dir.path().join("edit.txt"), b"old").unwrap();
        let current = scan(&store, dir.path());

        let target_dir = tempfile::tempdir().unwrap();
        fs::write(target_dir.path().join("keep.txt"), b"keep").unwrap();
        fs::write(target_dir.path().join("edit.txt"), b"new!").unwrap();
        fs::create_dir_all(target_dir.path().join("sub")).unwrap();
        fs::write(target_dir.path().join("sub/fresh.txt"), b"fresh").unwrap();
        let target = scan(&store, target_dir.path());

        let report =
            materialize(&store, dir.path(), &current, &target, &Cancel::none()).unwrap();
        assert_eq!(report.removed, ["gone.txt"]);

        assert!(!dir.path().join("gone.txt").exists());
        assert_eq!(fs::read(dir.path().join("edit.txt")).unwrap(), b"new!");
        assert_eq!(fs::read(dir.path().join("sub/fresh.txt")).unwrap(), b"fresh");

        // The tree now scans to the target root.
        assert_eq!(scan(&store, dir.path()), target);
    }

    #[test]
    fn empty_directories_are_pruned_after_their_last_file() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("deep/nest")).unwrap();
        fs::write(dir.path().join("deep/nest/only.txt"), b"x").unwrap();
        fs::write(dir.path().join("top.txt"), b"y").unwrap();
        let current = scan(&store, dir.path());

        let target_dir = tempfile::tempdir().unwrap();
        fs::write(target_dir.path().join("top.txt"), b"y").unwrap();
        let target = scan(&store, target_dir.path());

        materialize(&store, dir.path(), &current, &target, &Cancel::none()).unwrap();
        assert!(!dir.path().join("deep").exists());
        assert!(dir.path().join("top.txt").exists());
    }

    #[test]
    fn same_root_is_a_no_op() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let root = scan(&store, dir.path());

        let report = materialize(&store, dir.path(), &root, &root, &Cancel::none()).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn mtime_is_restored_from_the_entry() {
        let store = MemoryStore::new();
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("t.txt"), b"t").unwrap();
        let target = scan(&store, source.path());
        let entry = tideline_index::lookup(&store, &target, "t.txt", &Cancel::none())
            .unwrap()
            .unwrap();

        let dest = tempfile::tempdir().unwrap();
        let empty = scan(&store, dest.path());
        materialize(&store, dest.path(), &empty, &target, &Cancel::none()).unwrap();

        let written = fs::metadata(dest.path().join("t.txt")).unwrap();
        assert_eq!(mtime_of(&written), entry.mtime_ns);
    }

    fn mtime_of(metadata: &fs::Metadata) -> u64 {
        metadata
            .modified()
            .unwrap()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }
}
