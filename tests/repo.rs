//! End-to-end scenarios over a real on-disk repository.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use pretty_assertions::assert_eq;
use tideline::{hash_leaf, Digest, ErrorKind, Repository, NO_PARENT, REPO_DIR};

static MTIME_TICK: AtomicU64 = AtomicU64::new(1_700_000_000);

/// Writes a file with a strictly increasing mtime, so edits that keep the
/// byte length are still visible to the scanner's mtime+size fast path.
fn write_file(dir: &Path, rel: &str, bytes: &[u8]) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, bytes).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    }
    let tick = MTIME_TICK.fetch_add(1, Ordering::Relaxed);
    let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(tick))
        .unwrap();
}

/// Byte snapshot of the working tree, repository directory excluded.
fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    for entry in walkdir(dir, dir) {
        out.insert(
            entry.clone(),
            fs::read(dir.join(&entry)).unwrap_or_default(),
        );
    }
    out
}

fn walkdir(root: &Path, dir: &Path) -> Vec<String> {
    let mut paths = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return paths;
    };
    for entry in entries {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            paths.extend(walkdir(root, &path));
        } else {
            paths.push(
                path.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/"),
            );
        }
    }
    paths
}

#[test]
fn empty_commit_pins_the_empty_index() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();

    let outcome = repo.commit("init", "a").unwrap();
    assert_eq!(outcome.timeline, "main");
    assert_eq!(outcome.index, 0);

    // Empty directory index: leaf tag plus zero entry count.
    assert_eq!(outcome.directory_root, Digest::of_bytes([0x00, 0x00]));

    // Single-leaf accumulator root is the domain-separated leaf node.
    assert_eq!(outcome.mmr_root, hash_leaf(outcome.leaf_hash));

    let (timeline, head) = repo.head().unwrap();
    assert_eq!((timeline.as_str(), head), ("main", Some(0)));
}

#[test]
fn single_file_commit_records_content_address() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write_file(dir.path(), "hello.txt", b"hi\n");

    let outcome = repo.commit("first", "a").unwrap();
    assert_eq!(repo.leaf_count(), 1);

    let leaf = repo.get_leaf(outcome.index).unwrap();
    assert_eq!(leaf.message, "first");
    assert_eq!(leaf.prev, NO_PARENT);

    let status = repo.status().unwrap();
    assert!(status.changes.is_empty());

    // The stored entry addresses the raw file bytes.
    let expected = Digest::of_bytes(b"hi\n");
    assert!(repo.has_object(&expected));
    assert_eq!(repo.object(&expected).unwrap(), b"hi\n");
}

#[test]
fn modify_and_recommit_links_lineage() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write_file(dir.path(), "hello.txt", b"hi\n");
    repo.commit("first", "a").unwrap();

    write_file(dir.path(), "hello.txt", b"HI\n");
    let status = repo.status().unwrap();
    assert_eq!(status.changes.modified.len(), 1);
    assert_eq!(status.changes.modified[0].0.path, "hello.txt");
    assert!(status.changes.added.is_empty());
    assert!(status.changes.removed.is_empty());

    let second = repo.commit("second", "a").unwrap();
    assert_eq!(second.index, 1);
    assert_eq!(repo.get_leaf(1).unwrap().prev, 0);
    assert_eq!(repo.leaf_count(), 2);
    assert_eq!(repo.lca(0, 1).unwrap(), 0);
}

#[test]
fn branch_and_diverge_isolates_timelines() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write_file(dir.path(), "hello.txt", b"hi\n");
    repo.commit("first", "a").unwrap();
    write_file(dir.path(), "hello.txt", b"HI\n");
    let base = repo.commit("second", "a").unwrap();

    repo.create_timeline("feature").unwrap();
    repo.switch("feature").unwrap();
    write_file(dir.path(), "a.txt", b"A");
    let feat = repo.commit("feat-A", "a").unwrap();

    repo.switch("main").unwrap();
    assert!(!dir.path().join("a.txt").exists());
    write_file(dir.path(), "b.txt", b"B");
    let main = repo.commit("main-B", "a").unwrap();

    assert_eq!(repo.lca(main.index, feat.index).unwrap(), base.index);

    repo.switch("feature").unwrap();
    assert!(dir.path().join("a.txt").exists());
    assert!(!dir.path().join("b.txt").exists());
}

#[test]
fn proofs_bind_leaves_to_roots() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    for n in 0..4 {
        write_file(dir.path(), "file.txt", format!("rev {n}\n").as_bytes());
        repo.commit(&format!("c{n}"), "a").unwrap();
    }

    let leaf_hash = repo.leaf_hash(1).unwrap();
    let proof_bytes = repo.proof(1).unwrap();
    let root = repo.mmr_root();
    assert!(Repository::verify(&proof_bytes, &root, &leaf_hash).unwrap());

    // Each later size re-proves the same leaf against its own root.
    for n in 4..9 {
        write_file(dir.path(), "file.txt", format!("rev {n}\n").as_bytes());
        repo.commit(&format!("c{n}"), "a").unwrap();
        let fresh = repo.proof(1).unwrap();
        assert!(Repository::verify(&fresh, &repo.mmr_root(), &leaf_hash).unwrap());
    }

    // The earlier proof pins the earlier peak set and does not carry over.
    assert!(!Repository::verify(&proof_bytes, &repo.mmr_root(), &leaf_hash).unwrap());

    // A flipped root bit is rejected outright.
    let mut bad_root = *root.as_bytes();
    bad_root[0] ^= 1;
    assert!(
        !Repository::verify(&proof_bytes, &Digest::from_bytes(bad_root), &leaf_hash).unwrap()
    );

    // Garbage bytes are a typed encoding error, not `false`.
    let err = Repository::verify(b"not a proof", &root, &leaf_hash).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidEncoding);
}

#[test]
fn auto_shelf_round_trip_preserves_work_and_staging() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write_file(dir.path(), "hello.txt", b"hi\n");
    repo.commit("first", "a").unwrap();
    repo.create_timeline("feature").unwrap();

    // Dirty the workspace and stage a path without committing.
    write_file(dir.path(), "hello.txt", b"??\n");
    repo.stage(&["hello.txt".to_string()]).unwrap();

    let out = repo.switch("feature").unwrap();
    assert!(out.shelved);
    assert_eq!(fs::read(dir.path().join("hello.txt")).unwrap(), b"hi\n");
    assert!(repo.staged().unwrap().is_empty());

    let back = repo.switch("main").unwrap();
    assert_eq!(back.restored_staged, ["hello.txt"]);
    assert_eq!(fs::read(dir.path().join("hello.txt")).unwrap(), b"??\n");
    assert_eq!(repo.staged().unwrap(), ["hello.txt"]);
}

#[test]
fn switch_is_idempotent_on_the_working_tree() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write_file(dir.path(), "one.txt", b"1");
    write_file(dir.path(), "sub/two.txt", b"2");
    repo.commit("base", "a").unwrap();
    repo.create_timeline("other").unwrap();
    write_file(dir.path(), "three.txt", b"3");
    repo.commit("more", "a").unwrap();

    repo.switch("other").unwrap();
    let first = snapshot(dir.path());
    repo.switch("other").unwrap();
    assert_eq!(snapshot(dir.path()), first);
}

#[test]
fn dirty_switch_fails_when_autoshelf_is_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut repo = Repository::init(dir.path()).unwrap();
    write_file(dir.path(), "hello.txt", b"hi\n");
    repo.commit("first", "a").unwrap();
    repo.create_timeline("feature").unwrap();

    let mut config = repo.config().clone();
    config.autoshelf = false;
    repo.set_config(config).unwrap();

    write_file(dir.path(), "hello.txt", b"edited\n");
    let err = repo.switch("feature").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    // Nothing moved: the edit survives and main stays active.
    assert_eq!(fs::read(dir.path().join("hello.txt")).unwrap(), b"edited\n");
    assert_eq!(repo.head().unwrap().0, "main");
}

#[test]
fn second_writer_conflicts_on_the_repo_lock() {
    let dir = tempfile::tempdir().unwrap();
    let _repo = Repository::init(dir.path()).unwrap();
    let err = Repository::open(dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn reopen_restores_history_and_refs() {
    let dir = tempfile::tempdir().unwrap();
    let (root, head_digest) = {
        let repo = Repository::init(dir.path()).unwrap();
        write_file(dir.path(), "kept.txt", b"kept");
        let outcome = repo.commit("keep", "a").unwrap();
        (outcome.mmr_root, outcome.leaf_hash)
    };

    let repo = Repository::open(dir.path()).unwrap();
    assert_eq!(repo.leaf_count(), 1);
    assert_eq!(repo.mmr_root(), root);
    assert_eq!(repo.head().unwrap(), ("main".to_string(), Some(0)));

    // The ref mirror carries the head digest in its first column.
    let ref_text =
        fs::read_to_string(dir.path().join(REPO_DIR).join("refs/heads/main")).unwrap();
    assert!(ref_text.starts_with(&head_digest.to_string()));

    // HEAD is the documented pointer format.
    let head_text = fs::read_to_string(dir.path().join(REPO_DIR).join("HEAD")).unwrap();
    assert_eq!(head_text, "ref: refs/heads/main\n");
}

#[test]
fn unknown_timeline_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let err = repo.switch("nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn staging_round_trips_through_stage_and_unstage() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();

    repo.stage(&["a.txt".to_string(), "b.txt".to_string()])
        .unwrap();
    repo.unstage(&["a.txt".to_string()]).unwrap();
    assert_eq!(repo.staged().unwrap(), ["b.txt"]);

    repo.unstage(&["b.txt".to_string()]).unwrap();
    assert!(repo.staged().unwrap().is_empty());
}

#[test]
fn committed_trees_answer_lookups_and_listings() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write_file(dir.path(), "src/lib.rs", b"pub fn x() {}\n");
    write_file(dir.path(), "src/main.rs", b"fn main() {}\n");
    write_file(dir.path(), "readme.txt", b"hello\n");
    let outcome = repo.commit("tree", "a").unwrap();

    let entry = repo
        .lookup_at(outcome.index, "src/lib.rs")
        .unwrap()
        .unwrap();
    assert_eq!(entry.size, 14);
    assert_eq!(entry.file.digest, Digest::of_bytes(b"pub fn x() {}\n"));
    assert!(repo.lookup_at(outcome.index, "src/lib").unwrap().is_none());

    let all: Vec<_> = repo
        .list_at(outcome.index, None)
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(all, ["readme.txt", "src/lib.rs", "src/main.rs"]);

    let src: Vec<_> = repo
        .list_at(outcome.index, Some("src/"))
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(src, ["src/lib.rs", "src/main.rs"]);
}

#[test]
fn foreign_and_name_mappings_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let digest = Digest::of_bytes(b"object");

    repo.record_foreign_mapping("sha1:abcd", &digest).unwrap();
    repo.record_name_mapping("release-1.0", &digest).unwrap();

    assert_eq!(
        repo.lookup_foreign_mapping("sha1:abcd").unwrap(),
        Some(digest)
    );
    assert_eq!(
        repo.lookup_name_mapping("release-1.0").unwrap(),
        Some(digest)
    );
    assert_eq!(repo.lookup_foreign_mapping("sha1:ffff").unwrap(), None);
}

#[test]
fn canceled_token_aborts_scans() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write_file(dir.path(), "big.txt", &vec![7u8; 64 * 1024]);

    repo.cancel_token().cancel();
    let err = repo.scan().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
}

#[test]
fn objects_are_laid_out_two_level_and_self_hashing() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write_file(dir.path(), "data.bin", b"payload bytes");
    repo.commit("data", "a").unwrap();

    let digest = Digest::of_bytes(b"payload bytes");
    let hex = digest.to_string();
    let object_path = dir
        .path()
        .join(REPO_DIR)
        .join("objects")
        .join(&hex[..2])
        .join(&hex[2..]);
    assert!(object_path.is_file());
    assert_eq!(
        Digest::of_bytes(fs::read(&object_path).unwrap()),
        digest
    );
}
