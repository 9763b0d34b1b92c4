//! File chunking and the directory index.
//!
//! The chunker turns file bytes into one or more content-addressed objects
//! and hands back a [`FileRef`] naming the root. The directory index is a
//! sorted Merkle tree of `path → entry` built over those references; its
//! root digest is a pure function of the entries, so identical workspace
//! contents always produce identical roots.

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

mod build;
mod chunk;
mod diff;
mod entry;
mod node;
mod read;

pub use build::IndexBuilder;
pub use chunk::{read_file_bytes, store_file_bytes, CHUNK_FANOUT, REGION_SIZE};
pub use diff::{diff, IndexDiff};
pub use entry::{ChunkKind, DirEntry, FileRef};
pub use node::{IndexNode, FANOUT, INNER_TAG, LEAF_TAG};
pub use read::{list_all, list_prefix, list_range, lookup, RangeIter};

use thiserror::Error;
use tideline_crypto::DecodeError;
use tideline_store::StoreError;

/// Errors surfaced by the chunking and index layer.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("invalid encoding: {0}")]
    InvalidEncoding(#[from] DecodeError),

    #[error("duplicate path `{0}` in index input")]
    DuplicatePath(String),

    #[error("file tree reassembled to {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
