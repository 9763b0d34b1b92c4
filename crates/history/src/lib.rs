//! Commit history for the tideline core.
//!
//! A commit is a [`CommitLeaf`]: a canonical record naming a directory-index
//! root plus lineage metadata. Leaves are appended to a Merkle Mountain
//! Range ([`Mmr`]) that yields compact roots and O(log n) inclusion proofs.
//! Timelines are named heads over leaf indices; the registry resolves them,
//! mirrors them as ref files, and answers lowest-common-ancestor queries via
//! per-timeline binary lifting.

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

mod lca;
mod leaf;
mod mmr;
mod timeline;

pub use lca::SkipTable;
pub use leaf::{CommitLeaf, AUTOSHELVED_KEY, LEAF_VERSION, NO_PARENT};
pub use mmr::{pos, AppendOutcome, Mmr, Proof};
pub use timeline::{
    head_ref_path, PartialLeaf, TimelineKind, TimelineRecord, TimelineRegistry, HEAD_FILE,
};

use thiserror::Error;
use tideline_crypto::DecodeError;
use tideline_store::StoreError;

/// Errors surfaced by the history layer.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("invalid encoding: {0}")]
    InvalidEncoding(#[from] DecodeError),

    #[error("leaf index {0} out of range")]
    LeafOutOfRange(u64),

    #[error("timeline `{0}` not found")]
    TimelineNotFound(String),

    #[error("timeline `{0}` already exists")]
    TimelineExists(String),

    #[error("no common ancestor between leaves {0} and {1}")]
    NoCommonAncestor(u64, u64),

    #[error("accumulator state is inconsistent: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
