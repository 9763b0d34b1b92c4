//! Workspace side of the tideline core: scanning a working directory into a
//! directory index, materializing an index back onto the filesystem, the
//! auto-shelf mechanism, the staging list, and the switch orchestration that
//! ties them together.
//!
//! The scanner and materializer are the only components that touch the
//! filesystem outside the object store root and the metadata store.

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(clippy::all)]

mod materialize;
mod scan;
mod shelf;
mod stage;
mod switch;

pub use materialize::{materialize, ApplyReport};
pub use scan::{scan_workspace, ScanOptions, DEFAULT_POOL_SIZE};
pub use shelf::{Shelf, ShelfStore};
pub use stage::StageList;
pub use switch::{switch, SwitchContext, SwitchOutcome, SwitchPhase};

use thiserror::Error;
use tideline_history::HistoryError;
use tideline_index::IndexError;
use tideline_store::StoreError;

/// Errors surfaced by the workspace layer.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A failed apply could not be fully unwound; the named paths were left
    /// in an unknown state.
    #[error("workspace left in indeterminate state at: {}", .paths.join(", "))]
    Indeterminate {
        paths: Vec<String>,
        #[source]
        source: Box<WorkspaceError>,
    },

    #[error("shelf record is malformed: {0}")]
    MalformedShelf(#[from] serde_json::Error),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
