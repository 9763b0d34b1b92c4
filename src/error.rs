use thiserror::Error;
use tideline_history::HistoryError;
use tideline_index::IndexError;
use tideline_store::StoreError;
use tideline_workspace::WorkspaceError;

/// Unified error surface of the core library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], stable across the concrete error
/// chains underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bytes did not hash to the digest they were stored under.
    HashMismatch,
    /// An object, leaf, or timeline was absent.
    NotFound,
    /// A canonical parser rejected its input.
    InvalidEncoding,
    /// Another writer holds the repository.
    Conflict,
    /// Persisted state is internally inconsistent.
    Corrupt,
    /// A lowest-common-ancestor query found disjoint histories.
    NoCommonAncestor,
    /// Underlying filesystem or metadata-store failure.
    Io,
    /// Cooperative cancellation fired.
    Canceled,
    /// The operation's preconditions were not met.
    PreconditionFailed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Error::Store(e) => store_kind(e),
            Error::Index(e) => index_kind(e),
            Error::History(e) => history_kind(e),
            Error::Workspace(e) => workspace_kind(e),
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

fn store_kind(error: &StoreError) -> ErrorKind {
    match error {
        StoreError::HashMismatch { .. } => ErrorKind::HashMismatch,
        StoreError::NotFound(_) => ErrorKind::NotFound,
        StoreError::CorruptObject { .. } | StoreError::Corrupt(_) => ErrorKind::Corrupt,
        StoreError::Conflict => ErrorKind::Conflict,
        StoreError::Canceled => ErrorKind::Canceled,
        StoreError::Kv(_) | StoreError::Io(_) => ErrorKind::Io,
    }
}

fn index_kind(error: &IndexError) -> ErrorKind {
    match error {
        IndexError::InvalidEncoding(_) | IndexError::DuplicatePath(_) => {
            ErrorKind::InvalidEncoding
        }
        IndexError::SizeMismatch { .. } => ErrorKind::Corrupt,
        IndexError::Store(e) => store_kind(e),
    }
}

fn history_kind(error: &HistoryError) -> ErrorKind {
    match error {
        HistoryError::InvalidEncoding(_) => ErrorKind::InvalidEncoding,
        HistoryError::LeafOutOfRange(_) | HistoryError::TimelineNotFound(_) => {
            ErrorKind::NotFound
        }
        HistoryError::TimelineExists(_) => ErrorKind::PreconditionFailed,
        HistoryError::NoCommonAncestor(_, _) => ErrorKind::NoCommonAncestor,
        HistoryError::Corrupt(_) => ErrorKind::Corrupt,
        HistoryError::Store(e) => store_kind(e),
        HistoryError::Io(_) => ErrorKind::Io,
    }
}

fn workspace_kind(error: &WorkspaceError) -> ErrorKind {
    match error {
        WorkspaceError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
        WorkspaceError::Indeterminate { source, .. } => workspace_kind(source),
        WorkspaceError::MalformedShelf(_) => ErrorKind::Corrupt,
        WorkspaceError::Index(e) => index_kind(e),
        WorkspaceError::History(e) => history_kind(e),
        WorkspaceError::Store(e) => store_kind(e),
        WorkspaceError::Io(_) => ErrorKind::Io,
    }
}
