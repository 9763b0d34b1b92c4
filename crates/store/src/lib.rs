//! Storage layer of the tideline core: the content-addressable object store
//! (in-memory and on-disk), the sled-backed metadata store, the repository
//! writer lock, and the cooperative cancel token threaded through I/O.

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(clippy::all)]

mod cancel;
mod cas;
mod kv;
mod lock;

pub use cancel::Cancel;
pub use cas::{ContentStore, FileStore, MemoryStore};
pub use kv::{keys, MetaStore};
pub use lock::RepoLock;

use thiserror::Error;
use tideline_crypto::Digest;

/// Errors surfaced by the storage layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A put was handed bytes that do not hash to the claimed digest.
    #[error("content hashes to {actual} but {expected} was expected")]
    HashMismatch { expected: Digest, actual: Digest },

    #[error("object {0} not found")]
    NotFound(Digest),

    /// A stored object no longer hashes to its own name.
    #[error("object {digest} is corrupt: content hashes to {actual}")]
    CorruptObject { digest: Digest, actual: Digest },

    /// Persisted metadata is internally inconsistent.
    #[error("metadata store is inconsistent: {0}")]
    Corrupt(String),

    #[error("another writer holds the repository lock")]
    Conflict,

    #[error("operation canceled")]
    Canceled,

    #[error("metadata store failure: {0}")]
    Kv(#[from] sled::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
