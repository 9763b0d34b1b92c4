//! Hashing and canonical byte-encoding primitives shared by every layer of
//! the tideline core.
//!
//! All content addressing in the repository reduces to one 32-byte SHA-256
//! [`Digest`]. Structures that need a digest implement [`VisitBytes`] and are
//! fed incrementally into the hasher; the same visitor drives the canonical
//! encoders, so hashing a value and serializing it can never disagree about
//! its bytes.

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

mod decode;
mod digest;
mod encoding;
mod prefix;
mod visit;

pub use decode::{DecodeError, Decoder};
pub use digest::{hash_branch, hash_leaf, Digest, DigestParseError};
pub use encoding::Encode;
pub use prefix::PrefixEncodeVisitor;
pub use visit::{ByteVisitor, VisitBytes};
