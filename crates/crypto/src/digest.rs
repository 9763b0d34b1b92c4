use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::{ByteVisitor, VisitBytes};

/// The 32-byte content digest used for every object, node, and leaf in the
/// repository. Displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; 32]);

struct HashingVisitor(Sha256);

impl ByteVisitor for HashingVisitor {
    fn visit_bytes(&mut self, bytes: impl AsRef<[u8]>) {
        self.0.update(bytes);
    }
}

impl Digest {
    /// The all-zero digest. Used as the root of an empty accumulator and as
    /// the head marker of a timeline with no commits.
    pub const ZERO: Digest = Digest([0u8; 32]);

    /// Number of raw bytes in a digest.
    pub const LEN: usize = 32;

    /// Hash a value through its canonical byte stream.
    pub fn of(content: impl VisitBytes) -> Self {
        let mut visitor = HashingVisitor(Sha256::new());
        content.visit(&mut visitor);
        Digest(visitor.0.finalize().into())
    }

    /// Hash a raw byte string. This is the object-hash domain: the digest of
    /// a stored object is the plain hash of its content bytes.
    pub fn of_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Digest(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }

    /// Split the hex form into the two-level object path components:
    /// the first two characters and the remaining sixty-two.
    pub fn to_path_pair(&self) -> (String, String) {
        let hex = self.to_string();
        (hex[..2].to_string(), hex[2..].to_string())
    }

    pub fn try_from_slice(slice: &[u8]) -> Result<Self, DigestParseError> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| DigestParseError::IncorrectLength(slice.len()))?;
        Ok(Digest(bytes))
    }
}

impl VisitBytes for Digest {
    fn visit<BV: ?Sized + ByteVisitor>(&self, visitor: &mut BV) {
        visitor.visit_bytes(self.0.as_slice())
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DigestParseError {
    #[error("expected 32 digest bytes, got {0}")]
    IncorrectLength(usize),

    #[error("digest contained uppercase hex")]
    UppercaseHex,

    #[error("hexadecimal decode failed: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(DigestParseError::UppercaseHex);
        }
        let bytes = hex::decode(s)?;
        Digest::try_from_slice(&bytes)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(D::Error::custom)
    }
}

/// Domain tag prefixed to accumulator leaf nodes.
const LEAF_NODE_DOMAIN: u8 = 0x00;

/// Domain tag prefixed to accumulator branch nodes.
const BRANCH_NODE_DOMAIN: u8 = 0x01;

/// Accumulator leaf-node domain: `H(0x00 ‖ leaf-hash)`.
pub fn hash_leaf(leaf: impl VisitBytes) -> Digest {
    let mut visitor = HashingVisitor(Sha256::new());
    visitor.visit_bytes([LEAF_NODE_DOMAIN]);
    leaf.visit(&mut visitor);
    Digest(visitor.0.finalize().into())
}

/// Accumulator branch-node domain: `H(0x01 ‖ left ‖ right)`.
pub fn hash_branch(left: impl VisitBytes, right: impl VisitBytes) -> Digest {
    let mut visitor = HashingVisitor(Sha256::new());
    visitor.visit_bytes([BRANCH_NODE_DOMAIN]);
    left.visit(&mut visitor);
    right.visit(&mut visitor);
    Digest(visitor.0.finalize().into())
}
