use tideline_crypto::{ByteVisitor, DecodeError, Decoder, Digest, PrefixEncodeVisitor};

/// Whether a file-tree object is a raw byte region or an inner node of
/// child references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Leaf,
    Inner,
}

impl ChunkKind {
    pub fn as_byte(self) -> u8 {
        match self {
            ChunkKind::Leaf => 0x00,
            ChunkKind::Inner => 0x01,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0x00 => Ok(ChunkKind::Leaf),
            0x01 => Ok(ChunkKind::Inner),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

/// Reference to the root of a stored file tree.
///
/// `size` is the total byte length of the file; for a single-region file the
/// digest is the plain content hash of the file bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub digest: Digest,
    pub kind: ChunkKind,
    pub size: u64,
}

impl FileRef {
    pub(crate) fn encode_into<BV: ?Sized + ByteVisitor>(&self, pe: &mut PrefixEncodeVisitor<'_, BV>) {
        pe.visit_raw([self.kind.as_byte()]);
        pe.visit_raw(self.digest);
        pe.visit_unsigned(self.size);
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let kind = ChunkKind::from_byte(dec.byte()?)?;
        let digest = dec.digest()?;
        let size = dec.unsigned()?;
        Ok(FileRef { digest, kind, size })
    }
}

/// One `path → file` record in the directory index.
///
/// `checksum` duplicates the file-reference digest as a cheap equality
/// channel for scan fast paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: String,
    pub file: FileRef,
    pub mtime_ns: u64,
    pub mode: u32,
    pub size: u64,
    pub checksum: Digest,
}

impl DirEntry {
    /// Builds an entry whose checksum mirrors the file reference.
    pub fn new(path: impl Into<String>, file: FileRef, mtime_ns: u64, mode: u32) -> Self {
        DirEntry {
            path: path.into(),
            size: file.size,
            checksum: file.digest,
            file,
            mtime_ns,
            mode,
        }
    }

    pub(crate) fn encode_into<BV: ?Sized + ByteVisitor>(&self, pe: &mut PrefixEncodeVisitor<'_, BV>) {
        pe.visit_str(&self.path);
        self.file.encode_into(pe);
        pe.visit_unsigned(self.mtime_ns);
        pe.visit_unsigned(u64::from(self.mode));
        pe.visit_unsigned(self.size);
        pe.visit_raw(self.checksum);
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let path = dec.str()?.to_string();
        let file = FileRef::decode_from(dec)?;
        let mtime_ns = dec.unsigned()?;
        let mode = u32::try_from(dec.unsigned()?)
            .map_err(|_| DecodeError::Invalid("mode out of range".to_string()))?;
        let size = dec.unsigned()?;
        let checksum = dec.digest()?;
        Ok(DirEntry {
            path,
            file,
            mtime_ns,
            mode,
            size,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_byte_round_trip() {
        for kind in [ChunkKind::Leaf, ChunkKind::Inner] {
            assert_eq!(ChunkKind::from_byte(kind.as_byte()).unwrap(), kind);
        }
        assert!(ChunkKind::from_byte(0x02).is_err());
    }
}
