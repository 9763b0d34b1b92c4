use thiserror::Error;

use crate::Digest;

/// Errors produced while parsing a canonical byte form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("malformed varint")]
    Varint,

    #[error("unknown tag byte {0:#04x}")]
    UnknownTag(u8),

    #[error("unsupported version {0}")]
    UnsupportedVersion(u64),

    #[error("trailing bytes after canonical value")]
    TrailingBytes,

    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    #[error("{0}")]
    Invalid(String),
}

/// Strict reader over a canonical byte form.
///
/// Mirrors [`PrefixEncodeVisitor`](crate::PrefixEncodeVisitor): varints are
/// LEB128, length-delimited fields are varint length plus raw bytes. Parsers
/// call [`Decoder::finish`] to reject trailing bytes.
pub struct Decoder<'a> {
    input: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    pub fn unsigned(&mut self) -> Result<u64, DecodeError> {
        leb128::read::unsigned(&mut self.input).map_err(map_leb)
    }

    pub fn signed(&mut self) -> Result<i64, DecodeError> {
        leb128::read::signed(&mut self.input).map_err(map_leb)
    }

    pub fn byte(&mut self) -> Result<u8, DecodeError> {
        let (&first, rest) = self.input.split_first().ok_or(DecodeError::UnexpectedEof)?;
        self.input = rest;
        Ok(first)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.input.len() < n {
            return Err(DecodeError::UnexpectedEof);
        }
        let (taken, rest) = self.input.split_at(n);
        self.input = rest;
        Ok(taken)
    }

    /// Varint length followed by that many raw bytes.
    pub fn len_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.unsigned()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::UnexpectedEof)?;
        self.bytes(len)
    }

    pub fn str(&mut self) -> Result<&'a str, DecodeError> {
        std::str::from_utf8(self.len_bytes()?).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn digest(&mut self) -> Result<Digest, DecodeError> {
        let bytes = self.bytes(Digest::LEN)?;
        Digest::try_from_slice(bytes).map_err(|e| DecodeError::Invalid(e.to_string()))
    }

    pub fn finish(self) -> Result<(), DecodeError> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes)
        }
    }
}

fn map_leb(err: leb128::read::Error) -> DecodeError {
    match err {
        leb128::read::Error::IoError(_) => DecodeError::UnexpectedEof,
        leb128::read::Error::Overflow => DecodeError::Varint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ByteVisitor, PrefixEncodeVisitor};

    #[derive(Default)]
    struct Collector(Vec<u8>);

    impl ByteVisitor for Collector {
        fn visit_bytes(&mut self, bytes: impl AsRef<[u8]>) {
            self.0.extend_from_slice(bytes.as_ref());
        }
    }

    #[test]
    fn round_trips_the_encoder() {
        let mut out = Collector::default();
        {
            let mut pe = PrefixEncodeVisitor::new(&mut out);
            pe.visit_unsigned(300);
            pe.visit_signed(-42);
            pe.visit_str("path/to/file");
        }

        let mut dec = Decoder::new(&out.0);
        assert_eq!(dec.unsigned().unwrap(), 300);
        assert_eq!(dec.signed().unwrap(), -42);
        assert_eq!(dec.str().unwrap(), "path/to/file");
        dec.finish().unwrap();
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut dec = Decoder::new(&[0x00, 0xaa]);
        dec.unsigned().unwrap();
        assert_eq!(dec.finish(), Err(DecodeError::TrailingBytes));
    }

    #[test]
    fn truncated_input_is_eof() {
        let mut dec = Decoder::new(&[0x05, b'a']);
        assert_eq!(dec.len_bytes(), Err(DecodeError::UnexpectedEof));
    }
}
