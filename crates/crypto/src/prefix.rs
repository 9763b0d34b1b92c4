use crate::ByteVisitor;

/// Canonical-encoding writer layered over a [`ByteVisitor`].
///
/// All integers are LEB128 varints; length-delimited fields are written as a
/// varint length followed by the raw bytes. The commit codec and the
/// directory-index codec both emit through this type, which keeps their
/// on-disk bytes and their digests in lockstep.
pub struct PrefixEncodeVisitor<'a, BV>
where
    BV: ?Sized + ByteVisitor,
{
    buffer: [u8; 10],
    inner: &'a mut BV,
}

impl<'a, BV> PrefixEncodeVisitor<'a, BV>
where
    BV: ?Sized + ByteVisitor,
{
    pub fn new(inner: &'a mut BV) -> Self {
        Self {
            buffer: [0u8; 10],
            inner,
        }
    }

    pub fn visit_unsigned(&mut self, i: u64) {
        let len = leb128::write::unsigned(&mut self.buffer.as_mut_slice(), i).unwrap();
        self.inner.visit_bytes(&self.buffer[..len]);
    }

    pub fn visit_signed(&mut self, i: i64) {
        let len = leb128::write::signed(&mut self.buffer.as_mut_slice(), i).unwrap();
        self.inner.visit_bytes(&self.buffer[..len]);
    }

    pub fn visit_raw(&mut self, bytes: impl AsRef<[u8]>) {
        self.inner.visit_bytes(bytes);
    }

    pub fn visit_len_bytes(&mut self, bytes: impl AsRef<[u8]>) {
        let bytes = bytes.as_ref();
        self.visit_unsigned(bytes.len() as u64);
        self.inner.visit_bytes(bytes);
    }

    pub fn visit_str(&mut self, s: &str) {
        self.visit_len_bytes(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collector(Vec<u8>);

    impl ByteVisitor for Collector {
        fn visit_bytes(&mut self, bytes: impl AsRef<[u8]>) {
            self.0.extend_from_slice(bytes.as_ref());
        }
    }

    #[test]
    fn unsigned_varints_match_leb128() {
        let mut out = Collector::default();
        let mut pe = PrefixEncodeVisitor::new(&mut out);
        pe.visit_unsigned(0);
        pe.visit_unsigned(127);
        pe.visit_unsigned(128);
        assert_eq!(out.0, [0x00, 0x7f, 0x80, 0x01]);
    }

    #[test]
    fn sentinel_index_is_ten_bytes() {
        let mut out = Collector::default();
        PrefixEncodeVisitor::new(&mut out).visit_unsigned(u64::MAX);
        assert_eq!(out.0.len(), 10);
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut out = Collector::default();
        PrefixEncodeVisitor::new(&mut out).visit_str("hi");
        assert_eq!(out.0, [0x02, b'h', b'i']);
    }

    #[test]
    fn signed_encodes_negative_values() {
        let mut out = Collector::default();
        PrefixEncodeVisitor::new(&mut out).visit_signed(-1);
        let mut slice = out.0.as_slice();
        assert_eq!(leb128::read::signed(&mut slice).unwrap(), -1);
        assert!(slice.is_empty());
    }
}
