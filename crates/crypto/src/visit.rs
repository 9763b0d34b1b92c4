/// Receiver side of the byte-feed used for hashing and canonical encoding.
///
/// Implementations are sinks: the hasher updates its digest state, the
/// encoder appends to its output buffer. Chunk boundaries carry no meaning,
/// only the concatenated byte stream does.
pub trait ByteVisitor {
    fn visit_bytes(&mut self, bytes: impl AsRef<[u8]>);
}

/// Types that stream their canonical bytes into a [`ByteVisitor`].
///
/// The repository's canonical forms (directory-index nodes, commit leaves,
/// proofs) implement this by writing their fields in order through a
/// [`PrefixEncodeVisitor`](crate::PrefixEncodeVisitor), so a value's digest
/// and its encoded bytes are produced by the same code path and can never
/// disagree.
pub trait VisitBytes {
    fn visit<BV: ?Sized + ByteVisitor>(&self, visitor: &mut BV);
}

impl<'a, VB: ?Sized + VisitBytes> VisitBytes for &'a VB {
    fn visit<BV: ?Sized + ByteVisitor>(&self, visitor: &mut BV) {
        (self as &VB).visit(visitor)
    }
}

impl<'a> VisitBytes for &'a [u8] {
    fn visit<BV: ?Sized + ByteVisitor>(&self, visitor: &mut BV) {
        visitor.visit_bytes(self);
    }
}
