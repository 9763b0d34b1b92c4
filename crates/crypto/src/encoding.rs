use crate::{ByteVisitor, VisitBytes};

/// Produce the canonical byte form of a value.
pub trait Encode {
    fn encode(&self) -> Vec<u8>;
}

#[derive(Default)]
struct EncodingVisitor {
    bytes: Vec<u8>,
}

impl ByteVisitor for EncodingVisitor {
    fn visit_bytes(&mut self, bytes: impl AsRef<[u8]>) {
        self.bytes.extend(bytes.as_ref())
    }
}

impl<T> Encode for T
where
    T: VisitBytes,
{
    fn encode(&self) -> Vec<u8> {
        let mut visitor = EncodingVisitor::default();
        self.visit(&mut visitor);
        visitor.bytes
    }
}
