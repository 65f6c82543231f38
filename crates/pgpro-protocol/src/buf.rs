//! Bounds-checked readers and length-prefixed writers.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;

/// Cursor over a message body. Every read checks the remaining length.
pub(crate) struct Reader<'a> {
    tag: u8,
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(tag: u8, buf: &'a [u8]) -> Self {
        Self { tag, buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() < n {
            return Err(ProtocolError::malformed(
                self.tag,
                format!("needed {n} bytes, {} left", self.buf.len()),
            ));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn i16(&mut self) -> Result<i16, ProtocolError> {
        let b = self.bytes(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ProtocolError> {
        let b = self.bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Null-terminated UTF-8 string.
    pub(crate) fn cstr(&mut self) -> Result<String, ProtocolError> {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ProtocolError::malformed(self.tag, "missing null terminator"))?;
        let s = std::str::from_utf8(&self.buf[..end])
            .map_err(|e| ProtocolError::malformed(self.tag, e.to_string()))?
            .to_string();
        self.buf = &self.buf[end + 1..];
        Ok(s)
    }
}

/// Write a tag and a length placeholder; returns the placeholder offset.
pub(crate) fn begin(dst: &mut BytesMut, tag: u8) -> usize {
    dst.put_u8(tag);
    let len_pos = dst.len();
    dst.put_i32(0);
    len_pos
}

/// Patch the length placeholder written by [`begin`].
pub(crate) fn finish(dst: &mut BytesMut, len_pos: usize) {
    let len = (dst.len() - len_pos) as i32;
    dst[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}

pub(crate) fn put_cstr(dst: &mut BytesMut, s: &str) {
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_bounds() {
        let mut r = Reader::new(b'X', &[0, 1, 0]);
        assert_eq!(r.i16().unwrap(), 1);
        assert!(r.i32().is_err());
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn test_cstr_requires_terminator() {
        let mut r = Reader::new(b'Q', b"abc");
        assert!(r.cstr().is_err());

        let mut r = Reader::new(b'Q', b"abc\0def\0");
        assert_eq!(r.cstr().unwrap(), "abc");
        assert_eq!(r.cstr().unwrap(), "def");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_length_patch() {
        let mut dst = BytesMut::new();
        let pos = begin(&mut dst, b'C');
        put_cstr(&mut dst, "SELECT 1");
        finish(&mut dst, pos);
        assert_eq!(&dst[..], b"C\0\0\0\x0dSELECT 1\0");
    }
}
