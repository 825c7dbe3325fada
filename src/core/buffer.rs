//! Cursor-based byte accumulator shared by the read and write sides of a
//! connection.
//!
//! The logical contents are the bytes after the read cursor; reads advance
//! the cursor, writes append. The consumed prefix is reclaimed when the
//! backing storage needs room for an append.

use bytes::{Buf, Bytes, BytesMut};

const DEFAULT_CAPACITY: usize = 1024;

/// Byte buffer with a read cursor.
///
/// Not internally synchronized; each owner accesses it from its loop thread
/// only.
#[derive(Debug, Default)]
pub struct Buffer {
    data: BytesMut,
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(DEFAULT_CAPACITY),
        }
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Unread bytes as a contiguous slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Take all unread bytes, leaving the buffer empty.
    pub fn read_all(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Take up to `n` unread bytes.
    pub fn read(&mut self, n: usize) -> Bytes {
        let n = n.min(self.data.len());
        self.data.split_to(n).freeze()
    }

    /// Advance the read cursor by up to `n` bytes without copying them out.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.advance(n);
    }

    /// Append bytes after the current contents.
    pub fn write(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_all() {
        let mut buf = Buffer::new();
        assert!(buf.is_empty());

        buf.write(b"hello ");
        buf.write(b"world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.as_slice(), b"hello world");

        let all = buf.read_all();
        assert_eq!(&all[..], b"hello world");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_read_advances_cursor() {
        let mut buf = Buffer::new();
        buf.write(b"abcdef");

        let head = buf.read(2);
        assert_eq!(&head[..], b"ab");
        assert_eq!(buf.as_slice(), b"cdef");

        // Reading past the end is clamped.
        let rest = buf.read(100);
        assert_eq!(&rest[..], b"cdef");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_consume() {
        let mut buf = Buffer::new();
        buf.write(b"0123456789");

        buf.consume(4);
        assert_eq!(buf.as_slice(), b"456789");

        buf.consume(100);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_interleaved_read_write() {
        let mut buf = Buffer::new();
        buf.write(b"first");
        assert_eq!(&buf.read(5)[..], b"first");

        buf.write(b"second");
        buf.write(b" third");
        assert_eq!(&buf.read_all()[..], b"second third");
    }

    #[test]
    fn test_large_append_reclaims_consumed_prefix() {
        let mut buf = Buffer::new();
        buf.write(&[b'a'; 1000]);
        buf.consume(1000);

        // The consumed kilobyte must not count against the new contents.
        buf.write(&[b'b'; 2048]);
        assert_eq!(buf.len(), 2048);
        assert!(buf.as_slice().iter().all(|&b| b == b'b'));
    }
}
