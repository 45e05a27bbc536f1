//! Bounded connection buffers
//!
//! [`IoBuffer`] wraps a [`BytesMut`] with a hard capacity limit. Consuming
//! bytes advances the read cursor instead of shifting the remaining data.

use std::io;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Growable byte buffer with a capacity limit.
#[derive(Debug)]
pub struct IoBuffer {
    data: BytesMut,
    limit: usize,
}

impl IoBuffer {
    pub fn new(limit: usize) -> Self {
        IoBuffer {
            data: BytesMut::with_capacity(limit),
            limit,
        }
    }

    /// Bytes currently held
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Capacity limit
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Room left before the limit
    #[inline]
    pub fn spare(&self) -> usize {
        self.limit.saturating_sub(self.data.len())
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.spare() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Append `bytes`, failing without a partial copy when they do not fit.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.spare() {
            return Err(Error::BufferOverflow {
                needed: bytes.len(),
                available: self.spare(),
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Drop `n` leading bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.advance(n);
    }

    /// Split off the first `n` bytes.
    pub fn split_to(&mut self, n: usize) -> Bytes {
        let n = n.min(self.data.len());
        self.data.split_to(n).freeze()
    }

    /// Raise the limit. Never shrinks; returns whether the limit changed.
    pub fn grow(&mut self, limit: usize) -> bool {
        if limit <= self.limit {
            return false;
        }
        self.data.reserve(limit - self.data.len());
        self.limit = limit;
        true
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Let `read` fill up to `max` bytes of spare room in place.
    ///
    /// Returns what `read` returned; on error nothing is appended. A full
    /// buffer yields `Ok(0)` without calling `read`.
    pub fn fill_from<F>(&mut self, max: usize, read: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let want = self.spare().min(max);
        if want == 0 {
            return Ok(0);
        }
        let start = self.data.len();
        self.data.resize(start + want, 0);
        match read(&mut self.data[start..]) {
            Ok(n) => {
                self.data.truncate(start + n.min(want));
                Ok(n)
            }
            Err(e) => {
                self.data.truncate(start);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_limit() {
        let mut buf = IoBuffer::new(8);
        buf.append(b"abc").unwrap();
        buf.append(b"defgh").unwrap();
        assert!(buf.is_full());
        assert_eq!(buf.as_slice(), b"abcdefgh");
    }

    #[test]
    fn test_append_overflow_is_atomic() {
        let mut buf = IoBuffer::new(4);
        buf.append(b"ab").unwrap();
        let err = buf.append(b"cde").unwrap_err();
        assert!(matches!(
            err,
            Error::BufferOverflow {
                needed: 3,
                available: 2
            }
        ));
        assert_eq!(buf.as_slice(), b"ab");
    }

    #[test]
    fn test_consume_and_split() {
        let mut buf = IoBuffer::new(16);
        buf.append(b"hello world").unwrap();
        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");
        let head = buf.split_to(3);
        assert_eq!(&head[..], b"wor");
        assert_eq!(buf.as_slice(), b"ld");
        assert_eq!(buf.spare(), 14);
        buf.consume(100);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_grow_only() {
        let mut buf = IoBuffer::new(4);
        assert!(!buf.grow(2));
        assert_eq!(buf.limit(), 4);
        assert!(buf.grow(64));
        buf.append(&[0u8; 64]).unwrap();
        assert!(buf.is_full());
    }

    #[test]
    fn test_fill_from() {
        let mut buf = IoBuffer::new(6);
        buf.append(b"ab").unwrap();
        let n = buf
            .fill_from(usize::MAX, |room| {
                assert_eq!(room.len(), 4);
                room[..2].copy_from_slice(b"cd");
                Ok(2)
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf.as_slice(), b"abcd");

        let err = buf
            .fill_from(usize::MAX, |_| Err(io::Error::from(io::ErrorKind::WouldBlock)))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(buf.as_slice(), b"abcd");
    }

    #[test]
    fn test_fill_from_full_buffer() {
        let mut buf = IoBuffer::new(2);
        buf.append(b"xy").unwrap();
        let n = buf.fill_from(16, |_| panic!("reader must not run")).unwrap();
        assert_eq!(n, 0);
    }
}
