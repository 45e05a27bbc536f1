//! Request boundaries
//!
//! A [`Boundary`] tells the framing driver where one request ends: either at
//! a delimiter byte sequence (stripped from the payload) or after a fixed
//! number of bytes.

use bytes::Bytes;

use crate::buffer::IoBuffer;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Boundary {
    Delimiter(Vec<u8>),
    Fixed(usize),
}

/// Position of one complete request at the front of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unit {
    /// Payload length, delimiter excluded
    pub payload: usize,
    /// Bytes to remove from the buffer, delimiter included
    pub consumed: usize,
}

impl Boundary {
    pub fn delimiter(bytes: impl Into<Vec<u8>>) -> Self {
        Boundary::Delimiter(bytes.into())
    }

    /// `\n` terminated lines
    pub fn line() -> Self {
        Boundary::Delimiter(b"\n".to_vec())
    }

    /// `\r\n` terminated lines
    pub fn crlf() -> Self {
        Boundary::Delimiter(b"\r\n".to_vec())
    }

    /// Locate the first complete unit in `data`.
    ///
    /// An empty delimiter or a zero fixed length never matches.
    pub fn next_unit(&self, data: &[u8]) -> Option<Unit> {
        match self {
            Boundary::Delimiter(delim) => {
                if delim.is_empty() || data.len() < delim.len() {
                    return None;
                }
                let pos = find(data, delim)?;
                Some(Unit {
                    payload: pos,
                    consumed: pos + delim.len(),
                })
            }
            Boundary::Fixed(len) => {
                if *len == 0 || data.len() < *len {
                    return None;
                }
                Some(Unit {
                    payload: *len,
                    consumed: *len,
                })
            }
        }
    }

    /// Split the first complete unit off `buf`, delimiter stripped.
    pub fn take_unit(&self, buf: &mut IoBuffer) -> Option<Bytes> {
        let unit = self.next_unit(buf.as_slice())?;
        let mut bytes = buf.split_to(unit.consumed);
        bytes.truncate(unit.payload);
        Some(bytes)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let first = needle[0];
    let last_start = haystack.len() - needle.len();
    let mut i = 0;
    while i <= last_start {
        match haystack[i..=last_start].iter().position(|&b| b == first) {
            Some(off) => {
                let at = i + off;
                if &haystack[at..at + needle.len()] == needle {
                    return Some(at);
                }
                i = at + 1;
            }
            None => return None,
        }
    }
    None
}
