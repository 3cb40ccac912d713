//! Byte strings with tagged ownership.
//!
//! A [`ByteString`] is the engine's variable-length byte blob. It exists in
//! three modes: owned (a private, growable buffer), shared (an atomically
//! reference-counted slice, typically aliasing decoder input), and static
//! (process-lifetime storage). Mutation is only permitted on owned buffers;
//! [`ByteString::append`] promotes the other two modes by copying first.

use std::fmt;
use std::mem;
use std::ops::Deref;

use bytes::Bytes;

use crate::error::{Error, ErrorCode, Result};

#[derive(Clone)]
enum Repr {
    Owned(Vec<u8>),
    Shared(Bytes),
    Static(&'static [u8]),
}

pub struct ByteString {
    repr: Repr,
}

impl ByteString {
    /// An empty owned string.
    pub const fn new() -> ByteString {
        ByteString {
            repr: Repr::Owned(Vec::new()),
        }
    }

    /// An empty owned string with `capacity` bytes reserved.
    pub fn with_capacity(capacity: usize) -> Result<ByteString> {
        let mut buf = Vec::new();
        buf.try_reserve(capacity).map_err(out_of_memory)?;
        Ok(ByteString {
            repr: Repr::Owned(buf),
        })
    }

    /// A string backed by process-lifetime storage. No copy is made.
    pub const fn from_static(bytes: &'static [u8]) -> ByteString {
        ByteString {
            repr: Repr::Static(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.repr {
            Repr::Owned(buf) => buf,
            Repr::Shared(bytes) => bytes,
            Repr::Static(bytes) => bytes,
        }
    }

    /// Whether this string borrows storage it does not own (shared or
    /// static mode).
    pub fn is_aliased(&self) -> bool {
        !matches!(self.repr, Repr::Owned(_))
    }

    /// Hands out another handle onto this string's bytes.
    ///
    /// An owned buffer is frozen into shared mode first; thereafter the
    /// storage is released when the last handle drops.
    pub fn share(&mut self) -> ByteString {
        let shared = match mem::replace(&mut self.repr, Repr::Owned(Vec::new())) {
            Repr::Owned(buf) => Bytes::from(buf),
            Repr::Shared(bytes) => bytes,
            Repr::Static(bytes) => Bytes::from_static(bytes),
        };
        self.repr = Repr::Shared(shared.clone());
        ByteString {
            repr: Repr::Shared(shared),
        }
    }

    /// A handle onto the `start..end` subrange, without copying.
    pub fn share_slice(&mut self, start: usize, end: usize) -> ByteString {
        let shared = self.share();
        match shared.repr {
            Repr::Shared(bytes) => ByteString {
                repr: Repr::Shared(bytes.slice(start..end)),
            },
            _ => unreachable!("share always yields shared mode"),
        }
    }

    /// Resets the string to an empty owned buffer.
    ///
    /// This is the caller's promise that no other holder needs the current
    /// contents. Capacity is retained when the storage is not actually
    /// shared with another live handle.
    pub fn recycle(&mut self) {
        match &mut self.repr {
            Repr::Owned(buf) => buf.clear(),
            Repr::Shared(bytes) => {
                let taken = mem::take(bytes);
                self.repr = match taken.try_into_mut() {
                    Ok(unique) => {
                        let mut buf: Vec<u8> = unique.into();
                        buf.clear();
                        Repr::Owned(buf)
                    }
                    Err(_) => Repr::Owned(Vec::new()),
                };
            }
            Repr::Static(_) => self.repr = Repr::Owned(Vec::new()),
        }
    }

    /// Appends `bytes`, promoting a shared or static string to owned mode
    /// by copying its current contents first.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let buf = self.make_owned(bytes.len())?;
        buf.extend_from_slice(bytes);
        Ok(())
    }

    fn make_owned(&mut self, additional: usize) -> Result<&mut Vec<u8>> {
        if let Repr::Owned(buf) = &mut self.repr {
            buf.try_reserve(additional).map_err(out_of_memory)?;
        } else {
            let current = self.as_bytes();
            let mut buf = Vec::new();
            buf.try_reserve(current.len() + additional)
                .map_err(out_of_memory)?;
            buf.extend_from_slice(current);
            self.repr = Repr::Owned(buf);
        }
        match &mut self.repr {
            Repr::Owned(buf) => Ok(buf),
            _ => unreachable!("make_owned always leaves owned mode"),
        }
    }
}

#[cold]
fn out_of_memory(_: std::collections::TryReserveError) -> Error {
    Error::new(ErrorCode::OutOfMemory, "buffer reservation failed")
}

impl Default for ByteString {
    fn default() -> ByteString {
        ByteString::new()
    }
}

impl Clone for ByteString {
    fn clone(&self) -> ByteString {
        ByteString {
            repr: self.repr.clone(),
        }
    }
}

impl Deref for ByteString {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<Bytes> for ByteString {
    fn from(bytes: Bytes) -> ByteString {
        ByteString {
            repr: Repr::Shared(bytes),
        }
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(buf: Vec<u8>) -> ByteString {
        ByteString {
            repr: Repr::Owned(buf),
        }
    }
}

impl From<&str> for ByteString {
    fn from(s: &str) -> ByteString {
        ByteString {
            repr: Repr::Owned(s.as_bytes().to_vec()),
        }
    }
}

impl PartialEq for ByteString {
    fn eq(&self, other: &ByteString) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ByteString {}

impl PartialEq<[u8]> for ByteString {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<&[u8]> for ByteString {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == *other
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"")?;
        for &byte in self.as_bytes() {
            for escaped in std::ascii::escape_default(byte) {
                write!(f, "{}", escaped as char)?;
            }
        }
        write!(f, "\"")
    }
}
