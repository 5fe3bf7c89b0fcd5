use bytes::{Buf, BufMut};

use crate::error::DecodeError;

pub const MAGIC: u16 = 0x2137;

pub const VERSION_LEGACY_V1: u16 = 0x0001;
pub const VERSION_V3: u16 = 0x0003;
pub const VERSION_INTERNAL: u16 = 0xFF01;
pub const VERSION_UPSTREAM_V4: u16 = 0x0004;
pub const VERSION_UPSTREAM_V5: u16 = 0x0005;

pub const NODE_ENCODING_V1: u16 = 0x0001;

/// Checked, short-read-safe reads over an in-memory checkpoint buffer.
///
/// `bytes::Buf`'s `get_*` methods panic on underflow; every call here is
/// guarded by a `remaining()` check first so malformed input surfaces as
/// [`DecodeError::ShortRead`] instead of aborting the process.
pub struct Reader<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, consumed: 0 }
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    fn require(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            Err(DecodeError::ShortRead(self.consumed))
        } else {
            Ok(())
        }
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        self.require(2)?;
        self.consumed += 2;
        Ok(self.buf.get_u16())
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        self.require(4)?;
        self.consumed += 4;
        Ok(self.buf.get_u32())
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        self.require(8)?;
        self.consumed += 8;
        Ok(self.buf.get_u64())
    }

    pub fn bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        self.require(len)?;
        let mut out = vec![0u8; len];
        self.buf.copy_to_slice(&mut out);
        self.consumed += len;
        Ok(out)
    }

    /// A length-prefixed (`u16` length) byte string.
    pub fn short_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.u16()? as usize;
        self.bytes(len)
    }

    /// A length-prefixed (`u32` length) byte string, used for payloads.
    pub fn long_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

pub fn put_short_bytes(out: &mut impl BufMut, bytes: &[u8]) {
    out.put_u16(bytes.len() as u16);
    out.put_slice(bytes);
}

pub fn put_long_bytes(out: &mut impl BufMut, bytes: &[u8]) {
    out.put_u32(bytes.len() as u32);
    out.put_slice(bytes);
}

pub fn is_known_but_unsupported(version: u16) -> bool {
    matches!(
        version,
        VERSION_INTERNAL | VERSION_UPSTREAM_V4 | VERSION_UPSTREAM_V5
    )
}
