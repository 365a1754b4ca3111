// SPDX-License-Identifier: MIT

//! Big-endian wire codec: a bounded load cursor and an append-only store
//! buffer with the response framing helpers.
//!
//! Every structure on the wire and in persistent NV passes through this
//! layer. Loads consume from the front of a shrinking slice and fail with
//! `TPM_BAD_PARAM_SIZE` on underflow.

use crate::types::{
    Digest, Secret, TpmRc, TpmResult, DIGEST_SIZE, TAG_RSP_COMMAND,
};

/// Growth increment of a [`StoreBuffer`].
const ALLOC_STEP: usize = 1024;

/// Hard allocation cap of a [`StoreBuffer`].
const ALLOC_MAX: usize = 128 * 1024;

/// Byte offset of `paramSize` in a framed response.
const PARAM_SIZE_OFFSET: usize = 2;

/// Length of the three-field error response (tag, paramSize, returnCode).
pub const ERROR_RESPONSE_LEN: usize = 10;

/// A read cursor over a borrowed byte slice.
#[derive(Clone, Copy, Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn load_bytes(&mut self, n: usize) -> TpmResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(TpmRc::BadParamSize);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn load_u8(&mut self) -> TpmResult<u8> {
        Ok(self.load_bytes(1)?[0])
    }

    pub fn load_u16(&mut self) -> TpmResult<u16> {
        let b = self.load_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn load_u32(&mut self) -> TpmResult<u32> {
        let b = self.load_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn load_u64(&mut self) -> TpmResult<u64> {
        let b = self.load_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// Only `0x00` and `0x01` are valid booleans on the wire.
    pub fn load_bool(&mut self) -> TpmResult<bool> {
        match self.load_u8()? {
            0x00 => Ok(false),
            0x01 => Ok(true),
            _ => Err(TpmRc::BadParameter),
        }
    }

    pub fn load_digest(&mut self) -> TpmResult<Digest> {
        let b = self.load_bytes(DIGEST_SIZE)?;
        let mut d = [0u8; DIGEST_SIZE];
        d.copy_from_slice(b);
        Ok(d)
    }

    pub fn load_secret(&mut self) -> TpmResult<Secret> {
        Ok(Secret::from_slice(self.load_bytes(DIGEST_SIZE)?))
    }

    /// A 32-bit length followed by that many bytes.
    pub fn load_sized(&mut self) -> TpmResult<&'a [u8]> {
        let n = self.load_u32()? as usize;
        self.load_bytes(n)
    }

    /// Consume a 16-bit structure tag, failing with `TPM_INVALID_STRUCTURE`
    /// on mismatch.
    pub fn load_tag(&mut self, expected: u16) -> TpmResult<()> {
        if self.load_u16()? == expected {
            Ok(())
        } else {
            Err(TpmRc::InvalidStructure)
        }
    }

    /// The parameter area must be fully consumed.
    pub fn expect_end(&self) -> TpmResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(TpmRc::BadParamSize)
        }
    }
}

/// An append-only output buffer growing in fixed increments up to a hard
/// cap.
#[derive(Clone, Debug, Default)]
pub struct StoreBuffer {
    buf: Vec<u8>,
}

impl StoreBuffer {
    #[must_use]
    pub fn new() -> Self {
        StoreBuffer::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    fn reserve(&mut self, add: usize) -> TpmResult<()> {
        let needed = self.buf.len() + add;
        if needed > ALLOC_MAX {
            return Err(TpmRc::Size);
        }
        if needed > self.buf.capacity() {
            let steps = needed.div_ceil(ALLOC_STEP);
            self.buf.reserve(steps * ALLOC_STEP - self.buf.len());
        }
        Ok(())
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> TpmResult<()> {
        self.reserve(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn store_u8(&mut self, v: u8) -> TpmResult<()> {
        self.store_bytes(&[v])
    }

    pub fn store_u16(&mut self, v: u16) -> TpmResult<()> {
        self.store_bytes(&v.to_be_bytes())
    }

    pub fn store_u32(&mut self, v: u32) -> TpmResult<()> {
        self.store_bytes(&v.to_be_bytes())
    }

    pub fn store_u64(&mut self, v: u64) -> TpmResult<()> {
        self.store_bytes(&v.to_be_bytes())
    }

    pub fn store_bool(&mut self, v: bool) -> TpmResult<()> {
        self.store_u8(u8::from(v))
    }

    /// A 32-bit length prefix followed by the bytes.
    pub fn store_sized(&mut self, bytes: &[u8]) -> TpmResult<()> {
        self.store_u32(bytes.len() as u32)?;
        self.store_bytes(bytes)
    }

    /// Write the response prefix: tag, placeholder `paramSize`, return code.
    pub fn store_initial_response(&mut self, response_tag: u16, rc: TpmRc) -> TpmResult<()> {
        self.store_u16(response_tag)?;
        self.store_u32(ERROR_RESPONSE_LEN as u32)?;
        self.store_u32(rc as u32)
    }

    /// Fix up `paramSize` once all output parameters are appended; on a
    /// non-success code, rewind to exactly the three-field error response.
    pub fn store_final_response(&mut self, rc: TpmRc) {
        debug_assert!(self.buf.len() >= ERROR_RESPONSE_LEN);
        if rc == TpmRc::Success {
            let size = (self.buf.len() as u32).to_be_bytes();
            self.buf[PARAM_SIZE_OFFSET..PARAM_SIZE_OFFSET + 4].copy_from_slice(&size);
        } else {
            self.buf.truncate(ERROR_RESPONSE_LEN);
            self.buf[..2].copy_from_slice(&TAG_RSP_COMMAND.to_be_bytes());
            self.buf[6..10].copy_from_slice(&(rc as u32).to_be_bytes());
        }
    }
}
