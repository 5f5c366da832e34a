//! Bounded byte reader over the module binary. Sub-readers confine section
//! reads to `[section_start, section_start + size)` while keeping offsets
//! absolute for error reporting.

use crate::error::DecodeError;
use crate::leb128;

pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0, end: bytes.len() }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.end
    }

    fn eof(&self) -> DecodeError {
        DecodeError::new("unexpected end of section or function", self.pos)
    }

    /// Split off the next `len` bytes as a child reader and step over them.
    pub fn sub(&mut self, len: usize) -> Result<Reader<'a>, DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::new("length out of bounds", self.pos));
        }
        let child = Reader { bytes: self.bytes, pos: self.pos, end: self.pos + len };
        self.pos += len;
        Ok(child)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.end {
            return Err(self.eof());
        }
        let b = self.bytes[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(self.eof());
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.bytes(len).map(|_| ())
    }

    pub fn leb_u32(&mut self) -> Result<u32, DecodeError> {
        let (value, len) = leb128::read_u32(&self.bytes[self.pos..self.end])
            .map_err(|e| DecodeError::new(e.message(), self.pos))?;
        self.pos += len;
        Ok(value)
    }

    pub fn leb_i32(&mut self) -> Result<i32, DecodeError> {
        let (value, len) = leb128::read_i32(&self.bytes[self.pos..self.end])
            .map_err(|e| DecodeError::new(e.message(), self.pos))?;
        self.pos += len;
        Ok(value)
    }

    pub fn leb_i64(&mut self) -> Result<i64, DecodeError> {
        let (value, len) = leb128::read_i64(&self.bytes[self.pos..self.end])
            .map_err(|e| DecodeError::new(e.message(), self.pos))?;
        self.pos += len;
        Ok(value)
    }

    pub fn f32_bits(&mut self) -> Result<u32, DecodeError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f64_bits(&mut self) -> Result<u64, DecodeError> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Length-prefixed, UTF-8-validated name.
    pub fn name(&mut self) -> Result<&'a str, DecodeError> {
        let at = self.pos;
        let len = self.leb_u32()? as usize;
        let bytes = self.bytes(len)?;
        if !leb128::is_valid_utf8(bytes) {
            return Err(DecodeError::new("invalid UTF-8 encoding", at));
        }
        // Validated above.
        Ok(std::str::from_utf8(bytes).unwrap())
    }
}
