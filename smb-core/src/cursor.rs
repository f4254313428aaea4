//! Bounds-checked reading over a received buffer.
//!
//! Every accessor validates the requested range against the buffer before
//! indexing, so offsets and lengths claimed by the peer can never reach past
//! what was actually received.

use uuid::Uuid;

use crate::error::SMBError;
use crate::SMBResult;

#[derive(Debug, Clone, Copy)]
pub struct SMBCursor<'a> {
    buffer: &'a [u8],
    position: usize,
}

macro_rules! cursor_read_le {
    ($name: ident, $t: ty) => {
        pub fn $name(&mut self) -> SMBResult<$t> {
            const SIZE: usize = std::mem::size_of::<$t>();
            let bytes = self.take(SIZE)?;
            let mut raw = [0_u8; SIZE];
            raw.copy_from_slice(bytes);
            Ok(<$t>::from_le_bytes(raw))
        }
    };
}

impl<'a> SMBCursor<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buffer[self.position..]
    }

    pub fn seek(&mut self, position: usize) -> SMBResult<()> {
        if position > self.buffer.len() {
            return Err(SMBError::payload_too_small(position, self.buffer.len()));
        }
        self.position = position;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> SMBResult<()> {
        self.take(count).map(|_| ())
    }

    pub fn take(&mut self, count: usize) -> SMBResult<&'a [u8]> {
        let end = self.position.checked_add(count)
            .ok_or_else(|| SMBError::parse_error("Length overflow"))?;
        if end > self.buffer.len() {
            return Err(SMBError::payload_too_small(end, self.buffer.len()));
        }
        let slice = &self.buffer[self.position..end];
        self.position = end;
        Ok(slice)
    }

    cursor_read_le!(u8, u8);
    cursor_read_le!(u16, u16);
    cursor_read_le!(u32, u32);
    cursor_read_le!(u64, u64);

    pub fn array<const N: usize>(&mut self) -> SMBResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut raw = [0_u8; N];
        raw.copy_from_slice(bytes);
        Ok(raw)
    }

    pub fn guid(&mut self) -> SMBResult<Uuid> {
        Ok(Uuid::from_bytes_le(self.array::<16>()?))
    }

    /// Reads the leading structure size and fails unless it matches `expected`.
    pub fn structure_size(&mut self, expected: u16) -> SMBResult<()> {
        let size = self.u16()?;
        if size != expected {
            return Err(SMBError::parse_error(format!(
                "Structure size mismatch: expected {}, got {}", expected, size
            )));
        }
        Ok(())
    }

    /// Returns the region described by an offset/length pair without moving the cursor.
    pub fn region(&self, offset: usize, length: usize) -> SMBResult<&'a [u8]> {
        if length == 0 {
            return Ok(&[]);
        }
        let end = offset.checked_add(length)
            .ok_or_else(|| SMBError::parse_error("Region overflow"))?;
        if end > self.buffer.len() {
            return Err(SMBError::payload_too_small(end, self.buffer.len()));
        }
        Ok(&self.buffer[offset..end])
    }
}

/// Converts a header-relative offset into a body-relative one.
pub fn body_offset(header_relative: usize, header_size: usize) -> SMBResult<usize> {
    header_relative.checked_sub(header_size)
        .ok_or_else(|| SMBError::parse_error("Offset points inside the header"))
}
