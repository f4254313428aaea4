//! Create context chain framing (MS-SMB2 2.2.13.2).
//!
//! Each entry is a 16-byte header (next, name offset/length, data offset/length)
//! followed by the name and the 8-aligned data. Offsets are relative to the entry.

use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::byte_helper::{align_up, pad_to};

const CONTEXT_HEADER_SIZE: usize = 16;

/// A context as it appears on the wire, before its tag is interpreted.
#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct CreateContextWrapper {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
}

impl CreateContextWrapper {
    pub fn new(name: &[u8], data: Vec<u8>) -> Self {
        Self { name: name.to_vec(), data }
    }

    fn encode(&self, last: bool) -> Vec<u8> {
        let name_offset = CONTEXT_HEADER_SIZE;
        let data_offset = if self.data.is_empty() {
            0
        } else {
            align_up(name_offset + self.name.len(), 8)
        };
        let mut bytes = Vec::with_capacity(data_offset + self.data.len() + 8);
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&(name_offset as u16).to_le_bytes());
        bytes.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&[0; 2]);
        bytes.extend_from_slice(&(data_offset as u16).to_le_bytes());
        bytes.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.name);
        if !self.data.is_empty() {
            pad_to(&mut bytes, 8);
            bytes.extend_from_slice(&self.data);
        }
        if !last {
            pad_to(&mut bytes, 8);
            let next = bytes.len() as u32;
            bytes[0..4].copy_from_slice(&next.to_le_bytes());
        }
        bytes
    }
}

pub fn create_contexts_to_bytes(contexts: &[CreateContextWrapper]) -> Vec<u8> {
    let count = contexts.len();
    contexts.iter()
        .enumerate()
        .flat_map(|(idx, context)| context.encode(idx + 1 == count))
        .collect()
}

/// Walks the chain in `buffer`, validating every offset against the buffer bounds.
pub fn parse_create_contexts(buffer: &[u8]) -> SMBResult<Vec<CreateContextWrapper>> {
    let mut contexts = Vec::new();
    let mut start = 0_usize;
    if buffer.is_empty() {
        return Ok(contexts);
    }
    loop {
        let entry = buffer.get(start..)
            .ok_or_else(|| SMBError::parse_error("Create context offset out of bounds"))?;
        let mut cursor = SMBCursor::new(entry);
        let next = cursor.u32()? as usize;
        let name_offset = cursor.u16()? as usize;
        let name_length = cursor.u16()? as usize;
        cursor.skip(2)?;
        let data_offset = cursor.u16()? as usize;
        let data_length = cursor.u32()? as usize;
        if name_offset < CONTEXT_HEADER_SIZE || (data_length > 0 && data_offset < CONTEXT_HEADER_SIZE) {
            return Err(SMBError::parse_error("Create context field overlaps its header"));
        }
        let name = cursor.region(name_offset, name_length)?.to_vec();
        let data = cursor.region(data_offset, data_length)?.to_vec();
        contexts.push(CreateContextWrapper { name, data });
        if next == 0 {
            break;
        }
        if next % 8 != 0 || next < CONTEXT_HEADER_SIZE {
            return Err(SMBError::parse_error("Misaligned create context chain"));
        }
        start = start.checked_add(next)
            .ok_or_else(|| SMBError::parse_error("Create context chain overflow"))?;
    }
    Ok(contexts)
}
