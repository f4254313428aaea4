use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBResult, SMBToBytes};

use crate::byte_helper::{utf16_bytes, utf16_string};
use crate::protocol::body::create::SMBFileId;
use crate::protocol::body::read_buffer;
use crate::protocol::header::SMB2_HEADER_SIZE;

pub use completion_filter::{SMBCompletionFilter, SMBNotifyAction};
pub use flags::SMBChangeNotifyFlags;

mod completion_filter;
mod flags;

const CHANGE_NOTIFY_REQUEST_SIZE: u16 = 32;
const CHANGE_NOTIFY_RESPONSE_SIZE: u16 = 9;
const NOTIFY_ENTRY_FIXED: usize = 12;

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBChangeNotifyRequest {
    pub flags: SMBChangeNotifyFlags,
    pub output_buffer_length: u32,
    pub file_id: SMBFileId,
    pub completion_filter: SMBCompletionFilter,
}

impl SMBChangeNotifyRequest {
    pub fn new(file_id: SMBFileId, completion_filter: SMBCompletionFilter, recursive: bool, output_buffer_length: u32) -> Self {
        let flags = if recursive { SMBChangeNotifyFlags::WATCH_TREE } else { SMBChangeNotifyFlags::empty() };
        Self { flags, output_buffer_length, file_id, completion_filter }
    }
}

impl SMBByteSize for SMBChangeNotifyRequest {
    fn smb_byte_size(&self) -> usize {
        CHANGE_NOTIFY_REQUEST_SIZE as usize
    }
}

impl SMBToBytes for SMBChangeNotifyRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &CHANGE_NOTIFY_REQUEST_SIZE.to_le_bytes()[..],
            &self.flags.smb_to_bytes(),
            &self.output_buffer_length.to_le_bytes(),
            &self.file_id.smb_to_bytes(),
            &self.completion_filter.smb_to_bytes(),
            &[0; 4],
        ].concat()
    }
}

impl SMBFromBytes for SMBChangeNotifyRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(CHANGE_NOTIFY_REQUEST_SIZE)?;
        let flags = SMBChangeNotifyFlags::from_bits_truncate(cursor.u16()?);
        let output_buffer_length = cursor.u32()?;
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        let completion_filter = SMBCompletionFilter::from_bits_truncate(cursor.u32()?);
        cursor.skip(4)?;
        Ok((cursor.remaining(), Self { flags, output_buffer_length, file_id, completion_filter }))
    }
}

/// One FILE_NOTIFY_INFORMATION record.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBFileNotifyInformation {
    pub action: SMBNotifyAction,
    pub file_name: String,
}

impl SMBFileNotifyInformation {
    pub fn new(action: SMBNotifyAction, file_name: impl Into<String>) -> Self {
        Self { action, file_name: file_name.into() }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Default)]
pub struct SMBChangeNotifyResponse {
    pub data: Vec<u8>,
}

impl SMBChangeNotifyResponse {
    pub fn from_entries(entries: &[SMBFileNotifyInformation]) -> Self {
        let mut data = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            let name = utf16_bytes(&entry.file_name);
            let record_len = NOTIFY_ENTRY_FIXED + name.len();
            let padded = if idx + 1 == entries.len() { record_len } else { (record_len + 3) & !3 };
            let next = if idx + 1 == entries.len() { 0 } else { padded as u32 };
            data.extend_from_slice(&next.to_le_bytes());
            data.extend_from_slice(&u32::from(entry.action).to_le_bytes());
            data.extend_from_slice(&(name.len() as u32).to_le_bytes());
            data.extend_from_slice(&name);
            data.resize(data.len() + padded - record_len, 0);
        }
        Self { data }
    }

    /// Walks the chained records; an empty buffer means the server overflowed and the watcher should rescan.
    pub fn entries(&self) -> SMBResult<Vec<SMBFileNotifyInformation>> {
        let mut entries = Vec::new();
        let mut start = 0_usize;
        while start < self.data.len() {
            let mut cursor = SMBCursor::new(&self.data[start..]);
            let next = cursor.u32()? as usize;
            let action = SMBNotifyAction::from(cursor.u32()?);
            let name_len = cursor.u32()? as usize;
            let file_name = utf16_string(cursor.take(name_len)?)?;
            entries.push(SMBFileNotifyInformation { action, file_name });
            if next == 0 {
                break;
            }
            if next < NOTIFY_ENTRY_FIXED || next % 4 != 0 {
                return Err(SMBError::parse_error("Invalid notify entry offset"));
            }
            start += next;
        }
        Ok(entries)
    }
}

impl SMBByteSize for SMBChangeNotifyResponse {
    fn smb_byte_size(&self) -> usize {
        8 + self.data.len().max(1)
    }
}

impl SMBToBytes for SMBChangeNotifyResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let offset = if self.data.is_empty() { 0 } else { (SMB2_HEADER_SIZE + 8) as u16 };
        let mut bytes = [
            &CHANGE_NOTIFY_RESPONSE_SIZE.to_le_bytes()[..],
            &offset.to_le_bytes(),
            &(self.data.len() as u32).to_le_bytes(),
            &self.data,
        ].concat();
        if self.data.is_empty() {
            bytes.push(0);
        }
        bytes
    }
}

impl SMBFromBytes for SMBChangeNotifyResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(CHANGE_NOTIFY_RESPONSE_SIZE)?;
        let offset = cursor.u16()? as usize;
        let length = cursor.u32()? as usize;
        let data = read_buffer(&cursor, offset, length)?;
        Ok((&[], Self { data }))
    }
}
