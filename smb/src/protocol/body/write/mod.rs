use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::body::create::SMBFileId;
use crate::protocol::body::read::SMBRWChannel;
use crate::protocol::body::read_buffer;
use crate::protocol::header::SMB2_HEADER_SIZE;
use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

const WRITE_REQUEST_SIZE: u16 = 49;
const WRITE_RESPONSE_SIZE: u16 = 17;
const WRITE_REQUEST_FIXED: usize = 48;

bitflags! {
    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
    pub struct SMBWriteFlags: u32 {
        const WRITE_THROUGH = 0x01;
        const WRITE_UNBUFFERED = 0x02;
    }
}

impl_smb_from_bytes_for_bitflag! { SMBWriteFlags }
impl_smb_to_bytes_for_bitflag! { SMBWriteFlags }
impl_smb_byte_size_for_bitflag! { SMBWriteFlags }

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBWriteRequest {
    pub offset: u64,
    pub file_id: SMBFileId,
    pub channel: SMBRWChannel,
    pub remaining_bytes: u32,
    pub flags: SMBWriteFlags,
    pub data: Vec<u8>,
}

impl SMBWriteRequest {
    pub fn new(file_id: SMBFileId, offset: u64, data: Vec<u8>) -> Self {
        Self {
            offset,
            file_id,
            channel: SMBRWChannel::None,
            remaining_bytes: 0,
            flags: SMBWriteFlags::empty(),
            data,
        }
    }
}

impl SMBByteSize for SMBWriteRequest {
    fn smb_byte_size(&self) -> usize {
        WRITE_REQUEST_FIXED + self.data.len().max(1)
    }
}

impl SMBToBytes for SMBWriteRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let data_offset = SMB2_HEADER_SIZE + WRITE_REQUEST_FIXED;
        let mut bytes = [
            &WRITE_REQUEST_SIZE.to_le_bytes()[..],
            &(data_offset as u16).to_le_bytes(),
            &(self.data.len() as u32).to_le_bytes(),
            &self.offset.to_le_bytes(),
            &self.file_id.smb_to_bytes(),
            &u32::from(self.channel).to_le_bytes(),
            &self.remaining_bytes.to_le_bytes(),
            &[0; 4],
            &self.flags.bits().to_le_bytes(),
            &self.data,
        ].concat();
        if self.data.is_empty() {
            bytes.push(0);
        }
        bytes
    }
}

impl SMBFromBytes for SMBWriteRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(WRITE_REQUEST_SIZE)?;
        let data_offset = cursor.u16()? as usize;
        let length = cursor.u32()? as usize;
        let offset = cursor.u64()?;
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        let channel = SMBRWChannel::try_from(cursor.u32()?)
            .map_err(|_| SMBError::parse_error("Invalid write channel"))?;
        let remaining_bytes = cursor.u32()?;
        cursor.skip(4)?;
        let flags = SMBWriteFlags::from_bits_truncate(cursor.u32()?);
        let data = read_buffer(&cursor, data_offset, length)?;
        Ok((&[], Self { offset, file_id, channel, remaining_bytes, flags, data }))
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBWriteResponse {
    pub count: u32,
    pub remaining: u32,
}

impl SMBWriteResponse {
    pub fn new(count: u32) -> Self {
        Self { count, remaining: 0 }
    }
}

impl SMBByteSize for SMBWriteResponse {
    fn smb_byte_size(&self) -> usize {
        WRITE_RESPONSE_SIZE as usize - 1
    }
}

impl SMBToBytes for SMBWriteResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &WRITE_RESPONSE_SIZE.to_le_bytes()[..],
            &[0; 2],
            &self.count.to_le_bytes(),
            &self.remaining.to_le_bytes(),
            &[0; 4],
        ].concat()
    }
}

impl SMBFromBytes for SMBWriteResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(WRITE_RESPONSE_SIZE)?;
        cursor.skip(2)?;
        let count = cursor.u32()?;
        let remaining = cursor.u32()?;
        cursor.skip(4)?;
        Ok((cursor.remaining(), Self { count, remaining }))
    }
}
