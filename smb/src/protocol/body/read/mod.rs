use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::body::create::SMBFileId;
use crate::protocol::body::read_buffer;
use crate::protocol::header::SMB2_HEADER_SIZE;
use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

pub use channel::SMBRWChannel;

pub mod channel;

const READ_REQUEST_SIZE: u16 = 49;
const READ_RESPONSE_SIZE: u16 = 17;
const READ_RESPONSE_DATA_OFFSET: u8 = (SMB2_HEADER_SIZE + 16) as u8;

bitflags! {
    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
    pub struct SMBReadRequestFlags: u8 {
        const UNBUFFERED = 0x01;
        const REQUEST_COMPRESSED = 0x02;
    }
}

impl_smb_from_bytes_for_bitflag! { SMBReadRequestFlags }
impl_smb_to_bytes_for_bitflag! { SMBReadRequestFlags }
impl_smb_byte_size_for_bitflag! { SMBReadRequestFlags }

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBReadRequest {
    pub flags: SMBReadRequestFlags,
    pub read_length: u32,
    pub read_offset: u64,
    pub file_id: SMBFileId,
    pub minimum_count: u32,
    pub channel: SMBRWChannel,
    pub remaining_bytes: u32,
}

impl SMBReadRequest {
    pub fn new(file_id: SMBFileId, read_offset: u64, read_length: u32) -> Self {
        Self {
            flags: SMBReadRequestFlags::empty(),
            read_length,
            read_offset,
            file_id,
            minimum_count: 0,
            channel: SMBRWChannel::None,
            remaining_bytes: 0,
        }
    }
}

impl SMBByteSize for SMBReadRequest {
    fn smb_byte_size(&self) -> usize {
        READ_REQUEST_SIZE as usize
    }
}

impl SMBToBytes for SMBReadRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &READ_REQUEST_SIZE.to_le_bytes()[..],
            &[0, self.flags.bits()],
            &self.read_length.to_le_bytes(),
            &self.read_offset.to_le_bytes(),
            &self.file_id.smb_to_bytes(),
            &self.minimum_count.to_le_bytes(),
            &u32::from(self.channel).to_le_bytes(),
            &self.remaining_bytes.to_le_bytes(),
            &[0; 4],
            &[0],
        ].concat()
    }
}

impl SMBFromBytes for SMBReadRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(READ_REQUEST_SIZE)?;
        cursor.skip(1)?;
        let flags = SMBReadRequestFlags::from_bits_truncate(cursor.u8()?);
        let read_length = cursor.u32()?;
        let read_offset = cursor.u64()?;
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        let minimum_count = cursor.u32()?;
        let channel = SMBRWChannel::try_from(cursor.u32()?)
            .map_err(|_| SMBError::parse_error("Invalid read channel"))?;
        let remaining_bytes = cursor.u32()?;
        cursor.skip(4)?;
        Ok((cursor.remaining(), Self {
            flags,
            read_length,
            read_offset,
            file_id,
            minimum_count,
            channel,
            remaining_bytes,
        }))
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBReadResponse {
    pub data_remaining: u32,
    pub data: Vec<u8>,
}

impl SMBReadResponse {
    pub fn new(data: Vec<u8>, data_remaining: u32) -> Self {
        Self { data_remaining, data }
    }
}

impl SMBByteSize for SMBReadResponse {
    fn smb_byte_size(&self) -> usize {
        READ_RESPONSE_SIZE as usize - 1 + self.data.len()
    }
}

impl SMBToBytes for SMBReadResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &READ_RESPONSE_SIZE.to_le_bytes()[..],
            &[READ_RESPONSE_DATA_OFFSET, 0],
            &(self.data.len() as u32).to_le_bytes(),
            &self.data_remaining.to_le_bytes(),
            &[0; 4],
            &self.data,
        ].concat()
    }
}

impl SMBFromBytes for SMBReadResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(READ_RESPONSE_SIZE)?;
        let data_offset = cursor.u8()? as usize;
        cursor.skip(1)?;
        let data_length = cursor.u32()? as usize;
        let data_remaining = cursor.u32()?;
        cursor.skip(4)?;
        let data = read_buffer(&cursor, data_offset, data_length)?;
        Ok((&[], Self { data_remaining, data }))
    }
}
