use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::byte_helper::{utf16_bytes, utf16_string};
use crate::protocol::body::{read_buffer, SMBAccessMask};
use crate::protocol::header::SMB2_HEADER_SIZE;

pub mod flags;

pub use flags::{SMBShareFlags, SMBShareType, SMBTreeCapabilities, SMBTreeConnectFlags};

const TREE_CONNECT_REQUEST_SIZE: u16 = 9;
const TREE_CONNECT_RESPONSE_SIZE: u16 = 16;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBTreeConnectRequest {
    pub flags: SMBTreeConnectFlags,
    pub path: String,
}

impl SMBTreeConnectRequest {
    pub fn new(server: &str, share: &str) -> Self {
        Self {
            flags: SMBTreeConnectFlags::empty(),
            path: format!("\\\\{}\\{}", server, share),
        }
    }
}

impl SMBByteSize for SMBTreeConnectRequest {
    fn smb_byte_size(&self) -> usize {
        TREE_CONNECT_REQUEST_SIZE as usize - 1 + self.path.encode_utf16().count() * 2
    }
}

impl SMBToBytes for SMBTreeConnectRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let path = utf16_bytes(&self.path);
        let offset = SMB2_HEADER_SIZE + TREE_CONNECT_REQUEST_SIZE as usize - 1;
        [
            &TREE_CONNECT_REQUEST_SIZE.to_le_bytes()[..],
            &self.flags.smb_to_bytes(),
            &(offset as u16).to_le_bytes(),
            &(path.len() as u16).to_le_bytes(),
            &path,
        ]
        .concat()
    }
}

impl SMBFromBytes for SMBTreeConnectRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(TREE_CONNECT_REQUEST_SIZE)?;
        let flags = SMBTreeConnectFlags::from_bits_truncate(cursor.u16()?);
        let offset = cursor.u16()? as usize;
        let length = cursor.u16()? as usize;
        let path = utf16_string(&read_buffer(&cursor, offset, length)?)?;
        Ok((&[], Self { flags, path }))
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBTreeConnectResponse {
    pub share_type: SMBShareType,
    pub share_flags: SMBShareFlags,
    pub capabilities: SMBTreeCapabilities,
    pub maximal_access: SMBAccessMask,
}

impl SMBByteSize for SMBTreeConnectResponse {
    fn smb_byte_size(&self) -> usize {
        TREE_CONNECT_RESPONSE_SIZE as usize
    }
}

impl SMBToBytes for SMBTreeConnectResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &TREE_CONNECT_RESPONSE_SIZE.to_le_bytes()[..],
            &[u8::from(self.share_type), 0],
            &self.share_flags.smb_to_bytes(),
            &self.capabilities.smb_to_bytes(),
            &self.maximal_access.smb_to_bytes(),
        ]
        .concat()
    }
}

impl SMBFromBytes for SMBTreeConnectResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(TREE_CONNECT_RESPONSE_SIZE)?;
        let share_type = SMBShareType::try_from(cursor.u8()?)
            .map_err(|_| SMBError::parse_error("Unknown share type"))?;
        cursor.skip(1)?;
        let share_flags = SMBShareFlags::from_bits_truncate(cursor.u32()?);
        let capabilities = SMBTreeCapabilities::from_bits_truncate(cursor.u32()?);
        let maximal_access = SMBAccessMask::from_bits_truncate(cursor.u32()?);
        Ok((cursor.remaining(), Self { share_type, share_flags, capabilities, maximal_access }))
    }
}
