use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::body::create::{SMBFileAttributes, SMBFileId};
use crate::protocol::body::filetime::FileTime;

pub use flags::SMBCloseFlags;

mod flags;

const CLOSE_REQUEST_SIZE: u16 = 24;
const CLOSE_RESPONSE_SIZE: u16 = 60;

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBCloseRequest {
    pub flags: SMBCloseFlags,
    pub file_id: SMBFileId,
}

impl SMBCloseRequest {
    pub fn new(file_id: SMBFileId) -> Self {
        Self { flags: SMBCloseFlags::empty(), file_id }
    }
}

impl SMBByteSize for SMBCloseRequest {
    fn smb_byte_size(&self) -> usize {
        CLOSE_REQUEST_SIZE as usize
    }
}

impl SMBToBytes for SMBCloseRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &CLOSE_REQUEST_SIZE.to_le_bytes()[..],
            &self.flags.bits().to_le_bytes(),
            &[0; 4],
            &self.file_id.smb_to_bytes(),
        ].concat()
    }
}

impl SMBFromBytes for SMBCloseRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(CLOSE_REQUEST_SIZE)?;
        let flags = SMBCloseFlags::from_bits_truncate(cursor.u16()?);
        cursor.skip(4)?;
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        Ok((cursor.remaining(), Self { flags, file_id }))
    }
}

/// Attributes are only meaningful when the request asked for `POSTQUERY_ATTRIB`.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Default)]
pub struct SMBCloseResponse {
    pub flags: SMBCloseFlags,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_attributes: SMBFileAttributes,
}

impl SMBByteSize for SMBCloseResponse {
    fn smb_byte_size(&self) -> usize {
        CLOSE_RESPONSE_SIZE as usize
    }
}

impl SMBToBytes for SMBCloseResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &CLOSE_RESPONSE_SIZE.to_le_bytes()[..],
            &self.flags.bits().to_le_bytes(),
            &[0; 4],
            &self.creation_time.raw().to_le_bytes(),
            &self.last_access_time.raw().to_le_bytes(),
            &self.last_write_time.raw().to_le_bytes(),
            &self.change_time.raw().to_le_bytes(),
            &self.allocation_size.to_le_bytes(),
            &self.end_of_file.to_le_bytes(),
            &self.file_attributes.bits().to_le_bytes(),
        ].concat()
    }
}

impl SMBFromBytes for SMBCloseResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(CLOSE_RESPONSE_SIZE)?;
        let flags = SMBCloseFlags::from_bits_truncate(cursor.u16()?);
        cursor.skip(4)?;
        let creation_time = FileTime::from_raw(cursor.u64()?);
        let last_access_time = FileTime::from_raw(cursor.u64()?);
        let last_write_time = FileTime::from_raw(cursor.u64()?);
        let change_time = FileTime::from_raw(cursor.u64()?);
        let allocation_size = cursor.u64()?;
        let end_of_file = cursor.u64()?;
        let file_attributes = SMBFileAttributes::from_bits_truncate(cursor.u32()?);
        Ok((cursor.remaining(), Self {
            flags,
            creation_time,
            last_access_time,
            last_write_time,
            change_time,
            allocation_size,
            end_of_file,
            file_attributes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MS-SMB2 2.2.15: close request is 24 bytes with the file id at offset 8.
    #[test]
    fn close_request_layout() {
        let request = SMBCloseRequest::new(SMBFileId::new(0x11, 0x22));
        let bytes = request.smb_to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[8..16], &0x11_u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &0x22_u64.to_le_bytes());
    }

    /// MS-SMB2 2.2.16: close response is 60 bytes.
    #[test]
    fn close_response_size() {
        let response = SMBCloseResponse { end_of_file: 10, ..Default::default() };
        let bytes = response.smb_to_bytes();
        assert_eq!(bytes.len(), 60);
        let (_, parsed) = SMBCloseResponse::smb_from_bytes(&bytes).unwrap();
        assert_eq!(parsed.end_of_file, 10);
        assert!(SMBCloseResponse::smb_from_bytes(&bytes[..40]).is_err());
    }
}
