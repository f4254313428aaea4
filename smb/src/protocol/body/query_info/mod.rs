use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::body::create::SMBFileId;
use crate::protocol::body::read_buffer;
use crate::protocol::header::SMB2_HEADER_SIZE;

pub use flags::SMBQueryInfoFlags;
pub use info_type::{SMBFileInfoClass, SMBInfoType};
pub use security_information::SMBSecurityInformation;

mod flags;
mod info_type;
mod security_information;

const QUERY_INFO_REQUEST_SIZE: u16 = 41;
const QUERY_INFO_RESPONSE_SIZE: u16 = 9;
const QUERY_INFO_REQUEST_FIXED: usize = 40;

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBQueryInfoRequest {
    pub info_type: SMBInfoType,
    pub file_info_class: u8,
    pub output_buffer_length: u32,
    pub additional_information: SMBSecurityInformation,
    pub flags: SMBQueryInfoFlags,
    pub file_id: SMBFileId,
    pub input: Vec<u8>,
}

impl SMBQueryInfoRequest {
    pub fn new(info_type: SMBInfoType, file_info_class: u8, file_id: SMBFileId, output_buffer_length: u32) -> Self {
        Self {
            info_type,
            file_info_class,
            output_buffer_length,
            additional_information: SMBSecurityInformation::empty(),
            flags: SMBQueryInfoFlags::empty(),
            file_id,
            input: Vec::new(),
        }
    }
}

impl SMBByteSize for SMBQueryInfoRequest {
    fn smb_byte_size(&self) -> usize {
        QUERY_INFO_REQUEST_FIXED + self.input.len().max(1)
    }
}

impl SMBToBytes for SMBQueryInfoRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let input_offset = if self.input.is_empty() { 0 } else { SMB2_HEADER_SIZE + QUERY_INFO_REQUEST_FIXED };
        let mut bytes = [
            &QUERY_INFO_REQUEST_SIZE.to_le_bytes()[..],
            &[u8::from(self.info_type), self.file_info_class],
            &self.output_buffer_length.to_le_bytes(),
            &(input_offset as u16).to_le_bytes(),
            &[0; 2],
            &(self.input.len() as u32).to_le_bytes(),
            &self.additional_information.bits().to_le_bytes(),
            &self.flags.bits().to_le_bytes(),
            &self.file_id.smb_to_bytes(),
            &self.input,
        ].concat();
        if self.input.is_empty() {
            bytes.push(0);
        }
        bytes
    }
}

impl SMBFromBytes for SMBQueryInfoRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(QUERY_INFO_REQUEST_SIZE)?;
        let info_type = SMBInfoType::try_from(cursor.u8()?)
            .map_err(|_| SMBError::parse_error("Invalid info type"))?;
        let file_info_class = cursor.u8()?;
        let output_buffer_length = cursor.u32()?;
        let input_offset = cursor.u16()? as usize;
        cursor.skip(2)?;
        let input_length = cursor.u32()? as usize;
        let additional_information = SMBSecurityInformation::from_bits_truncate(cursor.u32()?);
        let flags = SMBQueryInfoFlags::from_bits_truncate(cursor.u32()?);
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        let input = read_buffer(&cursor, input_offset, input_length)?;
        Ok((&[], Self {
            info_type,
            file_info_class,
            output_buffer_length,
            additional_information,
            flags,
            file_id,
            input,
        }))
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBQueryInfoResponse {
    pub data: Vec<u8>,
}

impl SMBByteSize for SMBQueryInfoResponse {
    fn smb_byte_size(&self) -> usize {
        QUERY_INFO_RESPONSE_SIZE as usize - 1 + self.data.len()
    }
}

impl SMBToBytes for SMBQueryInfoResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let offset = (SMB2_HEADER_SIZE + QUERY_INFO_RESPONSE_SIZE as usize - 1) as u16;
        [
            &QUERY_INFO_RESPONSE_SIZE.to_le_bytes()[..],
            &offset.to_le_bytes(),
            &(self.data.len() as u32).to_le_bytes(),
            &self.data,
        ].concat()
    }
}

impl SMBFromBytes for SMBQueryInfoResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(QUERY_INFO_RESPONSE_SIZE)?;
        let offset = cursor.u16()? as usize;
        let length = cursor.u32()? as usize;
        let data = read_buffer(&cursor, offset, length)?;
        Ok((&[], Self { data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MS-SMB2 2.2.37: file id sits at offset 24 of the 41-byte request.
    #[test]
    fn query_info_request_layout() {
        let request = SMBQueryInfoRequest::new(SMBInfoType::File, SMBFileInfoClass::Standard.into(), SMBFileId::new(5, 6), 24);
        let bytes = request.smb_to_bytes();
        assert_eq!(bytes.len(), 41);
        assert_eq!(bytes[2], 1);
        assert_eq!(bytes[3], 5);
        assert_eq!(&bytes[24..32], &5_u64.to_le_bytes());
        let (_, parsed) = SMBQueryInfoRequest::smb_from_bytes(&bytes).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn query_info_response_data() {
        let response = SMBQueryInfoResponse { data: vec![1; 24] };
        let bytes = response.smb_to_bytes();
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 72);
        let (_, parsed) = SMBQueryInfoResponse::smb_from_bytes(&bytes).unwrap();
        assert_eq!(parsed, response);
    }
}
