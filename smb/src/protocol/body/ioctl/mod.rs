use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::body::create::SMBFileId;
use crate::protocol::body::read_buffer;
use crate::protocol::header::SMB2_HEADER_SIZE;

pub use flags::SMBIoCtlRequestFlags;
pub use method::SMBIoCtlCode;
pub use validate_negotiate::{ValidateNegotiateInfoRequest, ValidateNegotiateInfoResponse};

mod flags;
mod method;
mod validate_negotiate;

const IOCTL_REQUEST_SIZE: u16 = 57;
const IOCTL_RESPONSE_SIZE: u16 = 49;
const IOCTL_REQUEST_FIXED: usize = 56;
const IOCTL_RESPONSE_FIXED: usize = 48;

/// File id used for ioctls that do not target an open (e.g. validate negotiate).
pub const SMB_IOCTL_NO_FILE: SMBFileId = SMBFileId { persistent: u64::MAX, volatile: u64::MAX };

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBIoCtlRequest {
    pub ctl_code: SMBIoCtlCode,
    pub file_id: SMBFileId,
    pub max_input_response: u32,
    pub max_output_response: u32,
    pub flags: SMBIoCtlRequestFlags,
    pub input: Vec<u8>,
}

impl SMBIoCtlRequest {
    pub fn fsctl(ctl_code: SMBIoCtlCode, file_id: SMBFileId, input: Vec<u8>, max_output_response: u32) -> Self {
        Self {
            ctl_code,
            file_id,
            max_input_response: 0,
            max_output_response,
            flags: SMBIoCtlRequestFlags::FSCTL,
            input,
        }
    }
}

impl SMBByteSize for SMBIoCtlRequest {
    fn smb_byte_size(&self) -> usize {
        IOCTL_REQUEST_FIXED + self.input.len().max(1)
    }
}

impl SMBToBytes for SMBIoCtlRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let input_offset = if self.input.is_empty() { 0 } else { SMB2_HEADER_SIZE + IOCTL_REQUEST_FIXED };
        let mut bytes = [
            &IOCTL_REQUEST_SIZE.to_le_bytes()[..],
            &[0; 2],
            &u32::from(self.ctl_code).to_le_bytes(),
            &self.file_id.smb_to_bytes(),
            &(input_offset as u32).to_le_bytes(),
            &(self.input.len() as u32).to_le_bytes(),
            &self.max_input_response.to_le_bytes(),
            &[0; 4],
            &[0; 4],
            &self.max_output_response.to_le_bytes(),
            &u32::from(self.flags).to_le_bytes(),
            &[0; 4],
            &self.input,
        ].concat();
        if self.input.is_empty() {
            bytes.push(0);
        }
        bytes
    }
}

impl SMBFromBytes for SMBIoCtlRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(IOCTL_REQUEST_SIZE)?;
        cursor.skip(2)?;
        let ctl_code = SMBIoCtlCode::from(cursor.u32()?);
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        let input_offset = cursor.u32()? as usize;
        let input_count = cursor.u32()? as usize;
        let max_input_response = cursor.u32()?;
        cursor.skip(8)?;
        let max_output_response = cursor.u32()?;
        let flags = SMBIoCtlRequestFlags::try_from(cursor.u32()?)
            .map_err(|_| SMBError::parse_error("Invalid ioctl flags"))?;
        cursor.skip(4)?;
        let input = read_buffer(&cursor, input_offset, input_count)?;
        Ok((&[], Self { ctl_code, file_id, max_input_response, max_output_response, flags, input }))
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBIoCtlResponse {
    pub ctl_code: SMBIoCtlCode,
    pub file_id: SMBFileId,
    pub output: Vec<u8>,
}

impl SMBIoCtlResponse {
    pub fn new(ctl_code: SMBIoCtlCode, file_id: SMBFileId, output: Vec<u8>) -> Self {
        Self { ctl_code, file_id, output }
    }
}

impl SMBByteSize for SMBIoCtlResponse {
    fn smb_byte_size(&self) -> usize {
        IOCTL_RESPONSE_FIXED + self.output.len()
    }
}

impl SMBToBytes for SMBIoCtlResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let offset = (SMB2_HEADER_SIZE + IOCTL_RESPONSE_FIXED) as u32;
        [
            &IOCTL_RESPONSE_SIZE.to_le_bytes()[..],
            &[0; 2],
            &u32::from(self.ctl_code).to_le_bytes(),
            &self.file_id.smb_to_bytes(),
            &offset.to_le_bytes(),
            &[0; 4],
            &offset.to_le_bytes(),
            &(self.output.len() as u32).to_le_bytes(),
            &[0; 8],
            &self.output,
        ].concat()
    }
}

impl SMBFromBytes for SMBIoCtlResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(IOCTL_RESPONSE_SIZE)?;
        cursor.skip(2)?;
        let ctl_code = SMBIoCtlCode::from(cursor.u32()?);
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        cursor.skip(8)?;
        let output_offset = cursor.u32()? as usize;
        let output_count = cursor.u32()? as usize;
        cursor.skip(8)?;
        let output = read_buffer(&cursor, output_offset, output_count)?;
        Ok((&[], Self { ctl_code, file_id, output }))
    }
}
