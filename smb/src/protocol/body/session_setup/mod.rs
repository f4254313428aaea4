use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::body::{read_buffer, Capabilities, SecurityMode};
use crate::protocol::body::session_setup::flags::{SMBSessionFlags, SMBSessionSetupFlags};
use crate::protocol::header::SMB2_HEADER_SIZE;

pub mod flags;

const SESSION_SETUP_REQUEST_SIZE: u16 = 25;
const SESSION_SETUP_RESPONSE_SIZE: u16 = 9;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBSessionSetupRequest {
    pub flags: SMBSessionSetupFlags,
    pub security_mode: SecurityMode,
    pub capabilities: Capabilities,
    pub previous_session_id: u64,
    pub buffer: Vec<u8>,
}

impl SMBSessionSetupRequest {
    pub fn new(flags: SMBSessionSetupFlags, security_mode: SecurityMode, capabilities: Capabilities, buffer: Vec<u8>) -> Self {
        Self {
            flags,
            security_mode,
            capabilities,
            previous_session_id: 0,
            buffer,
        }
    }
}

impl SMBByteSize for SMBSessionSetupRequest {
    fn smb_byte_size(&self) -> usize {
        SESSION_SETUP_REQUEST_SIZE as usize - 1 + self.buffer.len()
    }
}

impl SMBToBytes for SMBSessionSetupRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let buffer_offset = SMB2_HEADER_SIZE + SESSION_SETUP_REQUEST_SIZE as usize - 1;
        [
            &SESSION_SETUP_REQUEST_SIZE.to_le_bytes()[..],
            &[self.flags.bits(), self.security_mode.bits() as u8],
            &self.capabilities.smb_to_bytes(),
            &[0; 4],
            &(buffer_offset as u16).to_le_bytes(),
            &(self.buffer.len() as u16).to_le_bytes(),
            &self.previous_session_id.to_le_bytes(),
            &self.buffer,
        ]
        .concat()
    }
}

impl SMBFromBytes for SMBSessionSetupRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(SESSION_SETUP_REQUEST_SIZE)?;
        let flags = SMBSessionSetupFlags::from_bits_truncate(cursor.u8()?);
        let security_mode = SecurityMode::from_bits_truncate(cursor.u8()? as u16);
        let capabilities = Capabilities::from_bits_truncate(cursor.u32()?);
        cursor.skip(4)?;
        let offset = cursor.u16()? as usize;
        let length = cursor.u16()? as usize;
        let previous_session_id = cursor.u64()?;
        let buffer = read_buffer(&cursor, offset, length)?;
        Ok((&[], Self { flags, security_mode, capabilities, previous_session_id, buffer }))
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBSessionSetupResponse {
    pub session_flags: SMBSessionFlags,
    pub buffer: Vec<u8>,
}

impl SMBSessionSetupResponse {
    pub fn new(session_flags: SMBSessionFlags, buffer: Vec<u8>) -> Self {
        Self {
            session_flags,
            buffer,
        }
    }
}

impl SMBByteSize for SMBSessionSetupResponse {
    fn smb_byte_size(&self) -> usize {
        SESSION_SETUP_RESPONSE_SIZE as usize - 1 + self.buffer.len()
    }
}

impl SMBToBytes for SMBSessionSetupResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let buffer_offset = SMB2_HEADER_SIZE + SESSION_SETUP_RESPONSE_SIZE as usize - 1;
        [
            &SESSION_SETUP_RESPONSE_SIZE.to_le_bytes()[..],
            &self.session_flags.smb_to_bytes(),
            &(buffer_offset as u16).to_le_bytes(),
            &(self.buffer.len() as u16).to_le_bytes(),
            &self.buffer,
        ]
        .concat()
    }
}

impl SMBFromBytes for SMBSessionSetupResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(SESSION_SETUP_RESPONSE_SIZE)?;
        let session_flags = SMBSessionFlags::from_bits_truncate(cursor.u16()?);
        let offset = cursor.u16()? as usize;
        let length = cursor.u16()? as usize;
        let buffer = read_buffer(&cursor, offset, length)?;
        Ok((&[], Self { session_flags, buffer }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_request_layout() {
        let mut request = SMBSessionSetupRequest::new(
            SMBSessionSetupFlags::BINDING,
            SecurityMode::SIGNING_ENABLED,
            Capabilities::DFS,
            vec![0x4E, 0x54],
        );
        request.previous_session_id = 0;
        let bytes = request.smb_to_bytes();
        assert_eq!(bytes.len(), 26);
        assert_eq!(bytes[2], 0x01);
        assert_eq!(bytes[3], 0x01);
        assert_eq!(u16::from_le_bytes([bytes[12], bytes[13]]), 88);
        assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]), 2);
        let (_, parsed) = SMBSessionSetupRequest::smb_from_bytes(&bytes).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn response_buffer_is_bounds_checked() {
        let response = SMBSessionSetupResponse::new(SMBSessionFlags::ENCRYPT_DATA, vec![1, 2, 3]);
        let mut bytes = response.smb_to_bytes();
        let (_, parsed) = SMBSessionSetupResponse::smb_from_bytes(&bytes).unwrap();
        assert_eq!(parsed, response);
        bytes[6] = 40;
        assert!(SMBSessionSetupResponse::smb_from_bytes(&bytes).is_err());
    }
}
