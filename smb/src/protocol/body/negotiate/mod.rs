use serde::{Deserialize, Serialize};
use uuid::Uuid;

use smb_core::cursor::{body_offset, SMBCursor};
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::byte_helper::pad_to;
use crate::protocol::body::{Capabilities, FileTime, SecurityMode, SMBDialect};
use crate::protocol::header::SMB2_HEADER_SIZE;

pub mod context;

pub use context::NegotiateContext;

const NEGOTIATE_REQUEST_SIZE: u16 = 36;
const NEGOTIATE_RESPONSE_SIZE: u16 = 65;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBNegotiateRequest {
    pub security_mode: SecurityMode,
    pub capabilities: Capabilities,
    pub client_guid: Uuid,
    pub dialects: Vec<SMBDialect>,
    pub negotiate_contexts: Vec<NegotiateContext>,
}

impl SMBNegotiateRequest {
    fn context_offset(&self) -> usize {
        let end_of_dialects = SMB2_HEADER_SIZE + NEGOTIATE_REQUEST_SIZE as usize + self.dialects.len() * 2;
        end_of_dialects.div_ceil(8) * 8
    }
}

impl SMBByteSize for SMBNegotiateRequest {
    fn smb_byte_size(&self) -> usize {
        self.smb_to_bytes().len()
    }
}

impl SMBToBytes for SMBNegotiateRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let has_contexts = !self.negotiate_contexts.is_empty();
        let context_offset = if has_contexts { self.context_offset() as u32 } else { 0 };
        let mut bytes = [
            &NEGOTIATE_REQUEST_SIZE.to_le_bytes()[..],
            &(self.dialects.len() as u16).to_le_bytes(),
            &self.security_mode.smb_to_bytes(),
            &[0, 0],
            &self.capabilities.smb_to_bytes(),
            &self.client_guid.smb_to_bytes(),
            &context_offset.to_le_bytes(),
            &(self.negotiate_contexts.len() as u16).to_le_bytes(),
            &[0, 0],
            &self.dialects.smb_to_bytes(),
        ]
        .concat();
        if has_contexts {
            // offsets count from the start of the header
            let mut framed = vec![0_u8; SMB2_HEADER_SIZE];
            framed.append(&mut bytes);
            pad_to(&mut framed, 8);
            framed.extend_from_slice(&context::negotiate_contexts_to_bytes(&self.negotiate_contexts));
            bytes = framed.split_off(SMB2_HEADER_SIZE);
        }
        bytes
    }
}

impl SMBFromBytes for SMBNegotiateRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(NEGOTIATE_REQUEST_SIZE)?;
        let dialect_count = cursor.u16()? as usize;
        let security_mode = SecurityMode::from_bits_truncate(cursor.u16()?);
        cursor.skip(2)?;
        let capabilities = Capabilities::from_bits_truncate(cursor.u32()?);
        let client_guid = cursor.guid()?;
        let context_offset = cursor.u32()? as usize;
        let context_count = cursor.u16()? as usize;
        cursor.skip(2)?;
        let dialects = (0..dialect_count)
            .map(|_| {
                let raw = cursor.u16()?;
                SMBDialect::try_from(raw).map_err(|_| SMBError::parse_error("Unknown dialect"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let negotiate_contexts = if context_count > 0 {
            context::parse_negotiate_contexts(input, body_offset(context_offset, SMB2_HEADER_SIZE)?, context_count)?
        } else {
            Vec::new()
        };
        Ok((&[], Self { security_mode, capabilities, client_guid, dialects, negotiate_contexts }))
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBNegotiateResponse {
    pub security_mode: SecurityMode,
    pub dialect: SMBDialect,
    pub server_guid: Uuid,
    pub capabilities: Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: FileTime,
    pub server_start_time: FileTime,
    pub buffer: Vec<u8>,
    pub negotiate_contexts: Vec<NegotiateContext>,
}

impl SMBByteSize for SMBNegotiateResponse {
    fn smb_byte_size(&self) -> usize {
        self.smb_to_bytes().len()
    }
}

impl SMBFromBytes for SMBNegotiateResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(NEGOTIATE_RESPONSE_SIZE)?;
        let security_mode = SecurityMode::from_bits_truncate(cursor.u16()?);
        let dialect = SMBDialect::try_from(cursor.u16()?)
            .map_err(|_| SMBError::parse_error("Server selected an unknown dialect"))?;
        let context_count = cursor.u16()? as usize;
        let server_guid = cursor.guid()?;
        let capabilities = Capabilities::from_bits_truncate(cursor.u32()?);
        let max_transact_size = cursor.u32()?;
        let max_read_size = cursor.u32()?;
        let max_write_size = cursor.u32()?;
        let system_time = FileTime::from_raw(cursor.u64()?);
        let server_start_time = FileTime::from_raw(cursor.u64()?);
        let buffer_offset = cursor.u16()? as usize;
        let buffer_length = cursor.u16()? as usize;
        let context_offset = cursor.u32()? as usize;
        let buffer = if buffer_length > 0 {
            cursor.region(body_offset(buffer_offset, SMB2_HEADER_SIZE)?, buffer_length)?.to_vec()
        } else {
            Vec::new()
        };
        let negotiate_contexts = if dialect == SMBDialect::V3_1_1 && context_count > 0 {
            context::parse_negotiate_contexts(input, body_offset(context_offset, SMB2_HEADER_SIZE)?, context_count)?
        } else {
            Vec::new()
        };
        Ok((&[], Self {
            security_mode,
            dialect,
            server_guid,
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            system_time,
            server_start_time,
            buffer,
            negotiate_contexts,
        }))
    }
}

impl SMBToBytes for SMBNegotiateResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let buffer_offset = SMB2_HEADER_SIZE + NEGOTIATE_RESPONSE_SIZE as usize - 1;
        let mut framed = vec![0_u8; SMB2_HEADER_SIZE];
        framed.extend_from_slice(&NEGOTIATE_RESPONSE_SIZE.to_le_bytes());
        framed.extend_from_slice(&self.security_mode.smb_to_bytes());
        framed.extend_from_slice(&self.dialect.smb_to_bytes());
        framed.extend_from_slice(&(self.negotiate_contexts.len() as u16).to_le_bytes());
        framed.extend_from_slice(&self.server_guid.smb_to_bytes());
        framed.extend_from_slice(&self.capabilities.smb_to_bytes());
        framed.extend_from_slice(&self.max_transact_size.to_le_bytes());
        framed.extend_from_slice(&self.max_read_size.to_le_bytes());
        framed.extend_from_slice(&self.max_write_size.to_le_bytes());
        framed.extend_from_slice(&self.system_time.smb_to_bytes());
        framed.extend_from_slice(&self.server_start_time.smb_to_bytes());
        framed.extend_from_slice(&(buffer_offset as u16).to_le_bytes());
        framed.extend_from_slice(&(self.buffer.len() as u16).to_le_bytes());
        let context_offset_pos = framed.len();
        framed.extend_from_slice(&[0; 4]);
        framed.extend_from_slice(&self.buffer);
        if !self.negotiate_contexts.is_empty() {
            pad_to(&mut framed, 8);
            let offset = framed.len() as u32;
            framed[context_offset_pos..context_offset_pos + 4].copy_from_slice(&offset.to_le_bytes());
            framed.extend_from_slice(&context::negotiate_contexts_to_bytes(&self.negotiate_contexts));
        }
        framed.split_off(SMB2_HEADER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context::{EncryptionCapabilities, EncryptionCipher, HashAlgorithm, PreAuthIntegrityCapabilities};

    fn request() -> SMBNegotiateRequest {
        SMBNegotiateRequest {
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Capabilities::client_default(true),
            client_guid: Uuid::from_u128(0x1234),
            dialects: SMBDialect::PREFERENCE_ORDER.to_vec(),
            negotiate_contexts: vec![NegotiateContext::PreAuthIntegrityCapabilities(PreAuthIntegrityCapabilities {
                hash_algorithms: vec![HashAlgorithm::SHA512],
                salt: vec![1; 32],
            })],
        }
    }

    #[test]
    fn request_context_offset_is_aligned_past_dialects() {
        let bytes = request().smb_to_bytes();
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 36);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 5);
        let offset = u32::from_le_bytes(bytes[28..32].try_into().unwrap()) as usize;
        // 64 + 36 + 10 bytes of dialects = 110, aligned to 112
        assert_eq!(offset, 112);
        assert_eq!(&bytes[offset - 64..offset - 62], &[1, 0]);
    }

    #[test]
    fn request_parses_back() {
        let original = request();
        let (_, parsed) = SMBNegotiateRequest::smb_from_bytes(&original.smb_to_bytes()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn response_with_buffer_and_contexts_parses_back() {
        let response = SMBNegotiateResponse {
            security_mode: SecurityMode::SIGNING_ENABLED,
            dialect: SMBDialect::V3_1_1,
            server_guid: Uuid::from_u128(99),
            capabilities: Capabilities::LEASING | Capabilities::LARGE_MTU,
            max_transact_size: 65536,
            max_read_size: 65536,
            max_write_size: 65536,
            system_time: FileTime::from_unix(1),
            server_start_time: FileTime::default(),
            buffer: vec![0x60, 0x01, 0x02],
            negotiate_contexts: vec![NegotiateContext::EncryptionCapabilities(EncryptionCapabilities {
                ciphers: vec![EncryptionCipher::AES128GCM],
            })],
        };
        let bytes = response.smb_to_bytes();
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 65);
        let (_, parsed) = SMBNegotiateResponse::smb_from_bytes(&bytes).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn response_with_wrong_structure_size_is_fatal() {
        let mut bytes = vec![0_u8; 80];
        bytes[0] = 64;
        assert!(SMBNegotiateResponse::smb_from_bytes(&bytes).is_err());
    }

    #[test]
    fn security_buffer_beyond_payload_is_rejected() {
        let response = SMBNegotiateResponse {
            security_mode: SecurityMode::empty(),
            dialect: SMBDialect::V2_1_0,
            server_guid: Uuid::nil(),
            capabilities: Capabilities::empty(),
            max_transact_size: 1,
            max_read_size: 1,
            max_write_size: 1,
            system_time: FileTime::default(),
            server_start_time: FileTime::default(),
            buffer: vec![1, 2, 3, 4],
            negotiate_contexts: vec![],
        };
        let mut bytes = response.smb_to_bytes();
        bytes[58] = 0xFF;
        assert!(SMBNegotiateResponse::smb_from_bytes(&bytes).is_err());
    }
}
