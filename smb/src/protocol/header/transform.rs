use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

pub const SMB2_TRANSFORM_PROTOCOL_ID: [u8; 4] = [0xFD, b'S', b'M', b'B'];
pub const SMB2_TRANSFORM_HEADER_SIZE: usize = 52;
const TRANSFORM_FLAG_ENCRYPTED: u16 = 0x0001;

/// SMB2 TRANSFORM_HEADER preceding every sealed message (MS-SMB2 2.2.41).
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBTransformHeader {
    pub signature: [u8; 16],
    pub nonce: [u8; 16],
    pub original_message_size: u32,
    pub session_id: u64,
}

impl SMBTransformHeader {
    pub fn new(nonce: [u8; 16], original_message_size: u32, session_id: u64) -> Self {
        Self {
            signature: [0; 16],
            nonce,
            original_message_size,
            session_id,
        }
    }

    /// Bytes 20..52, authenticated but not encrypted.
    pub fn associated_data(&self) -> Vec<u8> {
        self.smb_to_bytes()[20..].to_vec()
    }

    pub fn is_transform(bytes: &[u8]) -> bool {
        bytes.len() >= 4 && bytes[0..4] == SMB2_TRANSFORM_PROTOCOL_ID
    }
}

impl SMBByteSize for SMBTransformHeader {
    fn smb_byte_size(&self) -> usize {
        SMB2_TRANSFORM_HEADER_SIZE
    }
}

impl SMBFromBytes for SMBTransformHeader {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        if cursor.array::<4>()? != SMB2_TRANSFORM_PROTOCOL_ID {
            return Err(SMBError::parse_error("Invalid transform protocol id"));
        }
        let signature = cursor.array::<16>()?;
        let nonce = cursor.array::<16>()?;
        let original_message_size = cursor.u32()?;
        cursor.skip(2)?;
        if cursor.u16()? != TRANSFORM_FLAG_ENCRYPTED {
            return Err(SMBError::parse_error("Transform header is not marked encrypted"));
        }
        let session_id = cursor.u64()?;
        Ok((cursor.remaining(), Self { signature, nonce, original_message_size, session_id }))
    }
}

impl SMBToBytes for SMBTransformHeader {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &SMB2_TRANSFORM_PROTOCOL_ID[..],
            &self.signature,
            &self.nonce,
            &self.original_message_size.to_le_bytes(),
            &[0, 0],
            &TRANSFORM_FLAG_ENCRYPTED.to_le_bytes(),
            &self.session_id.to_le_bytes(),
        ]
        .concat()
    }
}
