use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

const ERROR_RESPONSE_SIZE: u16 = 9;

/// SMB2 ERROR response (MS-SMB2 2.2.2). The status itself travels in the header.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Default)]
pub struct SMBErrorResponse {
    pub error_context_count: u8,
    pub error_data: Vec<u8>,
}

impl SMBByteSize for SMBErrorResponse {
    fn smb_byte_size(&self) -> usize {
        8 + self.error_data.len().max(1)
    }
}

impl SMBToBytes for SMBErrorResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let mut bytes = [
            &ERROR_RESPONSE_SIZE.to_le_bytes()[..],
            &[self.error_context_count, 0],
            &(self.error_data.len() as u32).to_le_bytes(),
            &self.error_data,
        ].concat();
        if self.error_data.is_empty() {
            bytes.push(0);
        }
        bytes
    }
}

impl SMBFromBytes for SMBErrorResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(ERROR_RESPONSE_SIZE)?;
        let error_context_count = cursor.u8()?;
        cursor.skip(1)?;
        let byte_count = cursor.u32()? as usize;
        let error_data = cursor.take(byte_count)?.to_vec();
        Ok((cursor.remaining(), Self { error_context_count, error_data }))
    }
}
