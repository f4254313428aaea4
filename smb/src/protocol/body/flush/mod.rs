use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::body::create::SMBFileId;
use crate::protocol::body::empty::SMBEmpty;

const FLUSH_REQUEST_SIZE: u16 = 24;

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBFlushRequest {
    pub file_id: SMBFileId,
}

impl SMBByteSize for SMBFlushRequest {
    fn smb_byte_size(&self) -> usize {
        FLUSH_REQUEST_SIZE as usize
    }
}

impl SMBToBytes for SMBFlushRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [&FLUSH_REQUEST_SIZE.to_le_bytes()[..], &[0; 6], &self.file_id.smb_to_bytes()].concat()
    }
}

impl SMBFromBytes for SMBFlushRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(FLUSH_REQUEST_SIZE)?;
        cursor.skip(6)?;
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        Ok((cursor.remaining(), Self { file_id }))
    }
}

pub type SMBFlushResponse = SMBEmpty;
