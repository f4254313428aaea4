use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

/// Server-issued two-part file identifier.
#[derive(Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Clone, Copy, Default)]
pub struct SMBFileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl SMBFileId {
    pub fn new(persistent: u64, volatile: u64) -> Self {
        Self { persistent, volatile }
    }
}

impl SMBByteSize for SMBFileId {
    fn smb_byte_size(&self) -> usize {
        16
    }
}

impl SMBFromBytes for SMBFileId {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        let persistent = cursor.u64()?;
        let volatile = cursor.u64()?;
        Ok((cursor.remaining(), Self { persistent, volatile }))
    }
}

impl SMBToBytes for SMBFileId {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [self.persistent.to_le_bytes(), self.volatile.to_le_bytes()].concat()
    }
}
