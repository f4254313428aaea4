use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

const EMPTY_STRUCTURE_SIZE: u16 = 4;

/// Body shared by echo, logoff, tree disconnect and cancel: a structure size and two reserved bytes.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct SMBEmpty;

impl SMBByteSize for SMBEmpty {
    fn smb_byte_size(&self) -> usize {
        EMPTY_STRUCTURE_SIZE as usize
    }
}

impl SMBFromBytes for SMBEmpty {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(EMPTY_STRUCTURE_SIZE)?;
        cursor.skip(2)?;
        Ok((cursor.remaining(), Self))
    }
}

impl SMBToBytes for SMBEmpty {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [&EMPTY_STRUCTURE_SIZE.to_le_bytes()[..], &[0, 0]].concat()
    }
}
