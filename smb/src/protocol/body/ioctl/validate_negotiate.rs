use serde::{Deserialize, Serialize};
use uuid::Uuid;

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::protocol::body::capabilities::{Capabilities, SecurityMode};
use crate::protocol::body::dialect::SMBDialect;

/// FSCTL_VALIDATE_NEGOTIATE_INFO input (MS-SMB2 2.2.31.4).
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ValidateNegotiateInfoRequest {
    pub capabilities: Capabilities,
    pub guid: Uuid,
    pub security_mode: SecurityMode,
    pub dialects: Vec<SMBDialect>,
}

impl ValidateNegotiateInfoRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = [
            &self.capabilities.bits().to_le_bytes()[..],
            &self.guid.to_bytes_le(),
            &self.security_mode.bits().to_le_bytes(),
            &(self.dialects.len() as u16).to_le_bytes(),
        ].concat();
        for dialect in &self.dialects {
            bytes.extend_from_slice(&u16::from(*dialect).to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(input: &[u8]) -> SMBResult<Self> {
        let mut cursor = SMBCursor::new(input);
        let capabilities = Capabilities::from_bits_truncate(cursor.u32()?);
        let guid = cursor.guid()?;
        let security_mode = SecurityMode::from_bits_truncate(cursor.u16()?);
        let count = cursor.u16()?;
        let dialects = (0..count)
            .map(|_| {
                SMBDialect::try_from(cursor.u16()?).map_err(|_| SMBError::parse_error("Unknown dialect"))
            })
            .collect::<SMBResult<Vec<_>>>()?;
        Ok(Self { capabilities, guid, security_mode, dialects })
    }
}

/// FSCTL_VALIDATE_NEGOTIATE_INFO output (MS-SMB2 2.2.32.6).
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ValidateNegotiateInfoResponse {
    pub capabilities: Capabilities,
    pub guid: Uuid,
    pub security_mode: SecurityMode,
    pub dialect: SMBDialect,
}

impl ValidateNegotiateInfoResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        [
            &self.capabilities.bits().to_le_bytes()[..],
            &self.guid.to_bytes_le(),
            &self.security_mode.bits().to_le_bytes(),
            &u16::from(self.dialect).to_le_bytes(),
        ].concat()
    }

    pub fn from_bytes(input: &[u8]) -> SMBResult<Self> {
        let mut cursor = SMBCursor::new(input);
        let capabilities = Capabilities::from_bits_truncate(cursor.u32()?);
        let guid = cursor.guid()?;
        let security_mode = SecurityMode::from_bits_truncate(cursor.u16()?);
        let dialect = SMBDialect::try_from(cursor.u16()?)
            .map_err(|_| SMBError::parse_error("Unknown dialect"))?;
        Ok(Self { capabilities, guid, security_mode, dialect })
    }
}
