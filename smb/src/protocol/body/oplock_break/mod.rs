use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::body::create::{SMBFileId, SMBLeaseKey, SMBLeaseState, SMBOplockLevel};
use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

const OPLOCK_BREAK_SIZE: u16 = 24;
const LEASE_BREAK_NOTIFICATION_SIZE: u16 = 44;
const LEASE_BREAK_ACK_SIZE: u16 = 36;

bitflags! {
    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
    pub struct SMBLeaseBreakFlags: u32 {
        const ACK_REQUIRED = 0x01;
    }
}

impl_smb_byte_size_for_bitflag! { SMBLeaseBreakFlags }
impl_smb_to_bytes_for_bitflag! { SMBLeaseBreakFlags }
impl_smb_from_bytes_for_bitflag! { SMBLeaseBreakFlags }

/// Oplock break notification, acknowledgment and response share one 24-byte layout.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy)]
pub struct SMBOplockBreak {
    pub level: SMBOplockLevel,
    pub file_id: SMBFileId,
}

impl SMBByteSize for SMBOplockBreak {
    fn smb_byte_size(&self) -> usize {
        OPLOCK_BREAK_SIZE as usize
    }
}

impl SMBToBytes for SMBOplockBreak {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &OPLOCK_BREAK_SIZE.to_le_bytes()[..],
            &[u8::from(self.level), 0],
            &[0; 4],
            &self.file_id.smb_to_bytes(),
        ].concat()
    }
}

impl SMBFromBytes for SMBOplockBreak {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(OPLOCK_BREAK_SIZE)?;
        let level = SMBOplockLevel::try_from(cursor.u8()?)
            .map_err(|_| SMBError::parse_error("Invalid oplock level"))?;
        cursor.skip(5)?;
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        Ok((cursor.remaining(), Self { level, file_id }))
    }
}

/// Server-initiated lease break (MS-SMB2 2.2.23.2).
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBLeaseBreakNotification {
    pub new_epoch: u16,
    pub flags: SMBLeaseBreakFlags,
    pub lease_key: SMBLeaseKey,
    pub current_lease_state: SMBLeaseState,
    pub new_lease_state: SMBLeaseState,
}

impl SMBLeaseBreakNotification {
    pub fn ack_required(&self) -> bool {
        self.flags.contains(SMBLeaseBreakFlags::ACK_REQUIRED)
    }
}

impl SMBByteSize for SMBLeaseBreakNotification {
    fn smb_byte_size(&self) -> usize {
        LEASE_BREAK_NOTIFICATION_SIZE as usize
    }
}

impl SMBToBytes for SMBLeaseBreakNotification {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &LEASE_BREAK_NOTIFICATION_SIZE.to_le_bytes()[..],
            &self.new_epoch.to_le_bytes(),
            &self.flags.smb_to_bytes(),
            &self.lease_key,
            &self.current_lease_state.smb_to_bytes(),
            &self.new_lease_state.smb_to_bytes(),
            &[0; 12],
        ].concat()
    }
}

impl SMBFromBytes for SMBLeaseBreakNotification {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(LEASE_BREAK_NOTIFICATION_SIZE)?;
        let new_epoch = cursor.u16()?;
        let flags = SMBLeaseBreakFlags::from_bits_truncate(cursor.u32()?);
        let lease_key = cursor.array::<16>()?;
        let current_lease_state = SMBLeaseState::from_bits_truncate(cursor.u32()?);
        let new_lease_state = SMBLeaseState::from_bits_truncate(cursor.u32()?);
        // break reason, access mask hint, share mask hint
        cursor.skip(12)?;
        Ok((cursor.remaining(), Self { new_epoch, flags, lease_key, current_lease_state, new_lease_state }))
    }
}

/// Lease break acknowledgment and its response (MS-SMB2 2.2.24.2 / 2.2.25.2).
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBLeaseBreakAck {
    pub lease_key: SMBLeaseKey,
    pub lease_state: SMBLeaseState,
}

impl SMBLeaseBreakAck {
    pub fn new(lease_key: SMBLeaseKey, lease_state: SMBLeaseState) -> Self {
        Self { lease_key, lease_state }
    }
}

impl SMBByteSize for SMBLeaseBreakAck {
    fn smb_byte_size(&self) -> usize {
        LEASE_BREAK_ACK_SIZE as usize
    }
}

impl SMBToBytes for SMBLeaseBreakAck {
    fn smb_to_bytes(&self) -> Vec<u8> {
        [
            &LEASE_BREAK_ACK_SIZE.to_le_bytes()[..],
            &[0; 2],
            &[0; 4],
            &self.lease_key,
            &self.lease_state.smb_to_bytes(),
            &[0; 8],
        ].concat()
    }
}

impl SMBFromBytes for SMBLeaseBreakAck {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(LEASE_BREAK_ACK_SIZE)?;
        cursor.skip(6)?;
        let lease_key = cursor.array::<16>()?;
        let lease_state = SMBLeaseState::from_bits_truncate(cursor.u32()?);
        cursor.skip(8)?;
        Ok((cursor.remaining(), Self { lease_key, lease_state }))
    }
}
