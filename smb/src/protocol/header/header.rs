use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::nt_status::NTStatus;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::header::{SMBCommandCode, SMBFlags};

pub const SMB2_PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];
pub const SMB2_HEADER_SIZE: usize = 64;
pub const SMB2_SIGNATURE_OFFSET: usize = 48;
/// Message id reserved for unsolicited server notifications (oplock/lease breaks).
pub const SMB2_UNSOLICITED_MESSAGE_ID: u64 = u64::MAX;

/// SMB2 packet header covering both the sync and async layouts.
///
/// Requests carry the channel sequence where responses carry the status; the
/// direction is taken from `SERVER_TO_REDIR`. Async headers replace the
/// reserved/tree-id pair with an 8-byte async id.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBSyncHeader {
    pub credit_charge: u16,
    pub status: NTStatus,
    pub channel_sequence: u16,
    pub command: SMBCommandCode,
    pub credits: u16,
    pub flags: SMBFlags,
    pub next_command: u32,
    pub message_id: u64,
    pub async_id: u64,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl SMBSyncHeader {
    pub fn new(
        command: SMBCommandCode,
        flags: SMBFlags,
        next_command: u32,
        message_id: u64,
        tree_id: u32,
        session_id: u64,
        signature: [u8; 16],
    ) -> Self {
        Self {
            credit_charge: 1,
            status: NTStatus::StatusSuccess,
            channel_sequence: 0,
            command,
            credits: 1,
            flags,
            next_command,
            message_id,
            async_id: 0,
            tree_id,
            session_id,
            signature,
        }
    }

    pub fn request(command: SMBCommandCode, message_id: u64, tree_id: u32, session_id: u64) -> Self {
        Self::new(command, SMBFlags::empty(), 0, message_id, tree_id, session_id, [0; 16])
    }

    /// Builds the header a server would answer `self` with.
    pub fn create_response_header(&self, status: NTStatus, credits: u16) -> Self {
        Self {
            credit_charge: self.credit_charge,
            status,
            channel_sequence: 0,
            command: self.command,
            credits,
            flags: SMBFlags::SERVER_TO_REDIR | (self.flags & SMBFlags::REPLAY_OPERATION),
            next_command: 0,
            message_id: self.message_id,
            async_id: 0,
            tree_id: self.tree_id,
            session_id: self.session_id,
            signature: [0; 16],
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags.is_response()
    }

    pub fn is_unsolicited(&self) -> bool {
        self.message_id == SMB2_UNSOLICITED_MESSAGE_ID
    }
}

impl SMBByteSize for SMBSyncHeader {
    fn smb_byte_size(&self) -> usize {
        SMB2_HEADER_SIZE
    }
}

impl SMBFromBytes for SMBSyncHeader {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        if cursor.array::<4>()? != SMB2_PROTOCOL_ID {
            return Err(SMBError::parse_error("Invalid SMB2 protocol id"));
        }
        cursor.structure_size(SMB2_HEADER_SIZE as u16)?;
        let credit_charge = cursor.u16()?;
        let raw_status = cursor.u32()?;
        let command = SMBCommandCode::try_from(cursor.u16()?)
            .map_err(|_| SMBError::parse_error("Unknown command code"))?;
        let credits = cursor.u16()?;
        let flags = SMBFlags::from_bits_truncate(cursor.u32()?);
        let next_command = cursor.u32()?;
        let message_id = cursor.u64()?;
        let (async_id, tree_id) = if flags.is_async() {
            (cursor.u64()?, 0)
        } else {
            cursor.skip(4)?;
            (0, cursor.u32()?)
        };
        let session_id = cursor.u64()?;
        let signature = cursor.array::<16>()?;
        let (status, channel_sequence) = if flags.is_response() {
            (NTStatus::from(raw_status), 0)
        } else {
            (NTStatus::StatusSuccess, raw_status as u16)
        };
        Ok((cursor.remaining(), Self {
            credit_charge,
            status,
            channel_sequence,
            command,
            credits,
            flags,
            next_command,
            message_id,
            async_id,
            tree_id,
            session_id,
            signature,
        }))
    }
}

impl SMBToBytes for SMBSyncHeader {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let status_field = if self.is_response() {
            u32::from(self.status)
        } else {
            self.channel_sequence as u32
        };
        let id_field = if self.flags.is_async() {
            self.async_id.to_le_bytes()
        } else {
            let mut ids = [0_u8; 8];
            ids[4..].copy_from_slice(&self.tree_id.to_le_bytes());
            ids
        };
        [
            &SMB2_PROTOCOL_ID[..],
            &(SMB2_HEADER_SIZE as u16).to_le_bytes(),
            &self.credit_charge.to_le_bytes(),
            &status_field.to_le_bytes(),
            &u16::from(self.command).to_le_bytes(),
            &self.credits.to_le_bytes(),
            &self.flags.bits().to_le_bytes(),
            &self.next_command.to_le_bytes(),
            &self.message_id.to_le_bytes(),
            &id_field,
            &self.session_id.to_le_bytes(),
            &self.signature,
        ]
        .concat()
    }
}
