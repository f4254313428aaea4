use serde::{Deserialize, Serialize};

use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::protocol::body::SMBBody;
use crate::protocol::header::{SMBCommandCode, SMBFlags, SMBSyncHeader};

/// One SMB2 message: the 64-byte header and the body it describes.
///
/// Framing (the 4-byte direct-TCP length) is applied by the socket layer, so
/// [`as_bytes`](SMBMessage::as_bytes) yields exactly the bytes that are signed,
/// sealed and fed to the pre-auth hash.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBMessage {
    pub header: SMBSyncHeader,
    pub body: SMBBody,
}

impl SMBMessage {
    pub fn new(header: SMBSyncHeader, body: SMBBody) -> Self {
        SMBMessage {
            header,
            body,
        }
    }

    /// Builds a request whose header command is taken from the body.
    pub fn request(body: SMBBody, session_id: u64, tree_id: u32) -> Self {
        let command = body.command_code().unwrap_or(SMBCommandCode::Echo);
        Self::new(SMBSyncHeader::request(command, 0, tree_id, session_id), body)
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        [self.header.smb_to_bytes(), self.body.smb_to_bytes()].concat()
    }

    pub fn parse(bytes: &[u8]) -> SMBParseResult<&[u8], Self> {
        let (remaining, header) = SMBSyncHeader::smb_from_bytes(bytes)?;
        let (remaining, body) = SMBBody::parse_with_cc(remaining, header.command, header.is_response(), header.status)?;
        Ok((remaining, Self { header, body }))
    }

    pub fn is_signed(&self) -> bool {
        self.header.flags.contains(SMBFlags::SIGNED)
    }
}

impl SMBByteSize for SMBMessage {
    fn smb_byte_size(&self) -> usize {
        self.header.smb_byte_size() + self.body.smb_byte_size()
    }
}
