pub mod command_code;
pub mod flags;
mod header;
pub mod transform;

pub type SMBCommandCode = command_code::SMBCommandCode;
pub type SMBSyncHeader = header::SMBSyncHeader;
pub type SMBFlags = flags::SMBFlags;
pub type SMBTransformHeader = transform::SMBTransformHeader;

pub use header::{SMB2_HEADER_SIZE, SMB2_PROTOCOL_ID, SMB2_SIGNATURE_OFFSET, SMB2_UNSOLICITED_MESSAGE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SMBSender {
    Client,
    Server,
}
