use serde::{Deserialize, Serialize};

use smb_core::cursor::{body_offset, SMBCursor};
use smb_core::nt_status::NTStatus;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBResult, SMBToBytes};

use crate::protocol::body::change_notify::{SMBChangeNotifyRequest, SMBChangeNotifyResponse};
use crate::protocol::body::close::{SMBCloseRequest, SMBCloseResponse};
use crate::protocol::body::create::{SMBCreateRequest, SMBCreateResponse};
use crate::protocol::body::empty::SMBEmpty;
use crate::protocol::body::error::SMBErrorResponse;
use crate::protocol::body::flush::SMBFlushRequest;
use crate::protocol::body::ioctl::{SMBIoCtlRequest, SMBIoCtlResponse};
use crate::protocol::body::negotiate::{SMBNegotiateRequest, SMBNegotiateResponse};
use crate::protocol::body::oplock_break::{SMBLeaseBreakAck, SMBLeaseBreakNotification, SMBOplockBreak};
use crate::protocol::body::query_info::{SMBQueryInfoRequest, SMBQueryInfoResponse};
use crate::protocol::body::read::{SMBReadRequest, SMBReadResponse};
use crate::protocol::body::session_setup::{SMBSessionSetupRequest, SMBSessionSetupResponse};
use crate::protocol::body::set_info::{SMBSetInfoRequest, SMBSetInfoResponse};
use crate::protocol::body::tree_connect::{SMBTreeConnectRequest, SMBTreeConnectResponse};
use crate::protocol::body::write::{SMBWriteRequest, SMBWriteResponse};
use crate::protocol::header::{SMBCommandCode, SMB2_HEADER_SIZE};

pub mod access_mask;
pub mod capabilities;
pub mod change_notify;
pub mod close;
pub mod create;
pub mod dialect;
pub mod empty;
pub mod error;
pub mod filetime;
pub mod flush;
pub mod ioctl;
pub mod negotiate;
pub mod oplock_break;
pub mod query_info;
pub mod read;
pub mod session_setup;
pub mod set_info;
pub mod tree_connect;
pub mod write;

pub type Capabilities = capabilities::Capabilities;
pub type SecurityMode = capabilities::SecurityMode;
pub type FileTime = filetime::FileTime;
pub type SMBDialect = dialect::SMBDialect;
pub type SMBAccessMask = access_mask::SMBAccessMask;

/// Reads a variable region described by a header-relative offset and a length.
pub(crate) fn read_buffer(cursor: &SMBCursor, offset: usize, length: usize) -> SMBResult<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    Ok(cursor.region(body_offset(offset, SMB2_HEADER_SIZE)?, length)?.to_vec())
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub enum SMBBody {
    NegotiateRequest(SMBNegotiateRequest),
    NegotiateResponse(SMBNegotiateResponse),
    SessionSetupRequest(SMBSessionSetupRequest),
    SessionSetupResponse(SMBSessionSetupResponse),
    LogoffRequest(SMBEmpty),
    LogoffResponse(SMBEmpty),
    TreeConnectRequest(SMBTreeConnectRequest),
    TreeConnectResponse(SMBTreeConnectResponse),
    TreeDisconnectRequest(SMBEmpty),
    TreeDisconnectResponse(SMBEmpty),
    CreateRequest(SMBCreateRequest),
    CreateResponse(SMBCreateResponse),
    CloseRequest(SMBCloseRequest),
    CloseResponse(SMBCloseResponse),
    FlushRequest(SMBFlushRequest),
    FlushResponse(SMBEmpty),
    ReadRequest(SMBReadRequest),
    ReadResponse(SMBReadResponse),
    WriteRequest(SMBWriteRequest),
    WriteResponse(SMBWriteResponse),
    IoCtlRequest(SMBIoCtlRequest),
    IoCtlResponse(SMBIoCtlResponse),
    CancelRequest(SMBEmpty),
    EchoRequest(SMBEmpty),
    EchoResponse(SMBEmpty),
    QueryInfoRequest(SMBQueryInfoRequest),
    QueryInfoResponse(SMBQueryInfoResponse),
    SetInfoRequest(SMBSetInfoRequest),
    SetInfoResponse(SMBSetInfoResponse),
    ChangeNotifyRequest(SMBChangeNotifyRequest),
    ChangeNotifyResponse(SMBChangeNotifyResponse),
    OplockBreak(SMBOplockBreak),
    LeaseBreakNotification(SMBLeaseBreakNotification),
    LeaseBreakAck(SMBLeaseBreakAck),
    ErrorResponse(SMBErrorResponse),
}

macro_rules! parse_into {
    ($variant: ident, $t: ty, $bytes: expr) => {{
        let (remaining, body) = <$t>::smb_from_bytes($bytes)?;
        Ok((remaining, SMBBody::$variant(body)))
    }};
}

/// Responses with these statuses still carry the command's own body.
fn status_has_command_body(command: SMBCommandCode, status: NTStatus) -> bool {
    match status {
        NTStatus::MoreProcessingRequired => command == SMBCommandCode::SessionSetup,
        NTStatus::StatusPending => false,
        NTStatus::BufferOverflow => matches!(command, SMBCommandCode::Read | SMBCommandCode::IOCTL | SMBCommandCode::QueryInfo | SMBCommandCode::ChangeNotify),
        NTStatus::NotifyEnumDir => false,
        status => !status.is_error(),
    }
}

impl SMBBody {
    /// Decodes a body given the command and direction taken from its header.
    pub fn parse_with_cc(bytes: &[u8], command: SMBCommandCode, is_response: bool, status: NTStatus) -> SMBParseResult<&[u8], Self> {
        if is_response && !status_has_command_body(command, status) {
            return parse_into!(ErrorResponse, SMBErrorResponse, bytes);
        }
        match (command, is_response) {
            (SMBCommandCode::Negotiate, false) => parse_into!(NegotiateRequest, SMBNegotiateRequest, bytes),
            (SMBCommandCode::Negotiate, true) => parse_into!(NegotiateResponse, SMBNegotiateResponse, bytes),
            (SMBCommandCode::SessionSetup, false) => parse_into!(SessionSetupRequest, SMBSessionSetupRequest, bytes),
            (SMBCommandCode::SessionSetup, true) => parse_into!(SessionSetupResponse, SMBSessionSetupResponse, bytes),
            (SMBCommandCode::LogOff, false) => parse_into!(LogoffRequest, SMBEmpty, bytes),
            (SMBCommandCode::LogOff, true) => parse_into!(LogoffResponse, SMBEmpty, bytes),
            (SMBCommandCode::TreeConnect, false) => parse_into!(TreeConnectRequest, SMBTreeConnectRequest, bytes),
            (SMBCommandCode::TreeConnect, true) => parse_into!(TreeConnectResponse, SMBTreeConnectResponse, bytes),
            (SMBCommandCode::TreeDisconnect, false) => parse_into!(TreeDisconnectRequest, SMBEmpty, bytes),
            (SMBCommandCode::TreeDisconnect, true) => parse_into!(TreeDisconnectResponse, SMBEmpty, bytes),
            (SMBCommandCode::Create, false) => parse_into!(CreateRequest, SMBCreateRequest, bytes),
            (SMBCommandCode::Create, true) => parse_into!(CreateResponse, SMBCreateResponse, bytes),
            (SMBCommandCode::Close, false) => parse_into!(CloseRequest, SMBCloseRequest, bytes),
            (SMBCommandCode::Close, true) => parse_into!(CloseResponse, SMBCloseResponse, bytes),
            (SMBCommandCode::Flush, false) => parse_into!(FlushRequest, SMBFlushRequest, bytes),
            (SMBCommandCode::Flush, true) => parse_into!(FlushResponse, SMBEmpty, bytes),
            (SMBCommandCode::Read, false) => parse_into!(ReadRequest, SMBReadRequest, bytes),
            (SMBCommandCode::Read, true) => parse_into!(ReadResponse, SMBReadResponse, bytes),
            (SMBCommandCode::Write, false) => parse_into!(WriteRequest, SMBWriteRequest, bytes),
            (SMBCommandCode::Write, true) => parse_into!(WriteResponse, SMBWriteResponse, bytes),
            (SMBCommandCode::IOCTL, false) => parse_into!(IoCtlRequest, SMBIoCtlRequest, bytes),
            (SMBCommandCode::IOCTL, true) => parse_into!(IoCtlResponse, SMBIoCtlResponse, bytes),
            (SMBCommandCode::Cancel, _) => parse_into!(CancelRequest, SMBEmpty, bytes),
            (SMBCommandCode::Echo, false) => parse_into!(EchoRequest, SMBEmpty, bytes),
            (SMBCommandCode::Echo, true) => parse_into!(EchoResponse, SMBEmpty, bytes),
            (SMBCommandCode::QueryInfo, false) => parse_into!(QueryInfoRequest, SMBQueryInfoRequest, bytes),
            (SMBCommandCode::QueryInfo, true) => parse_into!(QueryInfoResponse, SMBQueryInfoResponse, bytes),
            (SMBCommandCode::SetInfo, false) => parse_into!(SetInfoRequest, SMBSetInfoRequest, bytes),
            (SMBCommandCode::SetInfo, true) => parse_into!(SetInfoResponse, SMBSetInfoResponse, bytes),
            (SMBCommandCode::ChangeNotify, false) => parse_into!(ChangeNotifyRequest, SMBChangeNotifyRequest, bytes),
            (SMBCommandCode::ChangeNotify, true) => parse_into!(ChangeNotifyResponse, SMBChangeNotifyResponse, bytes),
            (SMBCommandCode::OplockBreak, _) => Self::parse_break(bytes),
            (SMBCommandCode::Lock | SMBCommandCode::QueryDirectory, _) => {
                Err(smb_core::error::SMBError::parse_error(format!("Unsupported command {:?}", command)))
            }
        }
    }

    /// The break command multiplexes oplock and lease bodies by structure size.
    fn parse_break(bytes: &[u8]) -> SMBParseResult<&[u8], Self> {
        let mut cursor = SMBCursor::new(bytes);
        match cursor.u16()? {
            24 => parse_into!(OplockBreak, SMBOplockBreak, bytes),
            44 => parse_into!(LeaseBreakNotification, SMBLeaseBreakNotification, bytes),
            _ => parse_into!(LeaseBreakAck, SMBLeaseBreakAck, bytes),
        }
    }

    /// Command this body belongs to; error bodies take theirs from the header.
    pub fn command_code(&self) -> Option<SMBCommandCode> {
        let command = match self {
            Self::NegotiateRequest(_) | Self::NegotiateResponse(_) => SMBCommandCode::Negotiate,
            Self::SessionSetupRequest(_) | Self::SessionSetupResponse(_) => SMBCommandCode::SessionSetup,
            Self::LogoffRequest(_) | Self::LogoffResponse(_) => SMBCommandCode::LogOff,
            Self::TreeConnectRequest(_) | Self::TreeConnectResponse(_) => SMBCommandCode::TreeConnect,
            Self::TreeDisconnectRequest(_) | Self::TreeDisconnectResponse(_) => SMBCommandCode::TreeDisconnect,
            Self::CreateRequest(_) | Self::CreateResponse(_) => SMBCommandCode::Create,
            Self::CloseRequest(_) | Self::CloseResponse(_) => SMBCommandCode::Close,
            Self::FlushRequest(_) | Self::FlushResponse(_) => SMBCommandCode::Flush,
            Self::ReadRequest(_) | Self::ReadResponse(_) => SMBCommandCode::Read,
            Self::WriteRequest(_) | Self::WriteResponse(_) => SMBCommandCode::Write,
            Self::IoCtlRequest(_) | Self::IoCtlResponse(_) => SMBCommandCode::IOCTL,
            Self::CancelRequest(_) => SMBCommandCode::Cancel,
            Self::EchoRequest(_) | Self::EchoResponse(_) => SMBCommandCode::Echo,
            Self::QueryInfoRequest(_) | Self::QueryInfoResponse(_) => SMBCommandCode::QueryInfo,
            Self::SetInfoRequest(_) | Self::SetInfoResponse(_) => SMBCommandCode::SetInfo,
            Self::ChangeNotifyRequest(_) | Self::ChangeNotifyResponse(_) => SMBCommandCode::ChangeNotify,
            Self::OplockBreak(_) | Self::LeaseBreakNotification(_) | Self::LeaseBreakAck(_) => SMBCommandCode::OplockBreak,
            Self::ErrorResponse(_) => return None,
        };
        Some(command)
    }

    /// Bytes of payload this request moves, used for the credit charge.
    pub fn payload_size(&self) -> usize {
        match self {
            Self::ReadRequest(x) => x.read_length as usize,
            Self::WriteRequest(x) => x.data.len(),
            Self::IoCtlRequest(x) => x.input.len().max(x.max_output_response as usize),
            Self::QueryInfoRequest(x) => x.output_buffer_length as usize,
            Self::ChangeNotifyRequest(x) => x.output_buffer_length as usize,
            Self::SetInfoRequest(x) => x.buffer.len(),
            _ => 0,
        }
    }
}

impl SMBByteSize for SMBBody {
    fn smb_byte_size(&self) -> usize {
        self.smb_to_bytes().len()
    }
}

impl SMBToBytes for SMBBody {
    fn smb_to_bytes(&self) -> Vec<u8> {
        match self {
            Self::NegotiateRequest(x) => x.smb_to_bytes(),
            Self::NegotiateResponse(x) => x.smb_to_bytes(),
            Self::SessionSetupRequest(x) => x.smb_to_bytes(),
            Self::SessionSetupResponse(x) => x.smb_to_bytes(),
            Self::LogoffRequest(x) | Self::LogoffResponse(x)
            | Self::TreeDisconnectRequest(x) | Self::TreeDisconnectResponse(x)
            | Self::FlushResponse(x) | Self::CancelRequest(x)
            | Self::EchoRequest(x) | Self::EchoResponse(x) => x.smb_to_bytes(),
            Self::TreeConnectRequest(x) => x.smb_to_bytes(),
            Self::TreeConnectResponse(x) => x.smb_to_bytes(),
            Self::CreateRequest(x) => x.smb_to_bytes(),
            Self::CreateResponse(x) => x.smb_to_bytes(),
            Self::CloseRequest(x) => x.smb_to_bytes(),
            Self::CloseResponse(x) => x.smb_to_bytes(),
            Self::FlushRequest(x) => x.smb_to_bytes(),
            Self::ReadRequest(x) => x.smb_to_bytes(),
            Self::ReadResponse(x) => x.smb_to_bytes(),
            Self::WriteRequest(x) => x.smb_to_bytes(),
            Self::WriteResponse(x) => x.smb_to_bytes(),
            Self::IoCtlRequest(x) => x.smb_to_bytes(),
            Self::IoCtlResponse(x) => x.smb_to_bytes(),
            Self::QueryInfoRequest(x) => x.smb_to_bytes(),
            Self::QueryInfoResponse(x) => x.smb_to_bytes(),
            Self::SetInfoRequest(x) => x.smb_to_bytes(),
            Self::SetInfoResponse(x) => x.smb_to_bytes(),
            Self::ChangeNotifyRequest(x) => x.smb_to_bytes(),
            Self::ChangeNotifyResponse(x) => x.smb_to_bytes(),
            Self::OplockBreak(x) => x.smb_to_bytes(),
            Self::LeaseBreakNotification(x) => x.smb_to_bytes(),
            Self::LeaseBreakAck(x) => x.smb_to_bytes(),
            Self::ErrorResponse(x) => x.smb_to_bytes(),
        }
    }
}
