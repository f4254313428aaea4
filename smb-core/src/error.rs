use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

use crate::nt_status::{errno, NTStatus};

#[derive(Debug)]
pub enum SMBError {
    ParseError(SMBParseError),
    CryptoError(SMBCryptoError),
    PreconditionFailed(SMBPreconditionFailedError),
    IOError(SMBIOError),
    ResponseError(SMBResponseError),
    PayloadTooSmall(SMBPayloadTooSmallError),
    AuthError(SMBAuthError),
    ConnectionLost(SMBConnectionLostError),
    NotConnected,
    Timeout(SMBTimeoutError),
    CreditsExhausted,
    PartialTransfer(SMBPartialTransferError),
}

impl SMBError {
    pub fn parse_error<T: Into<SMBParseError>>(error: T) -> Self {
        Self::ParseError(error.into())
    }

    pub fn crypto_error<T: Into<SMBCryptoError>>(error: T) -> Self {
        Self::CryptoError(error.into())
    }

    pub fn precondition_failed<T: Into<SMBPreconditionFailedError>>(error: T) -> Self {
        Self::PreconditionFailed(error.into())
    }

    pub fn io_error<T: Into<SMBIOError>>(error: T) -> Self {
        Self::IOError(error.into())
    }

    pub fn response_error<T: Into<String>>(error: T) -> Self {
        Self::ResponseError(SMBResponseError { status: None, message: error.into() })
    }

    pub fn status_error<T: Into<String>>(status: NTStatus, context: T) -> Self {
        Self::ResponseError(SMBResponseError { status: Some(status), message: context.into() })
    }

    pub fn payload_too_small<T: Into<usize>, U: Into<usize>>(expected: T, actual: U) -> Self {
        Self::PayloadTooSmall((expected, actual).into())
    }

    pub fn auth_error<T: Into<SMBAuthError>>(error: T) -> Self {
        Self::AuthError(error.into())
    }

    pub fn connection_lost<T: Into<SMBConnectionLostError>>(reason: T) -> Self {
        Self::ConnectionLost(reason.into())
    }

    pub fn timeout<T: Into<SMBTimeoutError>>(operation: T) -> Self {
        Self::Timeout(operation.into())
    }

    pub fn partial_transfer(transferred: u64, source: SMBError) -> Self {
        Self::PartialTransfer(SMBPartialTransferError { transferred, source: Box::new(source) })
    }

    /// Raw protocol status carried by this error, if the server produced one.
    pub fn status(&self) -> Option<NTStatus> {
        match self {
            Self::ResponseError(x) => x.status,
            Self::PartialTransfer(x) => x.source.status(),
            _ => None,
        }
    }

    /// Faults that the reconnect path may recover from.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::ConnectionLost(_) | Self::IOError(_) | Self::Timeout(_) => true,
            Self::ResponseError(x) => x.status.is_some_and(|s| s.is_session_loss()),
            _ => false,
        }
    }

    /// POSIX errno surfaced to callers above the protocol engine.
    pub fn errno(&self) -> i32 {
        match self {
            Self::ParseError(_) | Self::PayloadTooSmall(_) => errno::EBADRPC,
            Self::CryptoError(_) => errno::EAUTH,
            Self::PreconditionFailed(_) => errno::EINVAL,
            Self::IOError(_) => errno::EIO,
            Self::ResponseError(x) => x.status.map(|s| s.errno()).unwrap_or(errno::EIO),
            Self::AuthError(_) => errno::EAUTH,
            Self::ConnectionLost(_) => errno::ENOTCONN,
            Self::NotConnected => errno::ENOTCONN,
            Self::Timeout(_) => errno::ETIMEDOUT,
            Self::CreditsExhausted => errno::EAGAIN,
            Self::PartialTransfer(x) => x.source.errno(),
        }
    }
}

impl From<io::Error> for SMBError {
    fn from(value: io::Error) -> Self {
        Self::io_error(value)
    }
}

#[derive(Debug)]
pub struct SMBParseError {
    error: Box<dyn Error + Send + Sync>,
}

impl<T: Into<Box<dyn Error + Send + Sync>>> From<T> for SMBParseError {
    fn from(value: T) -> Self {
        Self {
            error: value.into()
        }
    }
}

impl Display for SMBParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse failed with error: {}", self.error)
    }
}

#[derive(Debug)]
pub struct SMBCryptoError {
    message: String,
}

impl<T: Into<String>> From<T> for SMBCryptoError {
    fn from(value: T) -> Self {
        Self {
            message: value.into()
        }
    }
}

impl Display for SMBCryptoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Crypto operation failed with error: {}", self.message)
    }
}

#[derive(Debug)]
pub struct SMBPreconditionFailedError {
    message: String,
}

impl<T: Into<String>> From<T> for SMBPreconditionFailedError {
    fn from(value: T) -> Self {
        Self {
            message: value.into()
        }
    }
}

impl Display for SMBPreconditionFailedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation failed with unmet precondition: {}", self.message)
    }
}

#[derive(Debug)]
pub struct SMBIOError {
    error: io::Error,
}

impl<T: Into<io::Error>> From<T> for SMBIOError {
    fn from(value: T) -> Self {
        Self {
            error: value.into()
        }
    }
}

impl Display for SMBIOError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SMB I/O operation failed with error: {}", self.error)
    }
}

#[derive(Debug)]
pub struct SMBResponseError {
    status: Option<NTStatus>,
    message: String,
}

impl SMBResponseError {
    pub fn status(&self) -> Option<NTStatus> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for SMBResponseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} failed with status {:?} ({:#010x})", self.message, status, u32::from(status)),
            None => write!(f, "SMB response rejected: {}", self.message),
        }
    }
}

#[derive(Debug)]
pub struct SMBPayloadTooSmallError {
    expected: usize,
    actual: usize,
}

impl<T: Into<usize>, U: Into<usize>> From<(T, U)> for SMBPayloadTooSmallError {
    fn from(value: (T, U)) -> Self {
        Self {
            expected: value.0.into(),
            actual: value.1.into(),
        }
    }
}

impl Display for SMBPayloadTooSmallError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Expected {} bytes, was actually {} bytes", self.expected, self.actual)
    }
}

#[derive(Debug)]
pub struct SMBAuthError {
    message: String,
}

impl<T: Into<String>> From<T> for SMBAuthError {
    fn from(value: T) -> Self {
        Self {
            message: value.into()
        }
    }
}

impl Display for SMBAuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Authorization failed: {}", self.message)
    }
}

#[derive(Debug)]
pub struct SMBConnectionLostError {
    reason: String,
}

impl<T: Into<String>> From<T> for SMBConnectionLostError {
    fn from(value: T) -> Self {
        Self {
            reason: value.into()
        }
    }
}

impl Display for SMBConnectionLostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection lost: {}", self.reason)
    }
}

#[derive(Debug)]
pub struct SMBTimeoutError {
    operation: String,
}

impl<T: Into<String>> From<T> for SMBTimeoutError {
    fn from(value: T) -> Self {
        Self {
            operation: value.into()
        }
    }
}

impl Display for SMBTimeoutError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Timed out waiting for {}", self.operation)
    }
}

#[derive(Debug)]
pub struct SMBPartialTransferError {
    transferred: u64,
    source: Box<SMBError>,
}

impl SMBPartialTransferError {
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn source_error(&self) -> &SMBError {
        &self.source
    }
}

impl Display for SMBPartialTransferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transfer stopped after {} bytes: {}", self.transferred, self.source)
    }
}

impl Display for SMBError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseError(x) => write!(f, "{}", x),
            Self::CryptoError(x) => write!(f, "{}", x),
            Self::PreconditionFailed(x) => write!(f, "{}", x),
            Self::IOError(x) => write!(f, "{}", x),
            Self::ResponseError(x) => write!(f, "{}", x),
            Self::PayloadTooSmall(x) => write!(f, "{}", x),
            Self::AuthError(x) => write!(f, "{}", x),
            Self::ConnectionLost(x) => write!(f, "{}", x),
            Self::NotConnected => write!(f, "Not connected"),
            Self::Timeout(x) => write!(f, "{}", x),
            Self::CreditsExhausted => write!(f, "No credits available for a non-blocking request"),
            Self::PartialTransfer(x) => write!(f, "{}", x),
        }
    }
}

impl std::error::Error for SMBError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_map_through_errno_table() {
        let err = SMBError::status_error(NTStatus::AccessDenied, "Create");
        assert_eq!(err.status(), Some(NTStatus::AccessDenied));
        assert_eq!(err.errno(), errno::EACCES);
        assert!(!err.is_transport());
    }

    #[test]
    fn partial_transfer_keeps_source_status() {
        let err = SMBError::partial_transfer(4096, SMBError::status_error(NTStatus::DiskFull, "Write"));
        assert_eq!(err.errno(), errno::ENOSPC);
        match err {
            SMBError::PartialTransfer(x) => assert_eq!(x.transferred(), 4096),
            _ => panic!("expected partial transfer"),
        }
    }

    #[test]
    fn transport_faults_are_recoverable() {
        assert!(SMBError::connection_lost("reset").is_transport());
        assert!(SMBError::status_error(NTStatus::NetworkSessionExpired, "Read").is_transport());
        assert!(!SMBError::parse_error("bad").is_transport());
        assert_eq!(SMBError::NotConnected.errno(), errno::ENOTCONN);
    }
}
