use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};

use crate::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

#[repr(u32)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, IntoPrimitive, Copy)]
pub enum NTStatus {
    StatusSuccess = 0x0,
    StatusPending = 0x00000103,
    NotifyEnumDir = 0x0000010C,
    SecIContinueNeeded = 0x00090312,
    BufferOverflow = 0x80000005,
    NoMoreFiles = 0x80000006,
    Unsuccessful = 0xC0000001,
    NotImplemented = 0xC0000002,
    InvalidHandle = 0xC0000008,
    InvalidParameter = 0xC000000D,
    NoSuchFile = 0xC000000F,
    InvalidDeviceRequest = 0xC0000010,
    EndOfFile = 0xC0000011,
    MoreProcessingRequired = 0xC0000016,
    AccessDenied = 0xC0000022,
    BufferTooSmall = 0xC0000023,
    ObjectNameInvalid = 0xC0000033,
    ObjectNameNotFound = 0xC0000034,
    ObjectNameCollision = 0xC0000035,
    ObjectPathNotFound = 0xC000003A,
    SharingViolation = 0xC0000043,
    DeletePending = 0xC0000056,
    PrivilegeNotHeld = 0xC0000061,
    StatusLogonFailure = 0xC000006D,
    AccountRestriction = 0xC000006E,
    PasswordExpired = 0xC0000071,
    InsufficientResources = 0xC000009A,
    FileIsADirectory = 0xC00000BA,
    StatusNotSupported = 0xC00000BB,
    NetworkNameDeleted = 0xC00000C9,
    BadNetworkName = 0xC00000CC,
    RequestNotAccepted = 0xC00000D0,
    DirectoryNotEmpty = 0xC0000101,
    NotADirectory = 0xC0000103,
    Cancelled = 0xC0000120,
    FileClosed = 0xC0000128,
    UserSessionDeleted = 0xC0000203,
    NetworkSessionExpired = 0xC000035C,
    DiskFull = 0xC000007F,
    FileTooLarge = 0xC0000904,
    ObjectNameExists = 0x40000000,
    PathNotCovered = 0xC0000257,
    NotFound = 0xC0000225,
    IOTimeout = 0xC00000B5,
    PipeBroken = 0xC000014B,
    PipeDisconnected = 0xC00000B0,
    InvalidNetworkResponse = 0xC00000C3,
    NetworkAccessDenied = 0xC00000CA,
    FileNotAvailable = 0xC0000467,
    SMBBadClusterDialect = 0xC05D0001,
    #[num_enum(catch_all)]
    Unknown(u32),
}

impl NTStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::StatusSuccess)
    }

    /// Warning-class codes still carry a usable payload.
    pub fn is_error(&self) -> bool {
        (u32::from(*self) >> 30) == 0b11
    }

    /// Statuses after which the session is gone and the reconnect path takes over.
    pub fn is_session_loss(&self) -> bool {
        matches!(self, Self::NetworkSessionExpired | Self::UserSessionDeleted | Self::NetworkNameDeleted)
    }

    pub fn errno(&self) -> i32 {
        match self {
            Self::StatusSuccess | Self::StatusPending | Self::BufferOverflow => 0,
            Self::NoMoreFiles | Self::NoSuchFile | Self::ObjectNameNotFound
            | Self::ObjectPathNotFound | Self::NotFound | Self::DeletePending => errno::ENOENT,
            Self::EndOfFile => 0,
            Self::AccessDenied | Self::PrivilegeNotHeld | Self::NetworkAccessDenied => errno::EACCES,
            Self::SharingViolation | Self::FileNotAvailable => errno::EBUSY,
            Self::ObjectNameCollision | Self::ObjectNameExists => errno::EEXIST,
            Self::ObjectNameInvalid => errno::EINVAL,
            Self::InvalidParameter | Self::InvalidDeviceRequest => errno::EINVAL,
            Self::InvalidHandle | Self::FileClosed => errno::EBADF,
            Self::BufferTooSmall => errno::ERANGE,
            Self::StatusLogonFailure | Self::AccountRestriction | Self::PasswordExpired
            | Self::MoreProcessingRequired | Self::SecIContinueNeeded => errno::EAUTH,
            Self::InsufficientResources => errno::ENOMEM,
            Self::FileIsADirectory => errno::EISDIR,
            Self::NotADirectory => errno::ENOTDIR,
            Self::DirectoryNotEmpty => errno::ENOTEMPTY,
            Self::StatusNotSupported | Self::NotImplemented => errno::ENOTSUP,
            Self::BadNetworkName | Self::PathNotCovered => errno::ENOENT,
            Self::NetworkNameDeleted | Self::UserSessionDeleted | Self::NetworkSessionExpired
            | Self::RequestNotAccepted | Self::SMBBadClusterDialect => errno::ENOTCONN,
            Self::Cancelled => errno::EINTR,
            Self::DiskFull => errno::ENOSPC,
            Self::FileTooLarge => errno::EFBIG,
            Self::IOTimeout => errno::ETIMEDOUT,
            Self::PipeBroken | Self::PipeDisconnected => errno::EPIPE,
            Self::InvalidNetworkResponse => errno::EBADRPC,
            Self::NotifyEnumDir => 0,
            Self::Unsuccessful | Self::Unknown(_) => errno::EIO,
        }
    }
}

impl SMBByteSize for NTStatus {
    fn smb_byte_size(&self) -> usize {
        std::mem::size_of::<u32>()
    }
}

impl SMBFromBytes for NTStatus {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let (remaining, underlying) = u32::smb_from_bytes(input)?;
        Ok((remaining, Self::from_primitive(underlying)))
    }
}

impl SMBToBytes for NTStatus {
    fn smb_to_bytes(&self) -> Vec<u8> {
        u32::from(*self).smb_to_bytes()
    }
}

/// POSIX error numbers (BSD numbering, as used by SMB client stacks).
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const EFBIG: i32 = 27;
    pub const ENOSPC: i32 = 28;
    pub const EPIPE: i32 = 32;
    pub const ERANGE: i32 = 34;
    pub const EAGAIN: i32 = 35;
    pub const ENOTSUP: i32 = 45;
    pub const ENOTCONN: i32 = 57;
    pub const ETIMEDOUT: i32 = 60;
    pub const ENOTEMPTY: i32 = 66;
    pub const EBADRPC: i32 = 72;
    pub const EAUTH: i32 = 80;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_survive_round_trip() {
        let (_, status) = NTStatus::smb_from_bytes(&0xC0001234_u32.to_le_bytes()).unwrap();
        assert_eq!(status, NTStatus::Unknown(0xC0001234));
        assert_eq!(status.smb_to_bytes(), 0xC0001234_u32.to_le_bytes().to_vec());
        assert_eq!(status.errno(), errno::EIO);
    }

    #[test]
    fn known_codes_decode() {
        assert_eq!(NTStatus::from(0xC0000016_u32), NTStatus::MoreProcessingRequired);
        assert_eq!(NTStatus::from(0x103_u32), NTStatus::StatusPending);
        assert_eq!(u32::from(NTStatus::SMBBadClusterDialect), 0xC05D0001);
    }

    #[test]
    fn severity_classification() {
        assert!(NTStatus::AccessDenied.is_error());
        assert!(!NTStatus::BufferOverflow.is_error());
        assert!(!NTStatus::StatusPending.is_error());
    }

    #[test]
    fn errno_table_covers_common_faults() {
        assert_eq!(NTStatus::ObjectNameNotFound.errno(), errno::ENOENT);
        assert_eq!(NTStatus::SharingViolation.errno(), errno::EBUSY);
        assert_eq!(NTStatus::AccessDenied.errno(), errno::EACCES);
        assert_eq!(NTStatus::NetworkSessionExpired.errno(), errno::ENOTCONN);
    }
}
