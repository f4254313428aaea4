use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

bitflags! {
    /// File, pipe, printer and directory access rights share one bit layout.
    #[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Hash)]
    pub struct SMBAccessMask: u32 {
        const FILE_READ_DATA         = 0x00000001;
        const FILE_WRITE_DATA        = 0x00000002;
        const FILE_APPEND_DATA       = 0x00000004;
        const FILE_READ_EA           = 0x00000008;
        const FILE_WRITE_EA          = 0x00000010;
        const FILE_EXECUTE           = 0x00000020;
        const FILE_DELETE_CHILD      = 0x00000040;
        const FILE_READ_ATTRIBUTES   = 0x00000080;
        const FILE_WRITE_ATTRIBUTES  = 0x00000100;
        const DELETE                 = 0x00010000;
        const READ_CONTROL           = 0x00020000;
        const WRITE_DAC              = 0x00040000;
        const WRITE_OWNER            = 0x00080000;
        const SYNCHRONIZE            = 0x00100000;
        const ACCESS_SYSTEM_SECURITY = 0x01000000;
        const MAXIMUM_ALLOWED        = 0x02000000;
        const GENERIC_ALL            = 0x10000000;
        const GENERIC_EXECUTE        = 0x20000000;
        const GENERIC_WRITE          = 0x40000000;
        const GENERIC_READ           = 0x80000000;
    }
}

impl SMBAccessMask {
    /// Granted when the server does not answer a maximal-access query.
    pub fn permissive() -> Self {
        Self::FILE_READ_DATA | Self::FILE_WRITE_DATA | Self::FILE_APPEND_DATA
            | Self::FILE_READ_EA | Self::FILE_WRITE_EA | Self::FILE_EXECUTE
            | Self::FILE_DELETE_CHILD | Self::FILE_READ_ATTRIBUTES | Self::FILE_WRITE_ATTRIBUTES
            | Self::DELETE | Self::READ_CONTROL | Self::WRITE_DAC | Self::WRITE_OWNER | Self::SYNCHRONIZE
    }

    pub fn generic_read() -> Self {
        Self::FILE_READ_DATA | Self::FILE_READ_EA | Self::FILE_READ_ATTRIBUTES | Self::READ_CONTROL | Self::SYNCHRONIZE
    }

    pub fn generic_write() -> Self {
        Self::FILE_WRITE_DATA | Self::FILE_APPEND_DATA | Self::FILE_WRITE_EA | Self::FILE_WRITE_ATTRIBUTES | Self::SYNCHRONIZE
    }

    pub fn allows_write(&self) -> bool {
        self.intersects(Self::FILE_WRITE_DATA | Self::FILE_APPEND_DATA | Self::GENERIC_WRITE | Self::GENERIC_ALL)
    }
}

impl_smb_byte_size_for_bitflag! { SMBAccessMask }
impl_smb_from_bytes_for_bitflag! { SMBAccessMask }
impl_smb_to_bytes_for_bitflag! { SMBAccessMask }
