use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::impl_smb_for_primitive_enum;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
pub enum SMBInfoType {
    File = 1,
    FileSystem = 2,
    Security = 3,
    Quota = 4,
}

impl_smb_for_primitive_enum! { SMBInfoType => u8 }

/// FILE_INFORMATION_CLASS values used with `SMBInfoType::File`.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, IntoPrimitive, Serialize, Deserialize)]
pub enum SMBFileInfoClass {
    Basic = 4,
    Standard = 5,
    Internal = 6,
    Ea = 7,
    Access = 8,
    Rename = 10,
    Disposition = 13,
    Position = 14,
    FullEa = 15,
    Mode = 16,
    Alignment = 17,
    All = 18,
    Allocation = 19,
    EndOfFile = 20,
    Stream = 22,
    NetworkOpen = 34,
    DispositionEx = 64,
    #[num_enum(catch_all)]
    Other(u8),
}
