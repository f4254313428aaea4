use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::impl_smb_for_primitive_enum;

#[repr(u32)]
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive, Copy, Clone)]
pub enum SMBCreateDisposition {
    Supersede = 0x0,
    Open = 0x1,
    Create = 0x2,
    OpenIf = 0x3,
    Overwrite = 0x4,
    OverwriteIf = 0x5,
}

impl_smb_for_primitive_enum! { SMBCreateDisposition => u32 }
