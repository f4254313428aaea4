use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::impl_smb_for_primitive_enum;

#[repr(u32)]
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive, Clone, Copy, Default)]
pub enum SMBRWChannel {
    #[default]
    None = 0x0,
    RdmaV1 = 0x1,
    RdmaV1Invalidate = 0x2,
    RdmaTransform = 0x3,
}

impl_smb_for_primitive_enum! { SMBRWChannel => u32 }
