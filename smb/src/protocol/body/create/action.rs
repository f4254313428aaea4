use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::impl_smb_for_primitive_enum;

#[repr(u32)]
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive, Copy, Clone)]
pub enum SMBCreateAction {
    Superseded = 0x0,
    Opened = 0x1,
    Created = 0x2,
    Overwritten = 0x3,
}

impl_smb_for_primitive_enum! { SMBCreateAction => u32 }
