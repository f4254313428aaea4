use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::impl_smb_for_primitive_enum;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive, Default)]
pub enum SMBIoCtlRequestFlags {
    IOCTL = 0x0,
    #[default]
    FSCTL = 0x1,
}

impl_smb_for_primitive_enum! { SMBIoCtlRequestFlags => u32 }
