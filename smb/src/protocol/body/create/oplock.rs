use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::impl_smb_for_primitive_enum;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Default)]
pub enum SMBOplockLevel {
    #[default]
    None = 0x0,
    II = 0x1,
    Exclusive = 0x8,
    Batch = 0x9,
    Lease = 0xFF,
}

impl_smb_for_primitive_enum! { SMBOplockLevel => u8 }
