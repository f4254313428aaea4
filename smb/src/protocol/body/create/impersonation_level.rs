use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::impl_smb_for_primitive_enum;

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Default)]
pub enum SMBImpersonationLevel {
    Anonymous = 0x0,
    Identification = 0x1,
    #[default]
    Impersonation = 0x2,
    Delegate = 0x3,
}

impl_smb_for_primitive_enum! { SMBImpersonationLevel => u32 }
