use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_for_primitive_enum, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

bitflags! {
    #[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct SMBTreeConnectFlags: u16 {
        const CLUSTER_RECONNECT    = 0b1;
        const REDIRECT_TO_OWNER    = 0b10;
        const EXTENSION_PRESENT    = 0b100;
    }
}

bitflags! {
    #[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Copy, Clone, Default)]
    pub struct SMBShareFlags: u32 {
        const DFS                         = 0x000001;
        const DFS_ROOT                    = 0x000002;
        const AUTO_CACHING                = 0x000010;
        const VDO_CACHING                 = 0x000020;
        const NO_CACHING                  = 0x000030;
        const RESTRICT_EXCLUSIVE_OPENS    = 0x000100;
        const FORCE_SHARED_DELETE         = 0x000200;
        const ALLOW_NAMESPACE_CACHING     = 0x000400;
        const ACCESS_BASED_DIRECTORY_ENUM = 0x000800;
        const FORCE_LEVEL_II_OPLOCK       = 0x001000;
        const ENABLE_HASH_V1              = 0x002000;
        const ENABLE_HASH_V2              = 0x004000;
        const ENCRYPT_DATA                = 0x008000;
        const IDENTITY_REMOTING           = 0x040000;
        const COMPRESS_DATA               = 0x100000;
        const ISOLATED_TRANSPORT          = 0x200000;
    }
}

bitflags! {
    #[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Default)]
    pub struct SMBTreeCapabilities: u32 {
        const DFS                     = 0x008;
        const CONTINUOUS_AVAILABILITY = 0x010;
        const SCALEOUT                = 0x020;
        const CLUSTER                 = 0x040;
        const ASYMMETRIC              = 0x080;
        const REDIRECT_TO_OWNER       = 0x100;
    }
}

#[repr(u8)]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Copy, Clone)]
pub enum SMBShareType {
    Disk = 0x01,
    Pipe = 0x02,
    Print = 0x03,
}

impl_smb_byte_size_for_bitflag! { SMBTreeConnectFlags, SMBShareFlags, SMBTreeCapabilities }
impl_smb_from_bytes_for_bitflag! { SMBTreeConnectFlags, SMBShareFlags, SMBTreeCapabilities }
impl_smb_to_bytes_for_bitflag! { SMBTreeConnectFlags, SMBShareFlags, SMBTreeCapabilities }
impl_smb_for_primitive_enum! { SMBShareType => u8 }
