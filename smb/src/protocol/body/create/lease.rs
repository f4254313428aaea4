use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

pub type SMBLeaseKey = [u8; 16];

bitflags! {
    #[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone, Copy, Default, Hash)]
    pub struct SMBLeaseState: u32 {
        const READ_CACHING = 0x1;
        const HANDLE_CACHING = 0x2;
        const WRITE_CACHING = 0x4;
    }
}

bitflags! {
    #[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone, Copy, Default)]
    pub struct SMBLeaseFlags: u32 {
        const BREAK_IN_PROGRESS = 0x2;
        const PARENT_LEASE_KEY_SET = 0x4;
    }
}

impl SMBLeaseState {
    pub fn read_handle() -> Self {
        Self::READ_CACHING | Self::HANDLE_CACHING
    }

    pub fn full() -> Self {
        Self::READ_CACHING | Self::HANDLE_CACHING | Self::WRITE_CACHING
    }
}

impl_smb_byte_size_for_bitflag! { SMBLeaseState, SMBLeaseFlags }
impl_smb_from_bytes_for_bitflag! { SMBLeaseState, SMBLeaseFlags }
impl_smb_to_bytes_for_bitflag! { SMBLeaseState, SMBLeaseFlags }
