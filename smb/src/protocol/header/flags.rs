use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
    pub struct SMBFlags: u32 {
        const SERVER_TO_REDIR = 0x00000001;
        const ASYNC_COMMAND = 0x00000002;
        const RELATED_OPERATIONS = 0x00000004;
        const SIGNED = 0x00000008;
        const PRIORITY_MASK = 0x00000070;
        const DFS_OPERATIONS = 0x10000000;
        const REPLAY_OPERATION = 0x20000000;
    }
}

impl SMBFlags {
    pub fn is_response(&self) -> bool {
        self.contains(SMBFlags::SERVER_TO_REDIR)
    }

    pub fn is_async(&self) -> bool {
        self.contains(SMBFlags::ASYNC_COMMAND)
    }
}

impl_smb_byte_size_for_bitflag! { SMBFlags }
impl_smb_from_bytes_for_bitflag! { SMBFlags }
impl_smb_to_bytes_for_bitflag! { SMBFlags }
