use bitflags::bitflags;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

bitflags! {
    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
    pub struct SMBCompletionFilter: u32 {
        const FILE_NAME = 0x01;
        const DIR_NAME = 0x02;
        const ATTRIBUTES = 0x04;
        const SIZE = 0x08;
        const LAST_WRITE = 0x10;
        const LAST_ACCESS = 0x20;
        const CREATION = 0x40;
        const EA = 0x80;
        const SECURITY = 0x100;
        const STREAM_NAME = 0x200;
        const STREAM_SIZE = 0x400;
        const STREAM_WRITE = 0x800;
    }
}

impl_smb_byte_size_for_bitflag! { SMBCompletionFilter }
impl_smb_to_bytes_for_bitflag! { SMBCompletionFilter }
impl_smb_from_bytes_for_bitflag! { SMBCompletionFilter }

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromPrimitive, IntoPrimitive)]
pub enum SMBNotifyAction {
    Added = 1,
    Removed = 2,
    Modified = 3,
    RenamedOldName = 4,
    RenamedNewName = 5,
    AddedStream = 6,
    RemovedStream = 7,
    ModifiedStream = 8,
    #[num_enum(catch_all)]
    Other(u32),
}
