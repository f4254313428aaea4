use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
    pub struct Capabilities: u32 {
        const DFS                = 0x01;
        const LEASING            = 0x02;
        const LARGE_MTU          = 0x04;
        const MULTI_CHANNEL      = 0x08;
        const PERSISTENT_HANDLES = 0x10;
        const DIRECTORY_LEASING  = 0x20;
        const ENCRYPTION         = 0x40;
        const NOTIFICATIONS      = 0x80;
    }
}

impl Capabilities {
    /// Capabilities a client may advertise for `dialect`.
    pub fn client_default(smb3: bool) -> Self {
        let base = Capabilities::DFS | Capabilities::LEASING | Capabilities::LARGE_MTU;
        if smb3 {
            base | Capabilities::MULTI_CHANNEL | Capabilities::PERSISTENT_HANDLES | Capabilities::ENCRYPTION
        } else {
            base
        }
    }
}

impl_smb_byte_size_for_bitflag! { Capabilities }
impl_smb_from_bytes_for_bitflag! { Capabilities }
impl_smb_to_bytes_for_bitflag! { Capabilities }

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
    pub struct SecurityMode: u16 {
        const SIGNING_ENABLED = 0x01;
        const SIGNING_REQUIRED = 0x02;
    }
}

impl_smb_byte_size_for_bitflag! { SecurityMode }
impl_smb_from_bytes_for_bitflag! { SecurityMode }
impl_smb_to_bytes_for_bitflag! { SecurityMode }
