use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::util::flags_helper::impl_smb_for_primitive_enum;

#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Copy, Clone, Ord, PartialOrd)]
#[allow(non_camel_case_types)]
pub enum SMBDialect {
    V2_0_2 = 0x202,
    V2_1_0 = 0x210,
    /// Multi-protocol wildcard, only ever sent by servers answering an SMB1 negotiate.
    V2_X_X = 0x2FF,
    V3_0_0 = 0x300,
    V3_0_2 = 0x302,
    V3_1_1 = 0x311,
}

impl SMBDialect {
    /// Every dialect this client can speak, most preferred first.
    pub const PREFERENCE_ORDER: [SMBDialect; 5] = [
        SMBDialect::V3_1_1,
        SMBDialect::V3_0_2,
        SMBDialect::V3_0_0,
        SMBDialect::V2_1_0,
        SMBDialect::V2_0_2,
    ];

    pub fn is_smb3(&self) -> bool {
        *self >= SMBDialect::V3_0_0
    }

    /// Multi-credit requests and leasing arrived with 2.1.
    pub fn supports_multi_credit(&self) -> bool {
        *self >= SMBDialect::V2_1_0 && *self != SMBDialect::V2_X_X
    }

    pub fn supports_negotiate_contexts(&self) -> bool {
        *self == SMBDialect::V3_1_1
    }

    /// Durable handle v2, lease v2, replay and channel sequence numbers.
    pub fn supports_v2_contexts(&self) -> bool {
        self.is_smb3()
    }

    pub fn supports_replay(&self) -> bool {
        self.is_smb3()
    }

    /// Next lower dialect, if any.
    pub fn step_down(&self) -> Option<SMBDialect> {
        let position = Self::PREFERENCE_ORDER.iter().position(|d| d == self)?;
        Self::PREFERENCE_ORDER.get(position + 1).copied()
    }
}

impl_smb_for_primitive_enum! { SMBDialect => u16 }

#[cfg(test)]
mod tests {
    use super::*;
    use smb_core::{SMBFromBytes, SMBToBytes};

    #[test]
    fn dialect_values_match_wire_codes() {
        assert_eq!(SMBDialect::V2_0_2 as u16, 0x0202);
        assert_eq!(SMBDialect::V2_1_0 as u16, 0x0210);
        assert_eq!(SMBDialect::V3_0_0 as u16, 0x0300);
        assert_eq!(SMBDialect::V3_0_2 as u16, 0x0302);
        assert_eq!(SMBDialect::V3_1_1 as u16, 0x0311);
        assert_eq!(SMBDialect::V2_X_X as u16, 0x02FF);
    }

    #[test]
    fn capability_classification() {
        assert!(!SMBDialect::V2_0_2.is_smb3());
        assert!(!SMBDialect::V2_0_2.supports_multi_credit());
        assert!(SMBDialect::V2_1_0.supports_multi_credit());
        assert!(!SMBDialect::V2_X_X.is_smb3());
        assert!(SMBDialect::V3_0_0.supports_v2_contexts());
        assert!(SMBDialect::V3_1_1.supports_negotiate_contexts());
        assert!(!SMBDialect::V3_0_2.supports_negotiate_contexts());
    }

    #[test]
    fn step_down_walks_preference_order() {
        assert_eq!(SMBDialect::V3_1_1.step_down(), Some(SMBDialect::V3_0_2));
        assert_eq!(SMBDialect::V2_1_0.step_down(), Some(SMBDialect::V2_0_2));
        assert_eq!(SMBDialect::V2_0_2.step_down(), None);
    }

    #[test]
    fn dialect_round_trip() {
        let dialect = SMBDialect::V3_1_1;
        let bytes = dialect.smb_to_bytes();
        assert_eq!(bytes, [0x11, 0x03]);
        let (_, parsed) = SMBDialect::smb_from_bytes(&bytes).unwrap();
        assert_eq!(parsed, dialect);
        assert!(SMBDialect::smb_from_bytes(&[0x00, 0x01]).is_err());
    }
}
