use nom::number::complete::le_u32;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::util::auth::ntlm::ntlm_message::{message_type, NTLMNegotiateFlags, NTLMSSP_SIGNATURE, NTLM_VERSION};

const NEGOTIATE_MESSAGE_SIZE: usize = 40;

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
pub struct NTLMNegotiateMessageBody {
    pub negotiate_flags: NTLMNegotiateFlags,
}

impl NTLMNegotiateMessageBody {
    pub fn new(negotiate_flags: NTLMNegotiateFlags) -> Self {
        Self { negotiate_flags }
    }

    pub fn parse(bytes: &[u8]) -> SMBResult<Self> {
        let (remaining, _) = message_type(bytes)
            .map_err(|_| SMBError::parse_error("Invalid NTLM negotiate message"))?;
        let (_, flags) = le_u32::<_, nom::error::Error<&[u8]>>(remaining)
            .map_err(|_| SMBError::parse_error("Truncated NTLM negotiate message"))?;
        Ok(Self { negotiate_flags: NTLMNegotiateFlags::from_bits_truncate(flags) })
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        // domain and workstation are never supplied up front
        [
            &NTLMSSP_SIGNATURE[..],
            &1_u32.to_le_bytes(),
            &self.negotiate_flags.bits().to_le_bytes(),
            &[0; 8],
            &[0; 8],
            &NTLM_VERSION,
        ].concat()
    }
}
