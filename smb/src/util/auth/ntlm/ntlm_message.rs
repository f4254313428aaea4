use bitflags::bitflags;
use nom::bytes::complete::{tag, take};
use nom::number::complete::{le_u16, le_u32};
use nom::IResult;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::util::auth::ntlm::{NTLMAuthenticateMessageBody, NTLMChallengeMessageBody, NTLMNegotiateMessageBody};

pub(crate) const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
/// Windows 6.1 build 7601, NTLM revision 15.
pub(crate) const NTLM_VERSION: [u8; 8] = [6, 1, 0xB1, 0x1D, 0, 0, 0, 15];

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
pub enum NTLMMessage {
    Negotiate(NTLMNegotiateMessageBody),
    Challenge(NTLMChallengeMessageBody),
    Authenticate(NTLMAuthenticateMessageBody),
}

impl NTLMMessage {
    pub fn parse(bytes: &[u8]) -> SMBResult<Self> {
        let (_, message_type) = message_type(bytes)
            .map_err(|_| SMBError::parse_error("Invalid NTLMSSP header"))?;
        match message_type {
            0x01 => Ok(NTLMMessage::Negotiate(NTLMNegotiateMessageBody::parse(bytes)?)),
            0x02 => Ok(NTLMMessage::Challenge(NTLMChallengeMessageBody::parse(bytes)?)),
            0x03 => Ok(NTLMMessage::Authenticate(NTLMAuthenticateMessageBody::parse(bytes)?)),
            other => Err(SMBError::parse_error(format!("Unknown NTLM message type {}", other))),
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            NTLMMessage::Negotiate(msg) => msg.as_bytes(),
            NTLMMessage::Challenge(msg) => msg.as_bytes(),
            NTLMMessage::Authenticate(msg) => msg.as_bytes(),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, Default)]
    pub struct NTLMNegotiateFlags: u32 {
        const UNICODE_ENCODING = 0x01;
        const OEM_ENCODING = 0x02;
        const REQUEST_TARGET = 0x04;
        const SIGN = 0x10;
        const SEAL = 0x20;
        const DATAGRAM = 0x40;
        const LAN_MANAGER_SESSION_KEY = 0x80;
        const NTLM_SESSION_SECURITY = 0x200;
        const ANONYMOUS = 0x800;
        const DOMAIN_NAME_SUPPLIED = 0x1000;
        const WORKSTATION_NAME_SUPPLIED = 0x2000;
        const ALWAYS_SIGN = 0x8000;
        const TARGET_TYPE_DOMAIN = 0x10000;
        const TARGET_TYPE_SERVER = 0x20000;
        const EXTENDED_SESSION_SECURITY = 0x80000;
        const IDENTIFY = 0x100000;
        const REQUEST_LM_SESSION_KEY = 0x400000;
        const TARGET_INFO = 0x800000;
        const VERSION = 0x2000000;
        const USE_128_BIT_ENCRYPTION = 0x20000000;
        const KEY_EXCHANGE = 0x40000000;
        const USE_56_BIT_ENCRYPTION = 0x80000000;
    }
}

impl NTLMNegotiateFlags {
    pub fn client_default() -> Self {
        Self::UNICODE_ENCODING
            | Self::REQUEST_TARGET
            | Self::SIGN
            | Self::SEAL
            | Self::NTLM_SESSION_SECURITY
            | Self::ALWAYS_SIGN
            | Self::EXTENDED_SESSION_SECURITY
            | Self::TARGET_INFO
            | Self::VERSION
            | Self::USE_128_BIT_ENCRYPTION
            | Self::KEY_EXCHANGE
            | Self::USE_56_BIT_ENCRYPTION
    }
}

pub(crate) fn message_type(bytes: &[u8]) -> IResult<&[u8], u32> {
    let (remaining, _) = tag(&NTLMSSP_SIGNATURE[..])(bytes)?;
    le_u32(remaining)
}

/// Length, max length and offset of a payload field.
pub(crate) fn parse_ntlm_buffer_fields(bytes: &[u8]) -> IResult<&[u8], (u16, u32)> {
    let (remaining, length) = le_u16(bytes)?;
    let (remaining, _) = take(2_usize)(remaining)?;
    let (remaining, buffer_offset) = le_u32(remaining)?;
    Ok((remaining, (length, buffer_offset)))
}

pub(crate) fn get_buffer(message: &[u8], (length, offset): (u16, u32)) -> SMBResult<Vec<u8>> {
    let start = offset as usize;
    let end = start + length as usize;
    if length == 0 {
        return Ok(Vec::new());
    }
    message.get(start..end)
        .map(|slice| slice.to_vec())
        .ok_or_else(|| SMBError::payload_too_small(end, message.len()))
}

/// Lays out payload fields after a fixed header of `fixed_len` bytes.
pub(crate) struct PayloadBuilder {
    fixed_len: usize,
    payload: Vec<u8>,
}

impl PayloadBuilder {
    pub(crate) fn new(fixed_len: usize) -> Self {
        Self { fixed_len, payload: Vec::new() }
    }

    pub(crate) fn add(&mut self, data: &[u8]) -> [u8; 8] {
        let offset = (self.fixed_len + self.payload.len()) as u32;
        self.payload.extend_from_slice(data);
        let length = data.len() as u16;
        let mut fields = [0_u8; 8];
        fields[0..2].copy_from_slice(&length.to_le_bytes());
        fields[2..4].copy_from_slice(&length.to_le_bytes());
        fields[4..8].copy_from_slice(&offset.to_le_bytes());
        fields
    }

    pub(crate) fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_fields_round_trip() {
        let mut builder = PayloadBuilder::new(16);
        let fields = builder.add(b"abc");
        let (_, parsed) = parse_ntlm_buffer_fields(&fields).unwrap();
        assert_eq!(parsed, (3, 16));
        let message = [vec![0; 16], builder.into_payload()].concat();
        assert_eq!(get_buffer(&message, parsed).unwrap(), b"abc");
        assert!(get_buffer(&message, (4, 16)).is_err());
    }

    #[test]
    fn foreign_tokens_are_rejected() {
        assert!(NTLMMessage::parse(b"NOTNTLM\0\x01\0\0\0").is_err());
        assert!(NTLMMessage::parse(b"NTLMSSP\0\x09\0\0\0").is_err());
    }
}
