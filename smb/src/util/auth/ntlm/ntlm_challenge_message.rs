use nom::bytes::complete::take;
use nom::number::complete::le_u32;
use nom::sequence::tuple;
use num_enum::{FromPrimitive, IntoPrimitive};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::byte_helper::{utf16_bytes, utf16_string};
use crate::util::auth::ntlm::ntlm_message::{get_buffer, message_type, parse_ntlm_buffer_fields, NTLMNegotiateFlags, PayloadBuilder, NTLMSSP_SIGNATURE, NTLM_VERSION};

const CHALLENGE_FIXED_SIZE: usize = 56;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromPrimitive, IntoPrimitive)]
pub enum AvId {
    EOL = 0,
    NbComputerName = 1,
    NbDomainName = 2,
    DnsComputerName = 3,
    DnsDomainName = 4,
    DnsTreeName = 5,
    Flags = 6,
    Timestamp = 7,
    SingleHost = 8,
    TargetName = 9,
    ChannelBindings = 10,
    #[num_enum(catch_all)]
    Other(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvPair {
    pub id: AvId,
    pub value: Vec<u8>,
}

impl AvPair {
    pub fn new(id: AvId, value: Vec<u8>) -> Self {
        Self { id, value }
    }

    pub fn parse_list(target_info: &[u8]) -> SMBResult<Vec<AvPair>> {
        let mut pairs = Vec::new();
        let mut remaining = target_info;
        while remaining.len() >= 4 {
            let id = AvId::from(u16::from_le_bytes([remaining[0], remaining[1]]));
            let length = u16::from_le_bytes([remaining[2], remaining[3]]) as usize;
            if id == AvId::EOL {
                return Ok(pairs);
            }
            let value = remaining.get(4..4 + length)
                .ok_or_else(|| SMBError::payload_too_small(4 + length, remaining.len()))?;
            pairs.push(AvPair::new(id, value.to_vec()));
            remaining = &remaining[4 + length..];
        }
        Err(SMBError::parse_error("AV pair list is missing its terminator"))
    }

    pub fn list_to_bytes(pairs: &[AvPair]) -> Vec<u8> {
        let mut bytes: Vec<u8> = pairs.iter()
            .flat_map(|pair| [
                &u16::from(pair.id).to_le_bytes()[..],
                &(pair.value.len() as u16).to_le_bytes(),
                &pair.value,
            ].concat())
            .collect();
        bytes.extend_from_slice(&[0; 4]);
        bytes
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
pub struct NTLMChallengeMessageBody {
    pub target_name: String,
    pub negotiate_flags: NTLMNegotiateFlags,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl NTLMChallengeMessageBody {
    pub fn new(target_name: String, negotiate_flags: NTLMNegotiateFlags, target_info: Vec<AvPair>) -> Self {
        let mut server_challenge = [0; 8];
        rand::thread_rng().fill_bytes(&mut server_challenge);
        Self {
            target_name,
            negotiate_flags,
            server_challenge,
            target_info: AvPair::list_to_bytes(&target_info),
        }
    }

    pub fn parse(bytes: &[u8]) -> SMBResult<Self> {
        let (remaining, _) = message_type(bytes)
            .map_err(|_| SMBError::parse_error("Invalid NTLM challenge message"))?;
        let (_, (target_name_fields, flags, challenge, _, target_info_fields)) = tuple((
            parse_ntlm_buffer_fields,
            le_u32,
            take(8_usize),
            take(8_usize),
            parse_ntlm_buffer_fields,
        ))(remaining)
            .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| SMBError::parse_error("Truncated NTLM challenge message"))?;
        let mut server_challenge = [0_u8; 8];
        server_challenge.copy_from_slice(challenge);
        Ok(Self {
            target_name: utf16_string(&get_buffer(bytes, target_name_fields)?)?,
            negotiate_flags: NTLMNegotiateFlags::from_bits_truncate(flags),
            server_challenge,
            target_info: get_buffer(bytes, target_info_fields)?,
        })
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut payload = PayloadBuilder::new(CHALLENGE_FIXED_SIZE);
        let target_name_fields = payload.add(&utf16_bytes(&self.target_name));
        let target_info_fields = payload.add(&self.target_info);
        [
            &NTLMSSP_SIGNATURE[..],
            &2_u32.to_le_bytes(),
            &target_name_fields,
            &self.negotiate_flags.bits().to_le_bytes(),
            &self.server_challenge,
            &[0; 8],
            &target_info_fields,
            &NTLM_VERSION,
            &payload.into_payload(),
        ].concat()
    }

    pub fn av_pairs(&self) -> SMBResult<Vec<AvPair>> {
        AvPair::parse_list(&self.target_info)
    }

    /// MsvAvTimestamp, when the server sent one.
    pub fn timestamp(&self) -> SMBResult<Option<u64>> {
        let pairs = self.av_pairs()?;
        let Some(pair) = pairs.iter().find(|p| p.id == AvId::Timestamp) else {
            return Ok(None);
        };
        let raw: [u8; 8] = pair.value.as_slice().try_into()
            .map_err(|_| SMBError::parse_error("Invalid AV timestamp length"))?;
        Ok(Some(u64::from_le_bytes(raw)))
    }
}
