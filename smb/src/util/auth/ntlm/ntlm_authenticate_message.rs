use nom::bytes::complete::take;
use nom::number::complete::le_u32;
use nom::sequence::tuple;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::byte_helper::{utf16_bytes, utf16_string};
use crate::util::auth::ntlm::ntlm_message::{get_buffer, message_type, parse_ntlm_buffer_fields, NTLMNegotiateFlags, PayloadBuilder, NTLMSSP_SIGNATURE, NTLM_VERSION};

const AUTHENTICATE_FIXED_SIZE: usize = 88;

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Default)]
pub struct NTLMAuthenticateMessageBody {
    pub negotiate_flags: NTLMNegotiateFlags,
    pub domain_name: String,
    pub user_name: String,
    pub work_station: String,
    pub lm_challenge_response: Vec<u8>,
    pub nt_challenge_response: Vec<u8>,
    pub encrypted_session_key: Vec<u8>,
}

impl NTLMAuthenticateMessageBody {
    pub fn parse(bytes: &[u8]) -> SMBResult<Self> {
        let (remaining, _) = message_type(bytes)
            .map_err(|_| SMBError::parse_error("Invalid NTLM authenticate message"))?;
        let (_, (lm, nt, domain, user, work_station, session_key, flags, _, _)) = tuple((
            parse_ntlm_buffer_fields,
            parse_ntlm_buffer_fields,
            parse_ntlm_buffer_fields,
            parse_ntlm_buffer_fields,
            parse_ntlm_buffer_fields,
            parse_ntlm_buffer_fields,
            le_u32,
            take(8_usize),
            take(16_usize),
        ))(remaining)
            .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| SMBError::parse_error("Truncated NTLM authenticate message"))?;
        Ok(Self {
            negotiate_flags: NTLMNegotiateFlags::from_bits_truncate(flags),
            domain_name: utf16_string(&get_buffer(bytes, domain)?)?,
            user_name: utf16_string(&get_buffer(bytes, user)?)?,
            work_station: utf16_string(&get_buffer(bytes, work_station)?)?,
            lm_challenge_response: get_buffer(bytes, lm)?,
            nt_challenge_response: get_buffer(bytes, nt)?,
            encrypted_session_key: get_buffer(bytes, session_key)?,
        })
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut payload = PayloadBuilder::new(AUTHENTICATE_FIXED_SIZE);
        let lm = payload.add(&self.lm_challenge_response);
        let nt = payload.add(&self.nt_challenge_response);
        let domain = payload.add(&utf16_bytes(&self.domain_name));
        let user = payload.add(&utf16_bytes(&self.user_name));
        let work_station = payload.add(&utf16_bytes(&self.work_station));
        let session_key = payload.add(&self.encrypted_session_key);
        [
            &NTLMSSP_SIGNATURE[..],
            &3_u32.to_le_bytes(),
            &lm,
            &nt,
            &domain,
            &user,
            &work_station,
            &session_key,
            &self.negotiate_flags.bits().to_le_bytes(),
            &NTLM_VERSION,
            // MIC is not computed, so MsvAvFlags never claims one
            &[0; 16],
            &payload.into_payload(),
        ].concat()
    }
}
