use digest::Digest;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;
use rc4::consts::U16;
use rc4::{Rc4, StreamCipher};

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::byte_helper::utf16_bytes;

/// Client side of one NTLMv2 challenge/response computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NTLMv2Response {
    pub nt_challenge_response: Vec<u8>,
    pub lm_challenge_response: Vec<u8>,
    pub session_base_key: Vec<u8>,
}

pub fn ntowf_v2(password: &str, user: &str, domain: &str) -> SMBResult<Vec<u8>> {
    let password_hash = Md4::digest(utf16_bytes(password));
    let identity = utf16_bytes(&(user.to_uppercase() + domain));
    Ok(new_hmac_from_slice(password_hash.as_slice())?
        .chain_update(identity)
        .finalize()
        .into_bytes()
        .to_vec())
}

/// Builds the NTv2 and LMv2 responses. When the server supplied a timestamp the LM response is zeroed.
pub fn compute_response(
    response_key: &[u8],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: u64,
    target_info: &[u8],
    server_timestamp_present: bool,
) -> SMBResult<NTLMv2Response> {
    let temp = [
        &[1_u8, 1][..],
        &[0; 6],
        &timestamp.to_le_bytes(),
        client_challenge,
        &[0; 4],
        target_info,
        &[0; 4],
    ].concat();
    let nt_proof_str = new_hmac_from_slice(response_key)?
        .chain_update(server_challenge)
        .chain_update(&temp)
        .finalize()
        .into_bytes();
    let nt_challenge_response = [nt_proof_str.as_slice(), &temp].concat();
    let lm_challenge_response = if server_timestamp_present {
        vec![0; 24]
    } else {
        let lm_proof = new_hmac_from_slice(response_key)?
            .chain_update(server_challenge)
            .chain_update(client_challenge)
            .finalize()
            .into_bytes();
        [lm_proof.as_slice(), client_challenge].concat()
    };
    let session_base_key = new_hmac_from_slice(response_key)?
        .chain_update(nt_proof_str)
        .finalize()
        .into_bytes()
        .to_vec();
    Ok(NTLMv2Response { nt_challenge_response, lm_challenge_response, session_base_key })
}

/// RC4 is symmetric, so the same call encrypts and decrypts the exported session key.
pub fn rc4_transform(key: &[u8], data: &[u8]) -> SMBResult<Vec<u8>> {
    let mut cipher = <Rc4<U16> as rc4::KeyInit>::new_from_slice(key)
        .map_err(|_| SMBError::crypto_error("Invalid RC4 key length"))?;
    let mut output = data.to_vec();
    cipher.apply_keystream(&mut output);
    Ok(output)
}

fn new_hmac_from_slice(slice: &[u8]) -> SMBResult<Hmac<Md5>> {
    <Hmac<Md5>>::new_from_slice(slice).map_err(|_| SMBError::crypto_error("Invalid length for key"))
}
