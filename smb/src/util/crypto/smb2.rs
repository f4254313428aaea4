use aes::Aes128;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes128Gcm, Nonce};
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::protocol::body::dialect::SMBDialect;
use crate::protocol::body::negotiate::context::{EncryptionCipher, SigningAlgorithm};
use crate::protocol::header::{SMBCommandCode, SMB2_HEADER_SIZE, SMB2_SIGNATURE_OFFSET};
use crate::util::crypto::sp800_108;

const SIGNATURE_LEN: usize = 16;
const FLAGS_OFFSET: usize = 16;
const FLAG_SERVER_TO_REDIR: u32 = 0x01;
const FLAG_SIGNED: u32 = 0x08;

/// Keys derived from an authenticated session key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionKeys {
    pub signing: Vec<u8>,
    pub encryption: Vec<u8>,
    pub decryption: Vec<u8>,
    pub application: Vec<u8>,
}

impl SessionKeys {
    pub fn derive(session_key: &[u8], dialect: SMBDialect, preauth_hash: &[u8], cipher: EncryptionCipher) -> SMBResult<Self> {
        if !dialect.is_smb3() {
            let mut signing = session_key.to_vec();
            signing.resize(16, 0);
            return Ok(Self { signing, ..Default::default() });
        }
        if dialect == SMBDialect::V3_1_1 && preauth_hash.is_empty() {
            return Err(SMBError::precondition_failed("No preauth integrity hash with SMB 3.1.1"));
        }
        let cipher_bits = (cipher.key_len() * 8) as u32;
        let hmac = new_sha256_from_slice(session_key)?;
        let keys = if dialect == SMBDialect::V3_1_1 {
            Self {
                signing: sp800_108::derive_key(hmac.clone(), b"SMBSigningKey\0", preauth_hash, 128),
                encryption: sp800_108::derive_key(hmac.clone(), b"SMBC2SCipherKey\0", preauth_hash, cipher_bits),
                decryption: sp800_108::derive_key(hmac.clone(), b"SMBS2CCipherKey\0", preauth_hash, cipher_bits),
                application: sp800_108::derive_key(hmac, b"SMBAppKey\0", preauth_hash, 128),
            }
        } else {
            Self {
                signing: sp800_108::derive_key(hmac.clone(), b"SMB2AESCMAC\0", b"SmbSign\0", 128),
                encryption: sp800_108::derive_key(hmac.clone(), b"SMB2AESCCM\0", b"ServerIn \0", 128),
                decryption: sp800_108::derive_key(hmac.clone(), b"SMB2AESCCM\0", b"ServerOut\0", 128),
                application: sp800_108::derive_key(hmac, b"SMB2APP\0", b"SmbRpc\0", 128),
            }
        };
        Ok(keys)
    }
}

/// Signing algorithm in force for `dialect`, given what the signing context settled on.
pub fn signing_algorithm_for(dialect: SMBDialect, negotiated: Option<SigningAlgorithm>) -> SigningAlgorithm {
    if !dialect.is_smb3() {
        SigningAlgorithm::HmacSha256
    } else if dialect == SMBDialect::V3_1_1 {
        negotiated.unwrap_or(SigningAlgorithm::AesCmac)
    } else {
        SigningAlgorithm::AesCmac
    }
}

/// Computes the signature over a complete message with its signature field zeroed.
pub fn calculate_signature(signing_key: &[u8], algorithm: SigningAlgorithm, message: &[u8]) -> SMBResult<[u8; SIGNATURE_LEN]> {
    if message.len() < SMB2_HEADER_SIZE {
        return Err(SMBError::payload_too_small(SMB2_HEADER_SIZE, message.len()));
    }
    let mut zeroed = message.to_vec();
    zeroed[SMB2_SIGNATURE_OFFSET..SMB2_SIGNATURE_OFFSET + SIGNATURE_LEN].fill(0);
    let output = match algorithm {
        SigningAlgorithm::HmacSha256 => new_sha256_from_slice(signing_key)?
            .chain_update(&zeroed)
            .finalize()
            .into_bytes()
            .to_vec(),
        SigningAlgorithm::AesCmac => <Cmac<Aes128>>::new_from_slice(signing_key)
            .map_err(|_| SMBError::crypto_error("Invalid Key Length"))?
            .chain_update(&zeroed)
            .finalize()
            .into_bytes()
            .to_vec(),
        SigningAlgorithm::AesGmac => {
            let nonce = gmac_nonce(&zeroed);
            <Aes128Gcm as aes_gcm::aead::KeyInit>::new_from_slice(signing_key)
                .map_err(|_| SMBError::crypto_error("Invalid Key Length"))?
                .encrypt_in_place_detached(Nonce::from_slice(&nonce), &zeroed, &mut [])
                .map_err(|_| SMBError::crypto_error("GMAC computation failed"))?
                .to_vec()
        }
    };
    let mut signature = [0_u8; SIGNATURE_LEN];
    signature.copy_from_slice(&output[..SIGNATURE_LEN]);
    Ok(signature)
}

/// Sets the SIGNED flag and writes the signature into the header in place.
pub fn sign_message(signing_key: &[u8], algorithm: SigningAlgorithm, message: &mut [u8]) -> SMBResult<()> {
    if message.len() < SMB2_HEADER_SIZE {
        return Err(SMBError::payload_too_small(SMB2_HEADER_SIZE, message.len()));
    }
    let flags = read_flags(message) | FLAG_SIGNED;
    message[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&flags.to_le_bytes());
    let signature = calculate_signature(signing_key, algorithm, message)?;
    message[SMB2_SIGNATURE_OFFSET..SMB2_SIGNATURE_OFFSET + SIGNATURE_LEN].copy_from_slice(&signature);
    Ok(())
}

pub fn verify_signature(signing_key: &[u8], algorithm: SigningAlgorithm, message: &[u8]) -> SMBResult<()> {
    let expected = calculate_signature(signing_key, algorithm, message)?;
    if message[SMB2_SIGNATURE_OFFSET..SMB2_SIGNATURE_OFFSET + SIGNATURE_LEN] != expected {
        return Err(SMBError::crypto_error("Signature mismatch"));
    }
    Ok(())
}

fn read_flags(message: &[u8]) -> u32 {
    let mut raw = [0_u8; 4];
    raw.copy_from_slice(&message[FLAGS_OFFSET..FLAGS_OFFSET + 4]);
    u32::from_le_bytes(raw)
}

/// Message id followed by a role bit (server) and a cancel bit.
fn gmac_nonce(message: &[u8]) -> [u8; 12] {
    let mut nonce = [0_u8; 12];
    nonce[..8].copy_from_slice(&message[24..32]);
    let mut marker = 0_u32;
    if read_flags(message) & FLAG_SERVER_TO_REDIR != 0 {
        marker |= 0x1;
    }
    if u16::from_le_bytes([message[12], message[13]]) == u16::from(SMBCommandCode::Cancel) {
        marker |= 0x2;
    }
    nonce[8..].copy_from_slice(&marker.to_le_bytes());
    nonce
}

fn new_sha256_from_slice(slice: &[u8]) -> SMBResult<Hmac<Sha256>> {
    <Hmac<Sha256>>::new_from_slice(slice)
        .map_err(|_| SMBError::crypto_error("Invalid Key Length"))
}

#[cfg(test)]
mod tests {
    use smb_core::SMBToBytes;

    use crate::protocol::header::SMBSyncHeader;

    use super::*;

    fn message() -> Vec<u8> {
        let header = SMBSyncHeader::request(SMBCommandCode::Echo, 42, 0, 7).smb_to_bytes();
        [header, vec![4, 0, 0, 0]].concat()
    }

    #[test]
    fn signatures_verify_for_every_algorithm() {
        for algorithm in [SigningAlgorithm::HmacSha256, SigningAlgorithm::AesCmac, SigningAlgorithm::AesGmac] {
            let mut bytes = message();
            sign_message(&[5; 16], algorithm, &mut bytes).unwrap();
            assert_eq!(bytes[16] & 0x08, 0x08);
            assert!(verify_signature(&[5; 16], algorithm, &bytes).is_ok());
            bytes[66] ^= 1;
            assert!(verify_signature(&[5; 16], algorithm, &bytes).is_err());
        }
    }

    /// GMAC signatures differ between directions because the role bit enters the nonce.
    #[test]
    fn gmac_nonce_carries_role_bit() {
        let request = message();
        let mut response = request.clone();
        response[16] |= 0x01;
        assert_eq!(gmac_nonce(&request)[8], 0);
        assert_eq!(gmac_nonce(&response)[8], 1);
        assert_eq!(&gmac_nonce(&request)[..8], &42_u64.to_le_bytes());
    }

    #[test]
    fn smb2_signing_key_is_the_session_key() {
        let keys = SessionKeys::derive(&[9; 16], SMBDialect::V2_1_0, &[], EncryptionCipher::None).unwrap();
        assert_eq!(keys.signing, vec![9; 16]);
        assert!(keys.encryption.is_empty());
    }

    #[test]
    fn smb311_keys_need_preauth_hash() {
        assert!(SessionKeys::derive(&[9; 16], SMBDialect::V3_1_1, &[], EncryptionCipher::AES128GCM).is_err());
        let keys = SessionKeys::derive(&[9; 16], SMBDialect::V3_1_1, &[1; 64], EncryptionCipher::AES256GCM).unwrap();
        assert_eq!(keys.signing.len(), 16);
        assert_eq!(keys.encryption.len(), 32);
        assert_ne!(keys.encryption, keys.decryption);
    }

    #[test]
    fn smb30_keys_ignore_preauth_hash() {
        let a = SessionKeys::derive(&[9; 16], SMBDialect::V3_0_0, &[], EncryptionCipher::AES128CCM).unwrap();
        let b = SessionKeys::derive(&[9; 16], SMBDialect::V3_0_2, &[1; 64], EncryptionCipher::AES128CCM).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn signing_algorithm_follows_dialect() {
        assert_eq!(signing_algorithm_for(SMBDialect::V2_0_2, Some(SigningAlgorithm::AesGmac)), SigningAlgorithm::HmacSha256);
        assert_eq!(signing_algorithm_for(SMBDialect::V3_0_0, None), SigningAlgorithm::AesCmac);
        assert_eq!(signing_algorithm_for(SMBDialect::V3_1_1, Some(SigningAlgorithm::AesGmac)), SigningAlgorithm::AesGmac);
        assert_eq!(signing_algorithm_for(SMBDialect::V3_1_1, None), SigningAlgorithm::AesCmac);
    }
}
