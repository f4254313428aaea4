use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use rand::RngCore;

use smb_core::error::SMBError;
use smb_core::{SMBFromBytes, SMBResult, SMBToBytes};

use crate::protocol::body::negotiate::context::EncryptionCipher;
use crate::protocol::header::transform::SMB2_TRANSFORM_HEADER_SIZE;
use crate::protocol::header::SMBTransformHeader;

const GCM_NONCE_SIZE: usize = 12;

/// Wraps a plain message in a transform header and encrypts it.
pub fn encrypt_message(message: &[u8], session_id: u64, key: &[u8], cipher: EncryptionCipher) -> SMBResult<Vec<u8>> {
    let mut nonce = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce[..GCM_NONCE_SIZE]);
    let mut header = SMBTransformHeader::new(nonce, message.len() as u32, session_id);
    let aad = header.associated_data();
    let mut buffer = message.to_vec();
    let tag = match cipher {
        EncryptionCipher::AES128GCM => seal::<Aes128Gcm>(key, &nonce, &aad, &mut buffer)?,
        EncryptionCipher::AES256GCM => seal::<Aes256Gcm>(key, &nonce, &aad, &mut buffer)?,
        other => return Err(SMBError::precondition_failed(format!("Cipher {:?} is not supported for sealing", other))),
    };
    header.signature = tag;
    Ok([header.smb_to_bytes(), buffer].concat())
}

/// Authenticates and decrypts a transform message, returning the session id and the inner message.
pub fn decrypt_message(bytes: &[u8], key: &[u8], cipher: EncryptionCipher) -> SMBResult<(u64, Vec<u8>)> {
    let (remaining, header) = SMBTransformHeader::smb_from_bytes(bytes)?;
    if remaining.len() != header.original_message_size as usize {
        return Err(SMBError::parse_error("Transform payload length mismatch"));
    }
    let aad = header.associated_data();
    let mut buffer = remaining.to_vec();
    match cipher {
        EncryptionCipher::AES128GCM => open::<Aes128Gcm>(key, &header.nonce, &aad, &mut buffer, &header.signature)?,
        EncryptionCipher::AES256GCM => open::<Aes256Gcm>(key, &header.nonce, &aad, &mut buffer, &header.signature)?,
        other => return Err(SMBError::precondition_failed(format!("Cipher {:?} is not supported for sealing", other))),
    }
    Ok((header.session_id, buffer))
}

fn seal<C: AeadInPlace + KeyInit>(key: &[u8], nonce: &[u8; 16], aad: &[u8], buffer: &mut [u8]) -> SMBResult<[u8; 16]> {
    let cipher = C::new_from_slice(key).map_err(|_| SMBError::crypto_error("Invalid Key Length"))?;
    let nonce = aes_gcm::aead::Nonce::<C>::from_slice(&nonce[..GCM_NONCE_SIZE]);
    let tag = cipher.encrypt_in_place_detached(nonce, aad, buffer)
        .map_err(|_| SMBError::crypto_error("Encryption failed"))?;
    tag.as_slice().try_into().map_err(|_| SMBError::crypto_error("Unexpected tag length"))
}

fn open<C: AeadInPlace + KeyInit>(key: &[u8], nonce: &[u8; 16], aad: &[u8], buffer: &mut [u8], signature: &[u8; 16]) -> SMBResult<()> {
    let cipher = C::new_from_slice(key).map_err(|_| SMBError::crypto_error("Invalid Key Length"))?;
    let nonce = aes_gcm::aead::Nonce::<C>::from_slice(&nonce[..GCM_NONCE_SIZE]);
    let tag = aes_gcm::aead::Tag::<C>::from_slice(signature);
    cipher.decrypt_in_place_detached(nonce, aad, buffer, tag)
        .map_err(|_| SMBError::crypto_error("Decryption failed"))
}

pub fn is_sealed(bytes: &[u8]) -> bool {
    bytes.len() >= SMB2_TRANSFORM_HEADER_SIZE && SMBTransformHeader::is_transform(bytes)
}
