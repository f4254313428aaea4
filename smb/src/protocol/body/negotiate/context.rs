use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBResult, SMBToBytes};

use crate::byte_helper::{pad_to, utf16_bytes, utf16_string};
use crate::util::flags_helper::impl_smb_for_primitive_enum;

pub const PRE_AUTH_INTEGRITY_CAPABILITIES_TAG: u16 = 0x01;
pub const ENCRYPTION_CAPABILITIES_TAG: u16 = 0x02;
pub const COMPRESSION_CAPABILITIES_TAG: u16 = 0x03;
pub const NETNAME_NEGOTIATE_CONTEXT_ID_TAG: u16 = 0x05;
pub const TRANSPORT_CAPABILITIES_TAG: u16 = 0x06;
pub const SIGNING_CAPABILITIES_TAG: u16 = 0x08;

const CONTEXT_HEADER_SIZE: usize = 8;

#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Copy, Clone, Ord, PartialOrd)]
pub enum HashAlgorithm {
    SHA512 = 0x01,
}

#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Clone, Ord, PartialOrd, Copy, Default)]
pub enum EncryptionCipher {
    /// Sent by a server that shares no cipher with the client.
    #[default]
    None = 0x0,
    AES128CCM = 0x01,
    AES128GCM = 0x02,
    AES256CCM = 0x03,
    AES256GCM = 0x04,
}

impl EncryptionCipher {
    pub fn key_len(&self) -> usize {
        match self {
            Self::AES256CCM | Self::AES256GCM => 32,
            _ => 16,
        }
    }

    pub fn is_gcm(&self) -> bool {
        matches!(self, Self::AES128GCM | Self::AES256GCM)
    }
}

#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Clone, Ord, PartialOrd, Copy)]
pub enum CompressionAlgorithm {
    None = 0x0,
    Lznt1,
    LZ77,
    Lz77AndHuffman,
    PatternV1,
    LZ4,
}

#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Clone, Ord, PartialOrd, Copy, Default)]
pub enum SigningAlgorithm {
    HmacSha256 = 0x0,
    #[default]
    AesCmac,
    AesGmac,
}

impl_smb_for_primitive_enum! {
    HashAlgorithm => u16,
    EncryptionCipher => u16,
    CompressionAlgorithm => u16,
    SigningAlgorithm => u16
}

fn u16_list<T: TryFrom<u16>>(cursor: &mut SMBCursor, count: usize, what: &'static str) -> SMBResult<Vec<T>> {
    (0..count)
        .map(|_| {
            let raw = cursor.u16()?;
            T::try_from(raw).map_err(|_| SMBError::parse_error(what))
        })
        .collect()
}

fn u16_list_bytes<T: Copy + Into<u16>>(values: &[T]) -> Vec<u8> {
    values.iter().flat_map(|v| (*v).into().to_le_bytes()).collect()
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct PreAuthIntegrityCapabilities {
    pub hash_algorithms: Vec<HashAlgorithm>,
    pub salt: Vec<u8>,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct EncryptionCapabilities {
    pub ciphers: Vec<EncryptionCipher>,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct CompressionCapabilities {
    pub chained: bool,
    pub compression_algorithms: Vec<CompressionAlgorithm>,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct NetnameNegotiateContextID {
    pub netname: String,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct SigningCapabilities {
    pub signing_algorithms: Vec<SigningAlgorithm>,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub enum NegotiateContext {
    PreAuthIntegrityCapabilities(PreAuthIntegrityCapabilities),
    EncryptionCapabilities(EncryptionCapabilities),
    CompressionCapabilities(CompressionCapabilities),
    NetnameNegotiateContextID(NetnameNegotiateContextID),
    TransportCapabilities(u32),
    SigningCapabilities(SigningCapabilities),
    /// Context types this client does not interpret; skipped during validation.
    Unknown { context_type: u16, data: Vec<u8> },
}

impl NegotiateContext {
    pub fn byte_code(&self) -> u16 {
        match self {
            Self::PreAuthIntegrityCapabilities(_) => PRE_AUTH_INTEGRITY_CAPABILITIES_TAG,
            Self::EncryptionCapabilities(_) => ENCRYPTION_CAPABILITIES_TAG,
            Self::CompressionCapabilities(_) => COMPRESSION_CAPABILITIES_TAG,
            Self::NetnameNegotiateContextID(_) => NETNAME_NEGOTIATE_CONTEXT_ID_TAG,
            Self::TransportCapabilities(_) => TRANSPORT_CAPABILITIES_TAG,
            Self::SigningCapabilities(_) => SIGNING_CAPABILITIES_TAG,
            Self::Unknown { context_type, .. } => *context_type,
        }
    }

    fn data_bytes(&self) -> Vec<u8> {
        match self {
            Self::PreAuthIntegrityCapabilities(x) => [
                &(x.hash_algorithms.len() as u16).to_le_bytes()[..],
                &(x.salt.len() as u16).to_le_bytes(),
                &u16_list_bytes(&x.hash_algorithms),
                &x.salt,
            ].concat(),
            Self::EncryptionCapabilities(x) => [
                &(x.ciphers.len() as u16).to_le_bytes()[..],
                &u16_list_bytes(&x.ciphers),
            ].concat(),
            Self::CompressionCapabilities(x) => [
                &(x.compression_algorithms.len() as u16).to_le_bytes()[..],
                &[0, 0],
                &(x.chained as u32).to_le_bytes(),
                &u16_list_bytes(&x.compression_algorithms),
            ].concat(),
            Self::NetnameNegotiateContextID(x) => utf16_bytes(&x.netname),
            Self::TransportCapabilities(flags) => flags.to_le_bytes().to_vec(),
            Self::SigningCapabilities(x) => [
                &(x.signing_algorithms.len() as u16).to_le_bytes()[..],
                &u16_list_bytes(&x.signing_algorithms),
            ].concat(),
            Self::Unknown { data, .. } => data.clone(),
        }
    }

    fn parse_data(context_type: u16, data: &[u8]) -> SMBResult<Self> {
        let mut cursor = SMBCursor::new(data);
        let context = match context_type {
            PRE_AUTH_INTEGRITY_CAPABILITIES_TAG => {
                let count = cursor.u16()? as usize;
                let salt_len = cursor.u16()? as usize;
                if count == 0 {
                    return Err(SMBError::parse_error("Pre-auth context without hash algorithms"));
                }
                let hash_algorithms = u16_list(&mut cursor, count, "Unknown hash algorithm")?;
                let salt = cursor.take(salt_len)?.to_vec();
                Self::PreAuthIntegrityCapabilities(PreAuthIntegrityCapabilities { hash_algorithms, salt })
            }
            ENCRYPTION_CAPABILITIES_TAG => {
                let count = cursor.u16()? as usize;
                let ciphers = u16_list(&mut cursor, count, "Unknown cipher")?;
                Self::EncryptionCapabilities(EncryptionCapabilities { ciphers })
            }
            COMPRESSION_CAPABILITIES_TAG => {
                let count = cursor.u16()? as usize;
                cursor.skip(2)?;
                let chained = cursor.u32()? & 0x1 != 0;
                let compression_algorithms = u16_list(&mut cursor, count, "Unknown compression algorithm")?;
                Self::CompressionCapabilities(CompressionCapabilities { chained, compression_algorithms })
            }
            NETNAME_NEGOTIATE_CONTEXT_ID_TAG => {
                Self::NetnameNegotiateContextID(NetnameNegotiateContextID { netname: utf16_string(data)? })
            }
            TRANSPORT_CAPABILITIES_TAG => Self::TransportCapabilities(cursor.u32()?),
            SIGNING_CAPABILITIES_TAG => {
                let count = cursor.u16()? as usize;
                let signing_algorithms = u16_list(&mut cursor, count, "Unknown signing algorithm")?;
                Self::SigningCapabilities(SigningCapabilities { signing_algorithms })
            }
            _ => Self::Unknown { context_type, data: data.to_vec() },
        };
        Ok(context)
    }
}

impl SMBByteSize for NegotiateContext {
    fn smb_byte_size(&self) -> usize {
        CONTEXT_HEADER_SIZE + self.data_bytes().len()
    }
}

impl SMBToBytes for NegotiateContext {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let data = self.data_bytes();
        [
            &self.byte_code().to_le_bytes()[..],
            &(data.len() as u16).to_le_bytes(),
            &[0; 4],
            &data,
        ]
        .concat()
    }
}

/// Serializes a context list, padding between entries to 8 bytes.
pub fn negotiate_contexts_to_bytes(contexts: &[NegotiateContext]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (idx, context) in contexts.iter().enumerate() {
        if idx > 0 {
            pad_to(&mut bytes, 8);
        }
        bytes.extend_from_slice(&context.smb_to_bytes());
    }
    bytes
}

/// Parses `count` contexts starting at `offset` within `buffer`.
pub fn parse_negotiate_contexts(buffer: &[u8], offset: usize, count: usize) -> SMBResult<Vec<NegotiateContext>> {
    let mut cursor = SMBCursor::new(buffer);
    cursor.seek(offset)?;
    let mut contexts = Vec::with_capacity(count.min(16));
    for idx in 0..count {
        if idx > 0 {
            let aligned = (cursor.position() - offset).div_ceil(8) * 8 + offset;
            cursor.seek(aligned)?;
        }
        let context_type = cursor.u16()?;
        let data_len = cursor.u16()? as usize;
        cursor.skip(4)?;
        let data = cursor.take(data_len)?;
        contexts.push(NegotiateContext::parse_data(context_type, data)?);
    }
    Ok(contexts)
}
