use std::time::Duration;

use derive_builder::Builder;
use uuid::Uuid;

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::protocol::body::negotiate::context::{CompressionAlgorithm, EncryptionCipher, SigningAlgorithm};
use crate::protocol::body::{SecurityMode, SMBDialect};
use crate::socket::message_stream::SMB_MAX_FRAME_SIZE;

/// Local policy and tuning for one client.
///
/// ```
/// use smb_client::client::SMBClientConfigBuilder;
/// use smb_client::protocol::body::SMBDialect;
///
/// let config = SMBClientConfigBuilder::default()
///     .max_dialect(SMBDialect::V3_0_2)
///     .signing_required(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.offered_dialects().first(), Some(&SMBDialect::V3_0_2));
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into), default)]
pub struct SMBClientConfig {
    pub min_dialect: SMBDialect,
    pub max_dialect: SMBDialect,
    pub signing_required: bool,
    /// Refuse to sign; a server that requires signing then fails session setup.
    pub signing_disabled: bool,
    pub encryption_required: bool,
    /// Shares whose traffic is sealed whatever the server asks for.
    pub encrypted_shares: Vec<String>,
    /// Seal every share of a session once any of its shares is sealed.
    pub couple_share_encryption: bool,
    pub ciphers: Vec<EncryptionCipher>,
    pub signing_algorithms: Vec<SigningAlgorithm>,
    /// Offered in the 3.1.1 compression context; empty omits the context.
    pub compression_algorithms: Vec<CompressionAlgorithm>,
    pub client_guid: Uuid,
    pub host_name: String,
    pub request_timeout: Duration,
    /// Upper bound for a reconnect before callers see `NotConnected`.
    pub reconnect_wait: Duration,
    /// Credits the client asks the server to keep granted.
    pub credit_target: u16,
    /// Credits kept free of pipelined I/O.
    pub credit_reserve: u16,
    /// Small, medium and large quantum sizes.
    pub quantum_sizes: [u32; 3],
    /// Concurrent requests kept in flight for each quantum size.
    pub quantum_counts: [u32; 3],
    pub quantum_cooldown: Duration,
    /// Accounted I/O time each quantum size needs before it can be compared.
    pub quantum_min_sample: Duration,
    /// Issue one request at a time, never pipelined.
    pub strict_sync_io: bool,
    pub durable_timeout: Duration,
    pub multi_channel: bool,
    pub max_frame_size: usize,
}

impl Default for SMBClientConfig {
    fn default() -> Self {
        Self {
            min_dialect: SMBDialect::V2_0_2,
            max_dialect: SMBDialect::V3_1_1,
            signing_required: false,
            signing_disabled: false,
            encryption_required: false,
            encrypted_shares: Vec::new(),
            couple_share_encryption: false,
            ciphers: vec![EncryptionCipher::AES128GCM, EncryptionCipher::AES256GCM],
            signing_algorithms: vec![SigningAlgorithm::AesGmac, SigningAlgorithm::AesCmac, SigningAlgorithm::HmacSha256],
            compression_algorithms: Vec::new(),
            client_guid: Uuid::new_v4(),
            host_name: "localhost".into(),
            request_timeout: Duration::from_secs(30),
            reconnect_wait: Duration::from_secs(60),
            credit_target: 128,
            credit_reserve: 2,
            quantum_sizes: [64 * 1024, 256 * 1024, 1024 * 1024],
            quantum_counts: [8, 4, 2],
            quantum_cooldown: Duration::from_secs(60),
            quantum_min_sample: Duration::from_millis(200),
            strict_sync_io: false,
            durable_timeout: Duration::ZERO,
            multi_channel: true,
            max_frame_size: SMB_MAX_FRAME_SIZE,
        }
    }
}

impl SMBClientConfig {
    pub fn builder() -> SMBClientConfigBuilder {
        SMBClientConfigBuilder::default()
    }

    /// Dialects permitted by policy, most preferred first.
    pub fn offered_dialects(&self) -> Vec<SMBDialect> {
        SMBDialect::PREFERENCE_ORDER.iter()
            .copied()
            .filter(|d| *d >= self.min_dialect && *d <= self.max_dialect)
            .collect()
    }

    pub fn security_mode(&self) -> SecurityMode {
        if self.signing_required {
            SecurityMode::SIGNING_ENABLED | SecurityMode::SIGNING_REQUIRED
        } else {
            SecurityMode::SIGNING_ENABLED
        }
    }

    pub fn share_requires_encryption(&self, share: &str) -> bool {
        self.encryption_required || self.encrypted_shares.iter().any(|s| s.eq_ignore_ascii_case(share))
    }

    pub fn validate(&self) -> SMBResult<()> {
        if self.offered_dialects().is_empty() {
            return Err(SMBError::precondition_failed("No dialect left after applying the dialect range"));
        }
        if self.signing_required && self.signing_disabled {
            return Err(SMBError::precondition_failed("Signing cannot be both required and disabled"));
        }
        if self.quantum_sizes.iter().any(|s| *s == 0) || self.quantum_counts.iter().any(|c| *c == 0) {
            return Err(SMBError::precondition_failed("Quantum sizes and counts must be non-zero"));
        }
        Ok(())
    }
}
