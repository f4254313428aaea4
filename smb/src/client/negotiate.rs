//! Dialect and capability negotiation (MS-SMB2 3.2.4.2.2, 3.2.5.2).

use std::collections::HashSet;
use std::sync::Arc;

use rand::RngCore;
use uuid::Uuid;

use smb_core::error::SMBError;
use smb_core::logging::{debug, warn};
use smb_core::SMBResult;

use crate::client::config::SMBClientConfig;
use crate::client::connection::{Connection, OutgoingRequest};
use crate::protocol::body::negotiate::context::{
    CompressionAlgorithm, CompressionCapabilities, EncryptionCapabilities, EncryptionCipher, HashAlgorithm,
    NetnameNegotiateContextID, PreAuthIntegrityCapabilities, SigningAlgorithm, SigningCapabilities,
    COMPRESSION_CAPABILITIES_TAG, ENCRYPTION_CAPABILITIES_TAG, NETNAME_NEGOTIATE_CONTEXT_ID_TAG,
    PRE_AUTH_INTEGRITY_CAPABILITIES_TAG, SIGNING_CAPABILITIES_TAG, TRANSPORT_CAPABILITIES_TAG,
};
use crate::protocol::body::negotiate::{NegotiateContext, SMBNegotiateRequest, SMBNegotiateResponse};
use crate::protocol::body::{Capabilities, SecurityMode, SMBBody, SMBDialect};
use crate::util::crypto::preauth::PreauthHash;

const PREAUTH_SALT_SIZE: usize = 32;
/// Largest transfer a dialect without multi-credit support can carry.
const SINGLE_CREDIT_MAX_TRANSFER: u32 = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiateState {
    Init,
    DialectsSent,
    DialectSelected,
    ContextsExchanged,
    Negotiated,
    Failed,
}

/// Which dialects a negotiate may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiateMode {
    /// Everything local policy allows.
    Fresh,
    /// Exactly the dialect already in use, for reconnects and alternate channels.
    Pinned(SMBDialect),
    /// A fresh negotiate capped below a dialect the server refused for its cluster.
    Capped(SMBDialect),
}

/// What a connection settled on with the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedParameters {
    pub dialect: SMBDialect,
    pub offered_dialects: Vec<SMBDialect>,
    pub client_guid: Uuid,
    pub client_capabilities: Capabilities,
    pub client_security_mode: SecurityMode,
    pub server_guid: Uuid,
    pub server_capabilities: Capabilities,
    pub server_security_mode: SecurityMode,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    /// `None` when no cipher was agreed.
    pub cipher: Option<EncryptionCipher>,
    pub signing_algorithm: SigningAlgorithm,
    /// Empty when compression is disabled.
    pub compression: Vec<CompressionAlgorithm>,
    /// Pre-auth hash after the negotiate exchange; empty below 3.1.1.
    pub preauth_hash: Vec<u8>,
    /// Security blob the server offered in its response.
    pub security_buffer: Vec<u8>,
}

impl NegotiatedParameters {
    pub fn server_supports(&self, capability: Capabilities) -> bool {
        self.server_capabilities.contains(capability)
    }

    pub fn server_requires_signing(&self) -> bool {
        self.server_security_mode.contains(SecurityMode::SIGNING_REQUIRED)
    }

    pub fn supports_multi_credit(&self) -> bool {
        self.dialect.supports_multi_credit() && self.server_supports(Capabilities::LARGE_MTU)
    }
}

/// Drives one negotiate exchange. The machine holds no I/O so it can be fed
/// hand-built responses.
#[derive(Debug)]
pub struct NegotiateMachine {
    state: NegotiateState,
    offered: Vec<SMBDialect>,
    client_guid: Uuid,
    security_mode: SecurityMode,
    capabilities: Capabilities,
    ciphers: Vec<EncryptionCipher>,
    signing_algorithms: Vec<SigningAlgorithm>,
    compression_algorithms: Vec<CompressionAlgorithm>,
    host_name: String,
}

impl NegotiateMachine {
    pub fn new(config: &SMBClientConfig, mode: NegotiateMode) -> Self {
        let offered = match mode {
            NegotiateMode::Fresh => config.offered_dialects(),
            NegotiateMode::Pinned(dialect) => vec![dialect],
            NegotiateMode::Capped(limit) => config.offered_dialects().into_iter().filter(|d| *d <= limit).collect(),
        };
        let smb3 = offered.iter().any(|d| d.is_smb3());
        let mut capabilities = Capabilities::client_default(smb3);
        if !config.multi_channel {
            capabilities.remove(Capabilities::MULTI_CHANNEL);
        }
        Self {
            state: NegotiateState::Init,
            offered,
            client_guid: config.client_guid,
            security_mode: config.security_mode(),
            capabilities,
            ciphers: config.ciphers.clone(),
            signing_algorithms: config.signing_algorithms.clone(),
            compression_algorithms: config.compression_algorithms.clone(),
            host_name: config.host_name.clone(),
        }
    }

    pub fn state(&self) -> NegotiateState {
        self.state
    }

    pub fn offered(&self) -> &[SMBDialect] {
        &self.offered
    }

    pub fn build_request(&mut self) -> SMBResult<SMBNegotiateRequest> {
        if self.state != NegotiateState::Init {
            return Err(SMBError::precondition_failed("Negotiate request already built"));
        }
        if self.offered.is_empty() {
            self.state = NegotiateState::Failed;
            return Err(SMBError::precondition_failed("No dialect to offer"));
        }
        let negotiate_contexts = if self.offered.contains(&SMBDialect::V3_1_1) {
            self.request_contexts()
        } else {
            Vec::new()
        };
        self.state = NegotiateState::DialectsSent;
        Ok(SMBNegotiateRequest {
            security_mode: self.security_mode,
            capabilities: self.capabilities,
            client_guid: self.client_guid,
            dialects: self.offered.clone(),
            negotiate_contexts,
        })
    }

    fn request_contexts(&self) -> Vec<NegotiateContext> {
        let mut salt = vec![0_u8; PREAUTH_SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut contexts = vec![NegotiateContext::PreAuthIntegrityCapabilities(PreAuthIntegrityCapabilities {
            hash_algorithms: vec![HashAlgorithm::SHA512],
            salt,
        })];
        if !self.ciphers.is_empty() {
            contexts.push(NegotiateContext::EncryptionCapabilities(EncryptionCapabilities {
                ciphers: self.ciphers.clone(),
            }));
        }
        if !self.compression_algorithms.is_empty() {
            contexts.push(NegotiateContext::CompressionCapabilities(CompressionCapabilities {
                chained: false,
                compression_algorithms: self.compression_algorithms.clone(),
            }));
        }
        if !self.signing_algorithms.is_empty() {
            contexts.push(NegotiateContext::SigningCapabilities(SigningCapabilities {
                signing_algorithms: self.signing_algorithms.clone(),
            }));
        }
        contexts.push(NegotiateContext::NetnameNegotiateContextID(NetnameNegotiateContextID {
            netname: self.host_name.clone(),
        }));
        contexts
    }

    /// Validates the server's answer. `request_bytes` and `response_bytes` are the
    /// full messages as they crossed the wire, used for the 3.1.1 pre-auth hash.
    pub fn process_response(
        &mut self,
        response: &SMBNegotiateResponse,
        request_bytes: &[u8],
        response_bytes: &[u8],
    ) -> SMBResult<NegotiatedParameters> {
        if self.state != NegotiateState::DialectsSent {
            return Err(SMBError::precondition_failed("No negotiate request outstanding"));
        }
        let result = self.validate(response, request_bytes, response_bytes);
        self.state = match result {
            Ok(_) => NegotiateState::Negotiated,
            Err(_) => NegotiateState::Failed,
        };
        result
    }

    fn validate(
        &mut self,
        response: &SMBNegotiateResponse,
        request_bytes: &[u8],
        response_bytes: &[u8],
    ) -> SMBResult<NegotiatedParameters> {
        let dialect = response.dialect;
        if dialect == SMBDialect::V2_X_X {
            return Err(SMBError::response_error("Server asked for multi-protocol negotiation, which is not supported"));
        }
        if !self.offered.contains(&dialect) {
            return Err(SMBError::response_error(format!("Server selected {:?}, which was not offered", dialect)));
        }
        self.state = NegotiateState::DialectSelected;
        debug!(dialect = ?dialect, "dialect selected");

        let mut cipher = None;
        let mut signing = None;
        let mut compression = Vec::new();
        let mut preauth_hash = Vec::new();
        if dialect.supports_negotiate_contexts() {
            let contexts = self.validate_contexts(&response.negotiate_contexts)?;
            cipher = contexts.cipher;
            signing = contexts.signing;
            compression = contexts.compression;
            let mut hash = PreauthHash::new();
            hash.update(request_bytes);
            hash.update(response_bytes);
            preauth_hash = hash.value().to_vec();
        } else if dialect.is_smb3() && response.capabilities.contains(Capabilities::ENCRYPTION) {
            cipher = Some(EncryptionCipher::AES128CCM);
        }
        self.state = NegotiateState::ContextsExchanged;

        let clamp = |size: u32| {
            if dialect.supports_multi_credit() { size } else { size.min(SINGLE_CREDIT_MAX_TRANSFER) }
        };
        if response.max_transact_size == 0 || response.max_read_size == 0 || response.max_write_size == 0 {
            return Err(SMBError::response_error("Server announced a zero transfer size"));
        }
        Ok(NegotiatedParameters {
            dialect,
            offered_dialects: self.offered.clone(),
            client_guid: self.client_guid,
            client_capabilities: self.capabilities,
            client_security_mode: self.security_mode,
            server_guid: response.server_guid,
            server_capabilities: response.capabilities,
            server_security_mode: response.security_mode,
            max_transact_size: clamp(response.max_transact_size),
            max_read_size: clamp(response.max_read_size),
            max_write_size: clamp(response.max_write_size),
            cipher,
            signing_algorithm: crate::util::crypto::smb2::signing_algorithm_for(dialect, signing),
            compression,
            preauth_hash,
            security_buffer: response.buffer.clone(),
        })
    }

    fn validate_contexts(&self, contexts: &[NegotiateContext]) -> SMBResult<ContextOutcome> {
        let known = [
            PRE_AUTH_INTEGRITY_CAPABILITIES_TAG,
            ENCRYPTION_CAPABILITIES_TAG,
            COMPRESSION_CAPABILITIES_TAG,
            NETNAME_NEGOTIATE_CONTEXT_ID_TAG,
            TRANSPORT_CAPABILITIES_TAG,
            SIGNING_CAPABILITIES_TAG,
        ];
        let mut seen = HashSet::new();
        let mut outcome = ContextOutcome::default();
        let mut preauth_seen = false;
        for context in contexts {
            let tag = context.byte_code();
            if !known.contains(&tag) {
                debug!(tag, "skipping unknown negotiate context");
                continue;
            }
            if !seen.insert(tag) {
                return Err(SMBError::response_error(format!("Duplicate negotiate context {:#x}", tag)));
            }
            match context {
                NegotiateContext::PreAuthIntegrityCapabilities(x) => {
                    if x.hash_algorithms.as_slice() != [HashAlgorithm::SHA512] {
                        return Err(SMBError::response_error("Pre-auth context must name exactly SHA-512"));
                    }
                    preauth_seen = true;
                }
                NegotiateContext::EncryptionCapabilities(x) => {
                    let [selected] = x.ciphers.as_slice() else {
                        return Err(SMBError::response_error("Encryption context must carry exactly one cipher"));
                    };
                    outcome.cipher = match selected {
                        EncryptionCipher::None => None,
                        c if self.ciphers.contains(c) => Some(*c),
                        c => return Err(SMBError::response_error(format!("Server selected cipher {:?}, which was not offered", c))),
                    };
                }
                NegotiateContext::SigningCapabilities(x) => {
                    let [selected] = x.signing_algorithms.as_slice() else {
                        return Err(SMBError::response_error("Signing context must carry exactly one algorithm"));
                    };
                    if !self.signing_algorithms.contains(selected) {
                        return Err(SMBError::response_error(format!("Server selected signing {:?}, which was not offered", selected)));
                    }
                    outcome.signing = Some(*selected);
                }
                NegotiateContext::CompressionCapabilities(x) => {
                    if x.compression_algorithms.is_empty() {
                        return Err(SMBError::response_error("Compression context carries no algorithm"));
                    }
                    if let Some(other) = x.compression_algorithms.iter()
                        .find(|a| **a != CompressionAlgorithm::None && !self.compression_algorithms.contains(a)) {
                        return Err(SMBError::response_error(format!("Server selected compression {:?}, which was not offered", other)));
                    }
                    outcome.compression = x.compression_algorithms.iter()
                        .copied()
                        .filter(|a| *a != CompressionAlgorithm::None)
                        .collect();
                }
                NegotiateContext::NetnameNegotiateContextID(_) | NegotiateContext::TransportCapabilities(_) => {
                    warn!(tag, "server returned a request-only negotiate context");
                }
                NegotiateContext::Unknown { .. } => {}
            }
        }
        if !preauth_seen {
            return Err(SMBError::response_error("3.1.1 negotiate response has no pre-auth integrity context"));
        }
        Ok(outcome)
    }
}

#[derive(Debug, Default)]
struct ContextOutcome {
    cipher: Option<EncryptionCipher>,
    signing: Option<SigningAlgorithm>,
    compression: Vec<CompressionAlgorithm>,
}

/// Runs negotiate on a fresh connection and records the result on it.
pub async fn negotiate(connection: &Arc<Connection>, machine: &mut NegotiateMachine) -> SMBResult<Arc<NegotiatedParameters>> {
    let request = machine.build_request()?;
    let exchange = connection.exchange(OutgoingRequest::new(SMBBody::NegotiateRequest(request), 0, 0)).await?;
    let status = exchange.status();
    let SMBBody::NegotiateResponse(response) = &exchange.response.body else {
        return Err(SMBError::status_error(status, "Negotiate failed"));
    };
    let parameters = Arc::new(machine.process_response(response, &exchange.request_bytes, &exchange.response_bytes)?);
    connection.set_negotiated(parameters.clone());
    debug!(dialect = ?parameters.dialect, cipher = ?parameters.cipher, "connection negotiated");
    Ok(parameters)
}

#[cfg(test)]
mod tests {
    use crate::protocol::body::FileTime;

    use super::*;

    fn response(dialect: SMBDialect, contexts: Vec<NegotiateContext>) -> SMBNegotiateResponse {
        SMBNegotiateResponse {
            security_mode: SecurityMode::SIGNING_ENABLED,
            dialect,
            server_guid: Uuid::new_v4(),
            capabilities: Capabilities::LEASING | Capabilities::LARGE_MTU,
            max_transact_size: 1 << 20,
            max_read_size: 1 << 20,
            max_write_size: 1 << 20,
            system_time: FileTime::default(),
            server_start_time: FileTime::default(),
            buffer: vec![],
            negotiate_contexts: contexts,
        }
    }

    fn preauth() -> NegotiateContext {
        NegotiateContext::PreAuthIntegrityCapabilities(PreAuthIntegrityCapabilities {
            hash_algorithms: vec![HashAlgorithm::SHA512],
            salt: vec![1; 32],
        })
    }

    fn gcm() -> NegotiateContext {
        NegotiateContext::EncryptionCapabilities(EncryptionCapabilities { ciphers: vec![EncryptionCipher::AES128GCM] })
    }

    fn started(config: &SMBClientConfig) -> NegotiateMachine {
        let mut machine = NegotiateMachine::new(config, NegotiateMode::Fresh);
        machine.build_request().unwrap();
        machine
    }

    /// MS-SMB2 3.2.5.2: 3.1.1 with pre-auth and GCM, no compression context.
    #[test]
    fn smb311_with_gcm_and_no_compression() {
        let config = SMBClientConfig::default();
        let mut machine = NegotiateMachine::new(&config, NegotiateMode::Fresh);
        let request = machine.build_request().unwrap();
        assert_eq!(request.dialects, vec![
            SMBDialect::V3_1_1, SMBDialect::V3_0_2, SMBDialect::V3_0_0, SMBDialect::V2_1_0, SMBDialect::V2_0_2,
        ]);
        assert_eq!(machine.state(), NegotiateState::DialectsSent);
        let parameters = machine.process_response(&response(SMBDialect::V3_1_1, vec![preauth(), gcm()]), b"req", b"resp").unwrap();
        assert_eq!(machine.state(), NegotiateState::Negotiated);
        assert_eq!(parameters.cipher, Some(EncryptionCipher::AES128GCM));
        assert!(parameters.compression.is_empty());
        assert_eq!(parameters.signing_algorithm, SigningAlgorithm::AesCmac);
        assert_eq!(parameters.preauth_hash.len(), 64);
    }

    #[test]
    fn request_carries_one_context_of_each_kind() {
        let config = SMBClientConfig {
            compression_algorithms: vec![CompressionAlgorithm::LZ77],
            ..Default::default()
        };
        let mut machine = NegotiateMachine::new(&config, NegotiateMode::Fresh);
        let request = machine.build_request().unwrap();
        let tags: Vec<u16> = request.negotiate_contexts.iter().map(|c| c.byte_code()).collect();
        assert_eq!(tags, vec![
            PRE_AUTH_INTEGRITY_CAPABILITIES_TAG,
            ENCRYPTION_CAPABILITIES_TAG,
            COMPRESSION_CAPABILITIES_TAG,
            SIGNING_CAPABILITIES_TAG,
            NETNAME_NEGOTIATE_CONTEXT_ID_TAG,
        ]);
        let NegotiateContext::PreAuthIntegrityCapabilities(preauth) = &request.negotiate_contexts[0] else { panic!() };
        assert_eq!(preauth.salt.len(), 32);
    }

    #[test]
    fn pinned_negotiate_offers_only_the_dialect_in_use() {
        let config = SMBClientConfig::default();
        let mut machine = NegotiateMachine::new(&config, NegotiateMode::Pinned(SMBDialect::V3_0_2));
        let request = machine.build_request().unwrap();
        assert_eq!(request.dialects, vec![SMBDialect::V3_0_2]);
        assert!(request.negotiate_contexts.is_empty());
        assert!(machine.process_response(&response(SMBDialect::V3_1_1, vec![preauth()]), &[], &[]).is_err());
        assert_eq!(machine.state(), NegotiateState::Failed);
    }

    #[test]
    fn capped_negotiate_drops_higher_dialects() {
        let config = SMBClientConfig::default();
        let machine = NegotiateMachine::new(&config, NegotiateMode::Capped(SMBDialect::V3_0_2));
        assert_eq!(machine.offered().first(), Some(&SMBDialect::V3_0_2));
    }

    /// MS-SMB2 3.2.5.2: 0x02FF is only valid for SMB1 multi-protocol negotiation.
    #[test]
    fn wildcard_dialect_is_fatal() {
        let mut machine = started(&SMBClientConfig::default());
        assert!(machine.process_response(&response(SMBDialect::V2_X_X, vec![]), &[], &[]).is_err());
    }

    #[test]
    fn unoffered_dialect_is_fatal() {
        let config = SMBClientConfig { min_dialect: SMBDialect::V3_0_0, ..Default::default() };
        let mut machine = started(&config);
        assert!(machine.process_response(&response(SMBDialect::V2_1_0, vec![]), &[], &[]).is_err());
    }

    #[test]
    fn smb311_requires_exactly_one_preauth_context() {
        let mut missing = started(&SMBClientConfig::default());
        assert!(missing.process_response(&response(SMBDialect::V3_1_1, vec![gcm()]), &[], &[]).is_err());
        let mut duplicate = started(&SMBClientConfig::default());
        assert!(duplicate.process_response(&response(SMBDialect::V3_1_1, vec![preauth(), preauth()]), &[], &[]).is_err());
    }

    #[test]
    fn encryption_context_must_name_one_offered_cipher() {
        let two = NegotiateContext::EncryptionCapabilities(EncryptionCapabilities {
            ciphers: vec![EncryptionCipher::AES128GCM, EncryptionCipher::AES256GCM],
        });
        let mut machine = started(&SMBClientConfig::default());
        assert!(machine.process_response(&response(SMBDialect::V3_1_1, vec![preauth(), two]), &[], &[]).is_err());

        let ccm = NegotiateContext::EncryptionCapabilities(EncryptionCapabilities { ciphers: vec![EncryptionCipher::AES128CCM] });
        let mut machine = started(&SMBClientConfig::default());
        assert!(machine.process_response(&response(SMBDialect::V3_1_1, vec![preauth(), ccm]), &[], &[]).is_err());

        let none = NegotiateContext::EncryptionCapabilities(EncryptionCapabilities { ciphers: vec![EncryptionCipher::None] });
        let mut machine = started(&SMBClientConfig::default());
        let parameters = machine.process_response(&response(SMBDialect::V3_1_1, vec![preauth(), none]), &[], &[]).unwrap();
        assert_eq!(parameters.cipher, None);
    }

    #[test]
    fn signing_context_selects_algorithm_and_unknown_contexts_are_skipped() {
        let gmac = NegotiateContext::SigningCapabilities(SigningCapabilities { signing_algorithms: vec![SigningAlgorithm::AesGmac] });
        let unknown = NegotiateContext::Unknown { context_type: 0x7F, data: vec![1, 2, 3] };
        let mut machine = started(&SMBClientConfig::default());
        let parameters = machine.process_response(&response(SMBDialect::V3_1_1, vec![unknown, preauth(), gmac]), &[], &[]).unwrap();
        assert_eq!(parameters.signing_algorithm, SigningAlgorithm::AesGmac);
    }

    /// MS-SMB2 3.2.5.2: 3.0 and 3.0.2 servers with CAP_ENCRYPTION use AES-128-CCM.
    #[test]
    fn smb30_encryption_capability_implies_ccm() {
        let mut machine = started(&SMBClientConfig::default());
        let mut reply = response(SMBDialect::V3_0_2, vec![]);
        reply.capabilities |= Capabilities::ENCRYPTION;
        let parameters = machine.process_response(&reply, &[], &[]).unwrap();
        assert_eq!(parameters.cipher, Some(EncryptionCipher::AES128CCM));
        assert!(parameters.preauth_hash.is_empty());
    }

    #[test]
    fn smb202_transfers_are_single_credit() {
        let mut machine = started(&SMBClientConfig::default());
        let parameters = machine.process_response(&response(SMBDialect::V2_0_2, vec![]), &[], &[]).unwrap();
        assert_eq!(parameters.max_read_size, 65536);
        assert!(!parameters.supports_multi_credit());
    }

    #[test]
    fn every_outcome_is_terminal() {
        for dialect in [SMBDialect::V2_0_2, SMBDialect::V2_1_0, SMBDialect::V2_X_X, SMBDialect::V3_0_0, SMBDialect::V3_0_2, SMBDialect::V3_1_1] {
            let mut machine = started(&SMBClientConfig::default());
            let _ = machine.process_response(&response(dialect, vec![preauth()]), &[], &[]);
            assert!(matches!(machine.state(), NegotiateState::Negotiated | NegotiateState::Failed));
        }
    }
}
