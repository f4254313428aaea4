//! Session setup, channel binding and logoff (MS-SMB2 3.2.4.2.3, 3.2.5.3).

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use smb_core::error::SMBError;
use smb_core::logging::{debug, info};
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::client::config::SMBClientConfig;
use crate::client::connection::{ChannelKeys, Connection, MessageSecurity, OutgoingRequest};
use crate::protocol::body::empty::SMBEmpty;
use crate::protocol::body::negotiate::context::EncryptionCipher;
use crate::protocol::body::session_setup::flags::{SMBSessionFlags, SMBSessionSetupFlags};
use crate::protocol::body::session_setup::SMBSessionSetupRequest;
use crate::protocol::body::SMBBody;
use crate::util::auth::{AuthContext, AuthProvider};
use crate::util::crypto::preauth::PreauthHash;
use crate::util::crypto::smb2::{verify_signature, SessionKeys};

/// How a session setup relates to the session it runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupMode {
    /// A new session on the main channel.
    Fresh,
    /// A new session replacing `previous` after a reconnect.
    Reconnect { previous: u64 },
    /// Binding another channel to the established session.
    Bind,
}

/// An authenticated identity shared by all channels bound to it.
///
/// The session keys are only ever replaced as a whole, so channels read them
/// by cloning the `Arc` out of the lock.
#[derive(Debug, Default)]
pub struct Session {
    id: AtomicU64,
    generation: AtomicU64,
    keys: RwLock<Option<Arc<SessionKeys>>>,
    flags: RwLock<SMBSessionFlags>,
    should_sign: AtomicBool,
    channel_sequence: AtomicU16,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero until a setup succeeds.
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    /// Bumped every time the session is re-established from scratch.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn keys(&self) -> Option<Arc<SessionKeys>> {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn flags(&self) -> SMBSessionFlags {
        *self.flags.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn encrypts_data(&self) -> bool {
        self.flags().contains(SMBSessionFlags::ENCRYPT_DATA)
    }

    pub fn should_sign(&self) -> bool {
        self.should_sign.load(Ordering::Acquire)
    }

    pub fn channel_sequence(&self) -> u16 {
        self.channel_sequence.load(Ordering::Acquire)
    }

    /// Called on failover so replayed requests carry a new channel sequence.
    pub fn bump_channel_sequence(&self) -> u16 {
        self.channel_sequence.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Protection for a request on this session, given whether its share is sealed.
    pub fn security(&self, share_encrypted: bool) -> MessageSecurity {
        if self.keys().is_some() && (share_encrypted || self.encrypts_data()) {
            MessageSecurity::Sealed
        } else if self.should_sign() {
            MessageSecurity::Signed
        } else {
            MessageSecurity::Plain
        }
    }

    fn invalidate(&self) {
        self.id.store(0, Ordering::Release);
        *self.keys.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.should_sign.store(false, Ordering::Release);
    }

    /// Runs the security exchange on `connection` until the server accepts or refuses it.
    pub async fn setup<A: AuthProvider>(
        &self,
        connection: &Arc<Connection>,
        provider: &A,
        config: &SMBClientConfig,
        mode: SetupMode,
    ) -> SMBResult<()> {
        let result = self.run_setup(connection, provider, config, mode).await;
        if let Err(e) = &result {
            debug!(connection = connection.id(), error = %e, "session setup failed");
            if mode != SetupMode::Bind {
                self.invalidate();
            }
        }
        result
    }

    async fn run_setup<A: AuthProvider>(
        &self,
        connection: &Arc<Connection>,
        provider: &A,
        config: &SMBClientConfig,
        mode: SetupMode,
    ) -> SMBResult<()> {
        let parameters = connection.negotiated()?;
        if parameters.server_requires_signing() && config.signing_disabled {
            return Err(SMBError::auth_error("Server requires signing, which local policy disables"));
        }
        let binding = mode == SetupMode::Bind;
        let generation = self.generation();
        let bind_signing = if binding {
            if !parameters.dialect.is_smb3() {
                return Err(SMBError::precondition_failed("Channel binding needs SMB 3"));
            }
            let keys = self.keys().ok_or_else(|| SMBError::auth_error("Cannot bind a channel to an unsigned session"))?;
            Some(MessageSecurity::SignedWith {
                key: keys.signing.clone(),
                algorithm: parameters.signing_algorithm,
            })
        } else {
            None
        };
        if !binding {
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.invalidate();
        }
        let mut session_id = if binding { self.id() } else { 0 };
        let flags = if binding { SMBSessionSetupFlags::BINDING } else { SMBSessionSetupFlags::empty() };
        let previous_session_id = match mode {
            SetupMode::Reconnect { previous } => previous,
            _ => 0,
        };
        let uses_preauth = parameters.dialect.supports_negotiate_contexts();
        let mut preauth = PreauthHash::resume(&parameters.preauth_hash);
        let max_slice = (parameters.max_transact_size as usize).max(1);

        let mut context = provider.init_context();
        let mut token = provider.initiate_security_context(&[], &mut context)?;
        let final_exchange = 'rounds: loop {
            let mut offset = 0;
            loop {
                let end = (offset + max_slice).min(token.len());
                let mut request = SMBSessionSetupRequest::new(
                    flags,
                    parameters.client_security_mode,
                    parameters.client_capabilities,
                    token[offset..end].to_vec(),
                );
                request.previous_session_id = previous_session_id;
                offset = end;
                let mut outgoing = OutgoingRequest::new(SMBBody::SessionSetupRequest(request), session_id, 0);
                if let Some(security) = &bind_signing {
                    outgoing = outgoing.secured(security.clone());
                }
                let exchange = connection.exchange(outgoing).await?;
                if uses_preauth {
                    preauth.update(&exchange.request_bytes);
                }
                if session_id == 0 {
                    session_id = exchange.response.header.session_id;
                    self.id.store(session_id, Ordering::Release);
                }
                let status = exchange.status();
                if status != NTStatus::MoreProcessingRequired {
                    if status.is_success() && offset < token.len() {
                        return Err(SMBError::auth_error("Server completed the session before the token was sent"));
                    }
                    break 'rounds exchange.check("Session setup failed")?;
                }
                if uses_preauth {
                    preauth.update(&exchange.response_bytes);
                }
                if offset < token.len() {
                    continue;
                }
                let SMBBody::SessionSetupResponse(response) = &exchange.response.body else {
                    return Err(SMBError::parse_error("Session setup continuation without a response body"));
                };
                if context.is_complete() {
                    return Err(SMBError::auth_error("Server wants another round after authentication completed"));
                }
                token = provider.initiate_security_context(&response.buffer, &mut context)?;
                break;
            }
        };

        let SMBBody::SessionSetupResponse(response) = &final_exchange.response.body else {
            return Err(SMBError::parse_error("Session setup succeeded without a response body"));
        };
        if !context.is_complete() && !response.buffer.is_empty() {
            provider.initiate_security_context(&response.buffer, &mut context)?;
        }
        let session_flags = response.session_flags;
        if config.encryption_required && parameters.cipher.is_none() {
            return Err(SMBError::auth_error("Encryption is required but no cipher was negotiated"));
        }

        let Some(session_key) = context.session_key().filter(|_| !session_flags.is_unauthenticated()) else {
            if binding {
                return Err(SMBError::auth_error("Channel binding produced no session key"));
            }
            if config.signing_required || config.encryption_required {
                return Err(SMBError::auth_error("Guest or anonymous session cannot be signed"));
            }
            *self.flags.write().unwrap_or_else(|e| e.into_inner()) = session_flags;
            info!(session_id, "unauthenticated session established");
            return Ok(());
        };
        let cipher = parameters.cipher.unwrap_or(EncryptionCipher::AES128GCM);
        let derived = SessionKeys::derive(session_key, parameters.dialect, preauth.value(), cipher)?;
        if final_exchange.response.is_signed() {
            verify_signature(&derived.signing, parameters.signing_algorithm, &final_exchange.response_bytes)?;
        }

        if binding {
            if self.generation() != generation || self.id() != session_id {
                return Err(SMBError::auth_error("Session was reset while the channel was binding"));
            }
            let session_keys = self.keys().ok_or_else(|| SMBError::auth_error("Session lost its keys during bind"))?;
            connection.install_keys(ChannelKeys {
                session_id,
                signing_key: derived.signing,
                signing_algorithm: parameters.signing_algorithm,
                session_keys,
                cipher: parameters.cipher,
            });
            info!(session_id, connection = connection.id(), "channel bound");
            return Ok(());
        }

        let signing_key = derived.signing.clone();
        let session_keys = Arc::new(derived);
        *self.keys.write().unwrap_or_else(|e| e.into_inner()) = Some(session_keys.clone());
        *self.flags.write().unwrap_or_else(|e| e.into_inner()) = session_flags;
        let should_sign = !config.signing_disabled
            && (config.signing_required || parameters.server_requires_signing() || parameters.dialect.is_smb3());
        self.should_sign.store(should_sign, Ordering::Release);
        connection.install_keys(ChannelKeys {
            session_id,
            signing_key,
            signing_algorithm: parameters.signing_algorithm,
            session_keys,
            cipher: parameters.cipher,
        });
        info!(session_id, dialect = ?parameters.dialect, should_sign, "session established");
        Ok(())
    }

    pub async fn logoff(&self, connection: &Arc<Connection>) -> SMBResult<()> {
        let session_id = self.id();
        if session_id == 0 {
            return Ok(());
        }
        let request = OutgoingRequest::new(SMBBody::LogoffRequest(SMBEmpty), session_id, 0)
            .secured(self.security(false));
        let result = connection.exchange(request).await.and_then(|e| e.check("Logoff failed"));
        self.invalidate();
        result.map(|_| ())
    }
}
