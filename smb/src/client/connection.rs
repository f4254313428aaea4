//! One transport link to the server.
//!
//! A connection owns the framed write half and a receive task on the read half.
//! Requests are matched to replies by message id: [`Connection::submit`] registers
//! a pending entry, spends credits from the ledger and writes the frame; the
//! receive task decrypts, verifies and hands each reply to its waiter. Anything
//! the server sends on its own (oplock and lease breaks) and the loss of the
//! transport are reported as [`ConnectionEvent`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use smb_core::error::SMBError;
use smb_core::logging::{debug, trace, warn};
use smb_core::nt_status::NTStatus;
use smb_core::{SMBFromBytes, SMBResult};

use crate::client::config::SMBClientConfig;
use crate::client::credit::{CreditGrant, CreditLedger};
use crate::client::event::ConnectionEvent;
use crate::client::negotiate::NegotiatedParameters;
use crate::client::quantum::QuantumTuner;
use crate::protocol::body::empty::SMBEmpty;
use crate::protocol::body::negotiate::context::{EncryptionCipher, SigningAlgorithm};
use crate::protocol::body::SMBBody;
use crate::protocol::header::{SMBCommandCode, SMBFlags, SMBSyncHeader};
use crate::protocol::message::SMBMessage;
use crate::socket::message_stream::{read_frame, SMBFrameCodec, SMBFrameReader, SMBFrameWriter, SMBSocketConnection};
use crate::socket::{SMBConnector, SMBStream};
use crate::util::crypto::seal::{decrypt_message, encrypt_message, is_sealed};
use crate::util::crypto::smb2::{sign_message, verify_signature, SessionKeys};

/// Key material a channel signs, verifies and seals with.
#[derive(Debug, Clone)]
pub struct ChannelKeys {
    pub session_id: u64,
    /// The session signing key on the main channel, the binding key on others.
    pub signing_key: Vec<u8>,
    pub signing_algorithm: SigningAlgorithm,
    pub session_keys: Arc<SessionKeys>,
    pub cipher: Option<EncryptionCipher>,
}

/// Everything guarded by the connection's single state lock.
#[derive(Debug)]
pub struct ChannelState {
    pub ledger: CreditLedger,
    pub tuner: QuantumTuner,
    keys: Option<Arc<ChannelKeys>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageSecurity {
    #[default]
    Plain,
    Signed,
    Sealed,
    /// Signed with a key other than the channel's own, as during a channel bind.
    SignedWith {
        key: Vec<u8>,
        algorithm: SigningAlgorithm,
    },
}

#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub body: SMBBody,
    pub session_id: u64,
    pub tree_id: u32,
    pub flags: SMBFlags,
    pub channel_sequence: u16,
    pub security: MessageSecurity,
    /// Wait for credits instead of failing with `CreditsExhausted`.
    pub blocking: bool,
    /// Wait for the reply without a deadline.
    pub no_timeout: bool,
}

impl OutgoingRequest {
    pub fn new(body: SMBBody, session_id: u64, tree_id: u32) -> Self {
        Self {
            body,
            session_id,
            tree_id,
            flags: SMBFlags::empty(),
            channel_sequence: 0,
            security: MessageSecurity::Plain,
            blocking: true,
            no_timeout: false,
        }
    }

    pub fn secured(mut self, security: MessageSecurity) -> Self {
        self.security = security;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.no_timeout = true;
        self
    }
}

/// A request as sent and the reply it got.
#[derive(Debug)]
pub struct Exchange {
    /// The message as written, after signing and before sealing.
    pub request_bytes: Vec<u8>,
    pub response: SMBMessage,
    /// The reply as received, after unsealing.
    pub response_bytes: Vec<u8>,
    pub sealed: bool,
}

impl Exchange {
    pub fn status(&self) -> NTStatus {
        self.response.header.status
    }

    /// Turns an error-class status into an error carrying it.
    pub fn check(self, context: &str) -> SMBResult<Self> {
        let status = self.status();
        if status.is_error() {
            return Err(SMBError::status_error(status, context));
        }
        Ok(self)
    }
}

#[derive(Debug)]
struct Received {
    message: SMBMessage,
    bytes: Vec<u8>,
    sealed: bool,
}

#[derive(Debug)]
struct PendingRequest {
    sender: Option<oneshot::Sender<SMBResult<Received>>>,
    charge: u16,
    async_id: Option<u64>,
    /// The request went out signed or sealed, so an unsealed reply must carry a signature.
    protected: bool,
}

pub struct Connection {
    id: u64,
    server_name: String,
    writer: tokio::sync::Mutex<SMBFrameWriter>,
    state: Mutex<ChannelState>,
    credits_changed: Notify,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    negotiated: RwLock<Option<Arc<NegotiatedParameters>>>,
    alive: AtomicBool,
    negotiate_validated: AtomicBool,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    request_timeout: Duration,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub async fn open<C: SMBConnector>(
        connector: &C,
        id: u64,
        config: &SMBClientConfig,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> SMBResult<Arc<Self>> {
        let stream = connector.connect().await?;
        Ok(Self::from_stream(connector.server_name(), stream, id, config, events))
    }

    pub fn from_stream<S: SMBStream>(
        server_name: &str,
        stream: S,
        id: u64,
        config: &SMBClientConfig,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Arc<Self> {
        let socket = SMBSocketConnection::new(server_name, stream, SMBFrameCodec::new(config.max_frame_size));
        let (reader, writer) = socket.into_streams();
        let connection = Arc::new(Self {
            id,
            server_name: server_name.to_string(),
            writer: tokio::sync::Mutex::new(writer),
            state: Mutex::new(ChannelState {
                ledger: CreditLedger::new(1, config.credit_target),
                tuner: QuantumTuner::new(config),
                keys: None,
            }),
            credits_changed: Notify::new(),
            pending: Mutex::new(HashMap::new()),
            negotiated: RwLock::new(None),
            alive: AtomicBool::new(true),
            negotiate_validated: AtomicBool::new(false),
            events,
            request_timeout: config.request_timeout,
            receive_task: Mutex::new(None),
        });
        let task = tokio::spawn(receive_loop(Arc::downgrade(&connection), reader));
        *lock(&connection.receive_task) = Some(task);
        debug!(connection = id, server = server_name, "connection opened");
        connection
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn negotiated(&self) -> SMBResult<Arc<NegotiatedParameters>> {
        self.negotiated.read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SMBError::NotConnected)
    }

    pub fn set_negotiated(&self, parameters: Arc<NegotiatedParameters>) {
        let multi_credit = parameters.supports_multi_credit();
        *self.negotiated.write().unwrap_or_else(|e| e.into_inner()) = Some(parameters);
        self.with_state(|state| state.ledger.set_multi_credit(multi_credit));
    }

    /// True for the first caller only; validate-negotiate runs once per connection.
    pub fn claim_negotiate_validation(&self) -> bool {
        !self.negotiate_validated.swap(true, Ordering::AcqRel)
    }

    pub fn install_keys(&self, keys: ChannelKeys) {
        self.with_state(|state| state.keys = Some(Arc::new(keys)));
    }

    pub fn keys(&self) -> Option<Arc<ChannelKeys>> {
        self.with_state(|state| state.keys.clone())
    }

    /// Runs `f` under the connection's state lock. Never hold it across an await.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ChannelState) -> R) -> R {
        f(&mut lock(&self.state))
    }

    /// Credits the server has granted on this connection, spent or not.
    pub fn granted_credits(&self) -> u32 {
        self.with_state(|state| state.ledger.granted())
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn exchange(self: &Arc<Self>, request: OutgoingRequest) -> SMBResult<Exchange> {
        self.submit(request).await?.wait().await
    }

    /// Sends a request and returns a handle to await its reply with.
    pub async fn submit(self: &Arc<Self>, request: OutgoingRequest) -> SMBResult<PendingReply> {
        if !self.is_alive() {
            return Err(SMBError::connection_lost("Connection is closed"));
        }
        let command = request.body.command_code()
            .ok_or_else(|| SMBError::precondition_failed("Cannot send an error body"))?;
        let (grant, credits, multi_credit) = self.acquire_credits(&request).await?;

        let mut header = SMBSyncHeader::request(command, grant.message_id, request.tree_id, request.session_id);
        header.credit_charge = if multi_credit { grant.charge } else { 0 };
        header.credits = credits;
        header.flags = request.flags;
        header.channel_sequence = request.channel_sequence;
        let message = SMBMessage::new(header, request.body);

        let request_protected = request.security != MessageSecurity::Plain;
        let prepared = self.protect(message.as_bytes(), request.session_id, &request.security);
        let (request_bytes, wire) = match prepared {
            Ok(x) => x,
            Err(e) => {
                self.with_state(|state| state.ledger.cancel(grant));
                self.credits_changed.notify_waiters();
                return Err(e);
            }
        };

        let (sender, receiver) = oneshot::channel();
        lock(&self.pending).insert(grant.message_id, PendingRequest {
            sender: Some(sender),
            charge: grant.charge,
            async_id: None,
            protected: request_protected,
        });
        let written = self.writer.lock().await.write_frame(&wire).await;
        if let Err(e) = written {
            lock(&self.pending).remove(&grant.message_id);
            self.with_state(|state| state.ledger.cancel(grant));
            self.fail_all(&format!("write failed: {}", e));
            return Err(SMBError::connection_lost(e.to_string()));
        }
        trace!(connection = self.id, message_id = grant.message_id, command = ?command, "request sent");
        Ok(PendingReply {
            connection: self.clone(),
            message_id: grant.message_id,
            request_bytes,
            receiver,
            timeout: if request.no_timeout { None } else { Some(self.request_timeout) },
        })
    }

    async fn acquire_credits(&self, request: &OutgoingRequest) -> SMBResult<(CreditGrant, u16, bool)> {
        let payload = request.body.payload_size();
        loop {
            let notified = self.credits_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = lock(&self.state);
                let ledger = &mut state.ledger;
                let charge = ledger.charge_for(payload);
                if let Some(grant) = ledger.try_acquire(charge) {
                    let credits = ledger.credit_request(charge);
                    return Ok((grant, credits, ledger.multi_credit()));
                }
                if !request.blocking || ledger.can_never_satisfy(charge) {
                    return Err(SMBError::CreditsExhausted);
                }
            }
            if !self.is_alive() {
                return Err(SMBError::connection_lost("Connection closed while waiting for credits"));
            }
            tokio::time::timeout(self.request_timeout, notified)
                .await
                .map_err(|_| SMBError::timeout("waiting for credits"))?;
        }
    }

    /// Returns the signed plain bytes and the bytes to put on the wire.
    fn protect(&self, mut bytes: Vec<u8>, session_id: u64, security: &MessageSecurity) -> SMBResult<(Vec<u8>, Vec<u8>)> {
        match security {
            MessageSecurity::Plain => Ok((bytes.clone(), bytes)),
            MessageSecurity::SignedWith { key, algorithm } => {
                sign_message(key, *algorithm, &mut bytes)?;
                Ok((bytes.clone(), bytes))
            }
            MessageSecurity::Signed => {
                let keys = self.keys().ok_or_else(|| SMBError::precondition_failed("No signing key on this channel"))?;
                sign_message(&keys.signing_key, keys.signing_algorithm, &mut bytes)?;
                Ok((bytes.clone(), bytes))
            }
            MessageSecurity::Sealed => {
                let keys = self.keys().ok_or_else(|| SMBError::precondition_failed("No encryption key on this channel"))?;
                let cipher = keys.cipher.ok_or_else(|| SMBError::precondition_failed("No cipher was negotiated"))?;
                let sealed = encrypt_message(&bytes, session_id, &keys.session_keys.encryption, cipher)?;
                Ok((bytes, sealed))
            }
        }
    }

    /// Sends CANCEL for a request still waiting on its final reply. Cancel spends no credits.
    pub async fn cancel(&self, message_id: u64, session_id: u64, security: MessageSecurity) -> SMBResult<()> {
        let async_id = lock(&self.pending).get(&message_id).and_then(|p| p.async_id);
        let mut header = SMBSyncHeader::request(SMBCommandCode::Cancel, message_id, 0, session_id);
        header.credit_charge = 0;
        header.credits = 0;
        if let Some(async_id) = async_id {
            header.flags |= SMBFlags::ASYNC_COMMAND;
            header.async_id = async_id;
        }
        let message = SMBMessage::new(header, SMBBody::CancelRequest(SMBEmpty));
        let (_, wire) = self.protect(message.as_bytes(), session_id, &security)?;
        self.writer.lock().await.write_frame(&wire).await?;
        debug!(connection = self.id, message_id, "cancel sent");
        Ok(())
    }

    fn is_async(&self, message_id: u64) -> bool {
        lock(&self.pending).get(&message_id).is_some_and(|p| p.async_id.is_some())
    }

    fn abandon(&self, message_id: u64) {
        if let Some(pending) = lock(&self.pending).get_mut(&message_id) {
            pending.sender = None;
        }
    }

    pub async fn close(&self) {
        if let Err(e) = self.writer.lock().await.close_stream().await {
            debug!(connection = self.id, error = %e, "closing transport failed");
        }
        self.fail_all("closed locally");
    }

    /// Fails every pending request and reports the connection lost, once.
    fn fail_all(&self, reason: &str) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let pending: Vec<PendingRequest> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        warn!(connection = self.id, pending = pending.len(), reason, "connection lost");
        for request in pending {
            if let Some(sender) = request.sender {
                let _ = sender.send(Err(SMBError::connection_lost(reason.to_string())));
            }
        }
        self.credits_changed.notify_waiters();
        let _ = self.events.send(ConnectionEvent::Disconnected {
            connection_id: self.id,
            reason: reason.to_string(),
        });
    }

    fn dispatch(&self, frame: &[u8]) {
        let (bytes, sealed) = if is_sealed(frame) {
            match self.unseal(frame) {
                Ok(bytes) => (bytes, true),
                Err(e) => {
                    warn!(connection = self.id, error = %e, "dropping undecryptable message");
                    return;
                }
            }
        } else {
            (frame.to_vec(), false)
        };
        let message = match SMBMessage::parse(&bytes) {
            Ok((_, message)) => message,
            Err(e) => {
                self.fail_unparsable(&bytes, e);
                return;
            }
        };
        if message.header.is_unsolicited() {
            self.route_unsolicited(message);
            return;
        }
        let header = &message.header;
        if header.status == NTStatus::StatusPending && header.flags.is_async() {
            if let Some(pending) = lock(&self.pending).get_mut(&header.message_id) {
                pending.async_id = Some(header.async_id);
            }
            self.with_state(|state| state.ledger.grant(header.credits));
            self.credits_changed.notify_waiters();
            trace!(connection = self.id, message_id = header.message_id, "interim response");
            return;
        }
        let Some(pending) = lock(&self.pending).remove(&header.message_id) else {
            warn!(connection = self.id, message_id = header.message_id, "reply for unknown message id");
            return;
        };
        let verdict = self.verify(&message, &bytes, sealed, pending.protected);
        self.with_state(|state| state.ledger.complete(pending.charge, message.header.credits));
        self.credits_changed.notify_waiters();
        if let Some(sender) = pending.sender {
            let _ = sender.send(verdict.map(|_| Received { message, bytes, sealed }));
        }
    }

    fn unseal(&self, frame: &[u8]) -> SMBResult<Vec<u8>> {
        let keys = self.keys().ok_or_else(|| SMBError::crypto_error("Sealed message without session keys"))?;
        let cipher = keys.cipher.ok_or_else(|| SMBError::crypto_error("Sealed message without a cipher"))?;
        let (session_id, bytes) = decrypt_message(frame, &keys.session_keys.decryption, cipher)?;
        if session_id != keys.session_id {
            return Err(SMBError::crypto_error("Sealed message for another session"));
        }
        Ok(bytes)
    }

    /// MS-SMB2 3.2.5.1.3. A server that dropped the session cannot sign the
    /// reply saying so, and binding continuations are checked by the session.
    fn verify(&self, message: &SMBMessage, bytes: &[u8], sealed: bool, protected: bool) -> SMBResult<()> {
        if sealed {
            return Ok(());
        }
        if !message.is_signed() {
            let header = &message.header;
            let exempt = matches!(header.status, NTStatus::NetworkSessionExpired | NTStatus::UserSessionDeleted)
                || (header.command == SMBCommandCode::SessionSetup && header.status == NTStatus::MoreProcessingRequired);
            if protected && !exempt {
                warn!(connection = self.id, message_id = header.message_id, status = ?header.status, "unsigned reply to a signed request");
                return Err(SMBError::crypto_error("Reply to a signed request is not signed"));
            }
            return Ok(());
        }
        match self.keys() {
            Some(keys) if keys.session_id == message.header.session_id => {
                verify_signature(&keys.signing_key, keys.signing_algorithm, bytes)
            }
            _ => Ok(()),
        }
    }

    fn fail_unparsable(&self, bytes: &[u8], error: SMBError) {
        warn!(connection = self.id, error = %error, "undecodable reply");
        let Ok((_, header)) = SMBSyncHeader::smb_from_bytes(bytes) else {
            return;
        };
        let Some(pending) = lock(&self.pending).remove(&header.message_id) else {
            return;
        };
        self.with_state(|state| state.ledger.complete(pending.charge, header.credits));
        self.credits_changed.notify_waiters();
        if let Some(sender) = pending.sender {
            let _ = sender.send(Err(error));
        }
    }

    fn route_unsolicited(&self, message: SMBMessage) {
        let event = match message.body {
            SMBBody::OplockBreak(notification) => ConnectionEvent::OplockBreak { connection_id: self.id, notification },
            SMBBody::LeaseBreakNotification(notification) => ConnectionEvent::LeaseBreak { connection_id: self.id, notification },
            other => {
                warn!(connection = self.id, command = ?other.command_code(), "ignoring unsolicited message");
                return;
            }
        };
        let _ = self.events.send(event);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.receive_task).take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("server_name", &self.server_name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// A sent request whose reply has not been collected yet.
pub struct PendingReply {
    connection: Arc<Connection>,
    message_id: u64,
    request_bytes: Vec<u8>,
    receiver: oneshot::Receiver<SMBResult<Received>>,
    timeout: Option<Duration>,
}

impl PendingReply {
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Waits for the final reply. A request the server answered with an interim
    /// response keeps waiting past the request timeout.
    pub async fn wait(mut self) -> SMBResult<Exchange> {
        let received = loop {
            let outcome = match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, &mut self.receiver).await,
                None => Ok((&mut self.receiver).await),
            };
            match outcome {
                Ok(Ok(result)) => break result?,
                Ok(Err(_)) => return Err(SMBError::connection_lost("Reply channel closed")),
                Err(_) if self.connection.is_async(self.message_id) => continue,
                Err(_) => {
                    self.connection.abandon(self.message_id);
                    return Err(SMBError::timeout(format!("reply to message {}", self.message_id)));
                }
            }
        };
        Ok(Exchange {
            request_bytes: self.request_bytes,
            response: received.message,
            response_bytes: received.bytes,
            sealed: received.sealed,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn receive_loop(connection: Weak<Connection>, mut reader: SMBFrameReader) {
    let reason = loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                let Some(connection) = connection.upgrade() else {
                    return;
                };
                connection.dispatch(&frame);
            }
            Ok(None) => break "closed by peer".to_string(),
            Err(e) => break e.to_string(),
        }
    };
    if let Some(connection) = connection.upgrade() {
        connection.fail_all(&reason);
    }
}
