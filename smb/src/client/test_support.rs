//! In-memory server side of a connection for unit tests.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::client::config::SMBClientConfig;
use crate::client::connection::Connection;
use crate::client::event::ConnectionEvent;
use crate::client::negotiate::NegotiatedParameters;
use crate::client::session::{Session, SetupMode};
use crate::protocol::body::negotiate::context::EncryptionCipher;
use crate::protocol::body::session_setup::flags::SMBSessionFlags;
use crate::protocol::body::session_setup::SMBSessionSetupResponse;
use crate::protocol::body::{Capabilities, SecurityMode, SMBBody, SMBDialect};
use crate::protocol::message::SMBMessage;
use crate::socket::message_stream::{read_frame, SMBFrameCodec, SMBFrameReader, SMBFrameWriter, SMBSocketConnection};
use crate::util::auth::{AuthContext, AuthProvider};
use crate::util::crypto::seal::{decrypt_message, encrypt_message, is_sealed};
use crate::util::crypto::smb2::{sign_message, signing_algorithm_for, SessionKeys};

pub(crate) const SESSION_ID: u64 = 0x1000_0000_0041;
pub(crate) const SESSION_KEY: [u8; 16] = [0x5a; 16];

pub(crate) struct Peer {
    pub reader: SMBFrameReader,
    pub writer: SMBFrameWriter,
}

impl Peer {
    pub async fn next(&mut self) -> SMBMessage {
        let frame = read_frame(&mut self.reader).await.unwrap().unwrap();
        SMBMessage::parse(&frame).unwrap().1
    }

    pub async fn send(&mut self, message: SMBMessage) {
        self.writer.write_frame(&message.as_bytes()).await.unwrap();
    }

    pub async fn reply(&mut self, request: &SMBMessage, status: NTStatus, credits: u16, body: SMBBody) {
        let header = request.header.create_response_header(status, credits);
        self.send(SMBMessage::new(header, body)).await;
    }

    /// Reads the next request, unsealing it with `keys` when it arrives sealed.
    pub async fn next_with(&mut self, keys: &SessionKeys, cipher: EncryptionCipher) -> (SMBMessage, bool) {
        let frame = read_frame(&mut self.reader).await.unwrap().unwrap();
        if is_sealed(&frame) {
            let (_, plain) = decrypt_message(&frame, &keys.encryption, cipher).unwrap();
            (SMBMessage::parse(&plain).unwrap().1, true)
        } else {
            (SMBMessage::parse(&frame).unwrap().1, false)
        }
    }

    /// Replies signed with the session signing key, or sealed when `seal` is set.
    pub async fn reply_secured(
        &mut self,
        request: &SMBMessage,
        status: NTStatus,
        body: SMBBody,
        keys: &SessionKeys,
        dialect: SMBDialect,
        seal: bool,
    ) {
        let header = request.header.create_response_header(status, 8);
        let mut bytes = SMBMessage::new(header, body).as_bytes();
        if seal {
            let cipher = EncryptionCipher::AES128GCM;
            bytes = encrypt_message(&bytes, request.header.session_id, &keys.decryption, cipher).unwrap();
        } else {
            sign_message(&keys.signing, signing_algorithm_for(dialect, None), &mut bytes).unwrap();
        }
        self.writer.write_frame(&bytes).await.unwrap();
    }
}

pub(crate) fn pair(config: &SMBClientConfig) -> (Arc<Connection>, Peer, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let (client, server) = tokio::io::duplex(1 << 20);
    let (events, receiver) = mpsc::unbounded_channel();
    let connection = Connection::from_stream("server", client, 1, config, events);
    let (reader, writer) = SMBSocketConnection::new("client", server, SMBFrameCodec::default()).into_streams();
    (connection, Peer { reader, writer }, receiver)
}

pub(crate) fn parameters(dialect: SMBDialect) -> NegotiatedParameters {
    NegotiatedParameters {
        dialect,
        offered_dialects: vec![dialect],
        client_guid: Uuid::new_v4(),
        client_capabilities: Capabilities::client_default(dialect.is_smb3()),
        client_security_mode: SecurityMode::SIGNING_ENABLED,
        server_guid: Uuid::new_v4(),
        server_capabilities: Capabilities::LEASING | Capabilities::LARGE_MTU,
        server_security_mode: SecurityMode::SIGNING_ENABLED,
        max_transact_size: 1 << 16,
        max_read_size: 1 << 16,
        max_write_size: 1 << 16,
        cipher: dialect.is_smb3().then_some(EncryptionCipher::AES128GCM),
        signing_algorithm: signing_algorithm_for(dialect, None),
        compression: vec![],
        preauth_hash: if dialect == SMBDialect::V3_1_1 { vec![0; 64] } else { vec![] },
        security_buffer: vec![],
    }
}

/// Connection that already went through negotiate.
pub(crate) fn negotiated_pair(
    config: &SMBClientConfig,
    parameters: NegotiatedParameters,
) -> (Arc<Connection>, Peer, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let (connection, peer, events) = pair(config);
    connection.set_negotiated(Arc::new(parameters));
    connection.with_state(|state| state.ledger.grant(63));
    (connection, peer, events)
}

/// Keys a session set up with [`SESSION_KEY`] derives on dialects without pre-auth hashing.
pub(crate) fn session_keys(dialect: SMBDialect) -> SessionKeys {
    SessionKeys::derive(&SESSION_KEY, dialect, &[], EncryptionCipher::AES128GCM).unwrap()
}

/// Runs a single-round session setup against `peer`.
pub(crate) async fn established_session(
    connection: &Arc<Connection>,
    peer: &mut Peer,
    config: &SMBClientConfig,
    flags: SMBSessionFlags,
) -> Arc<Session> {
    let session = Arc::new(Session::new());
    let auth = ScriptedAuth { tokens: vec![b"token".to_vec()], session_key: Some(SESSION_KEY.to_vec()) };
    let server = async {
        let request = peer.next().await;
        let mut header = request.header.create_response_header(NTStatus::StatusSuccess, 8);
        header.session_id = SESSION_ID;
        let body = SMBBody::SessionSetupResponse(SMBSessionSetupResponse::new(flags, vec![]));
        peer.send(SMBMessage::new(header, body)).await;
    };
    let (result, _) = tokio::join!(session.setup(connection, &auth, config, SetupMode::Fresh), server);
    result.unwrap();
    session
}

/// Hands out fixed tokens, one per round, and completes after the last.
pub(crate) struct ScriptedAuth {
    pub tokens: Vec<Vec<u8>>,
    pub session_key: Option<Vec<u8>>,
}

#[derive(Default)]
pub(crate) struct ScriptedContext {
    round: usize,
    complete: bool,
    session_key: Option<Vec<u8>>,
    pub inputs: Vec<Vec<u8>>,
}

impl AuthContext for ScriptedContext {
    fn is_complete(&self) -> bool {
        self.complete
    }

    fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }
}

impl AuthProvider for ScriptedAuth {
    type Context = ScriptedContext;

    fn init_context(&self) -> ScriptedContext {
        ScriptedContext::default()
    }

    fn initiate_security_context(&self, input_token: &[u8], context: &mut ScriptedContext) -> SMBResult<Vec<u8>> {
        context.inputs.push(input_token.to_vec());
        let token = self.tokens.get(context.round).cloned().unwrap_or_default();
        context.round += 1;
        if context.round >= self.tokens.len() {
            context.complete = true;
            context.session_key = self.session_key.clone();
        }
        Ok(token)
    }
}
